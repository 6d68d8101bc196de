//! Per-request plumbing: correlation id, panic recovery, access log and the
//! request deadline.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

/// Honour the caller's `X-Request-ID` or mint one, run the request inside a
/// span carrying it, and echo it back.
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header = HeaderValue::from_str(&id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(REQUEST_ID, value.clone());
    }

    let span = info_span!("request", request_id = %id);
    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

/// Turn a panicking handler into a 500 instead of a dropped connection.
pub async fn recover_panics(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(panic = %panic_message(panic.as_ref()), "handler panicked");
            AppError::internal("internal server error").into_response()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".into()
    }
}

pub async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_us = started.elapsed().as_micros() as u64;
    if response.status().is_server_error() {
        warn!(%method, path = %path, status, duration_us, "request failed");
    } else {
        info!(%method, path = %path, status, duration_us, "request completed");
    }
    response
}

/// Give the request a [`CancellationToken`] and a deadline. The token is
/// cancelled when the deadline passes or the request is dropped.
pub async fn enforce_deadline(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    request.extensions_mut().insert(cancel.clone());

    match tokio::time::timeout(state.timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            cancel.cancel();
            warn!(timeout_ms = state.timeout.as_millis() as u64, "request deadline exceeded");
            AppError::unavailable("request timed out").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
