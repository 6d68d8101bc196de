//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the storage directory is writable

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness check, always 200 OK. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Reports the active backend and, for the filesystem backend, performs a
/// write/read/delete round trip under the storage root.
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert(
        "storage",
        CheckStatus {
            ok: true,
            error: None,
            backend: Some(state.service.storage_name()),
        },
    );
    if let Some(dir) = &state.storage_dir {
        checks.insert("disk", disk_check(dir).await);
    }

    let overall_ok = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn disk_check(dir: &Path) -> CheckStatus {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&tmp_path, b"readyz").await {
        Ok(()) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(()) => Ok(()),
                Err(e) => Err(format!("could not remove tmp file: {}", e)),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err("file content mismatch".to_string())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(format!("could not read tmp file: {}", e))
            }
        },
        Err(e) => Err(format!("could not write tmp file: {}", e)),
    };

    CheckStatus {
        ok: result.is_ok(),
        error: result.err(),
        backend: None,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn disk_check_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let check = disk_check(dir.path()).await;
        assert!(check.ok, "{:?}", check.error);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn disk_check_fails_for_missing_root() {
        let dir = TempDir::new().unwrap();
        let check = disk_check(&dir.path().join("missing")).await;
        assert!(!check.ok);
        assert!(check.error.is_some());
    }
}
