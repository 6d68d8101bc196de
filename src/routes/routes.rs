//! Defines routes for the file API and the health checks.
//!
//! ## Structure
//! - **Health** (unauthenticated)
//!   - `GET    /healthz`
//!   - `GET    /readyz`
//!
//! - **File endpoints** (bearer token)
//!   - `POST   /files/upload`       : create or update a file (write)
//!   - `GET    /files/{id}/info`    : metadata (read)
//!   - `GET    /files/{id}/content` : bytes, images resized on request (read)
//!   - `DELETE /files/{id}`         : delete (write)
//!
//! Middleware, outermost first: request id, panic recovery, access log,
//! request deadline, body limit, then authorization on `/files`.

use crate::{
    handlers::{
        file_handlers::{delete_file, file_content, file_info, upload_file},
        health_handlers::{healthz, readyz},
    },
    middleware::{
        auth::authorize,
        request::{access_log, assign_request_id, enforce_deadline, recover_panics},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
};

/// Build the application router with all middleware applied.
pub fn routes(state: AppState) -> Router {
    let files = Router::new()
        .route("/files/upload", post(upload_file))
        .route("/files/{id}", delete(delete_file))
        .route("/files/{id}/info", get(file_info))
        .route("/files/{id}/content", get(file_content))
        .layer(from_fn_with_state(state.clone(), authorize));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(files)
        .layer(DefaultBodyLimit::max(state.size_limit))
        .layer(from_fn_with_state(state.clone(), enforce_deadline))
        .layer(from_fn(access_log))
        .layer(from_fn(recover_panics))
        .layer(from_fn(assign_request_id))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Security,
        middleware::request::REQUEST_ID,
        models::image::ImageFormat,
        services::{
            file_service::{FileService, ImageSettings, content_hash},
            storage::MemoryStorage,
        },
    };
    use axum::http::{StatusCode, header};
    use base64::{Engine as _, engine::general_purpose};
    use reqwest::Client;
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tokio::net::TcpListener;

    const ID: &str = "9b2f3c4d-1e2a-4b5c-8d9e-0f1a2b3c4d5e";

    fn state() -> AppState {
        let service = FileService::new(
            Arc::new(MemoryStorage::new()),
            ImageSettings {
                format: ImageFormat::Jpeg,
                max_dimension: 1000,
            },
        );
        AppState {
            service: Arc::new(service),
            security: Arc::new(Security {
                read_token: "reader".into(),
                write_token: "writer".into(),
            }),
            storage_dir: None,
            size_limit: 1 << 20,
            timeout: Duration::from_secs(5),
        }
    }

    /// Serve `app` on an ephemeral port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_endpoints_need_no_token_and_carry_a_request_id() {
        let base = serve(routes(state())).await;
        let client = Client::new();

        let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let generated = resp.headers()[&REQUEST_ID].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());

        let resp = client
            .get(format!("{base}/readyz"))
            .header(&REQUEST_ID, "trace-123")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[&REQUEST_ID], "trace-123");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["storage"]["backend"], "inmemory");
    }

    #[tokio::test]
    async fn file_routes_require_a_known_token() {
        let base = serve(routes(state())).await;
        let client = Client::new();
        let url = format!("{base}/files/{ID}/info");

        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = client.get(&url).bearer_auth("nope").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = client
            .get(&url)
            .header(header::AUTHORIZATION, "bearer   reader")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn upload_read_and_delete_over_http() {
        let base = serve(routes(state())).await;
        let client = Client::new();
        let upload = json!({
            "id": ID,
            "data": general_purpose::STANDARD.encode(b"payload"),
            "hash": content_hash(b"payload"),
            "metadata": {"owner": "alice", "pages": 12},
        });

        let resp = client
            .post(format!("{base}/files/upload"))
            .bearer_auth("reader")
            .json(&upload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = client
            .post(format!("{base}/files/upload"))
            .bearer_auth("writer")
            .json(&upload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], ID);

        let info_url = format!("{base}/files/{ID}/info");
        let resp = client.get(&info_url).bearer_auth("reader").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let info: Value = resp.json().await.unwrap();
        assert_eq!(info["metadata"]["owner"], "alice");
        assert_eq!(info["metadata"]["pages"], json!(12));
        assert_eq!(info["file_size"], 7);

        let resp = client
            .get(format!("{base}/files/{ID}/content"))
            .bearer_auth("reader")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            resp.headers()[header::ETAG],
            format!("\"{:x}\"", md5::compute(b"payload")).as_str()
        );
        assert_eq!(&resp.bytes().await.unwrap()[..], b"payload");

        let resp = client
            .delete(format!("{base}/files/{ID}"))
            .bearer_auth("writer")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = client.get(&info_url).bearer_auth("reader").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let base = serve(routes(state())).await;
        let resp = Client::new()
            .post(format!("{base}/files/upload"))
            .bearer_auth("writer")
            .header(header::CONTENT_TYPE, "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        async fn explode() -> &'static str {
            panic!("boom")
        }
        let app = Router::new()
            .route("/explode", get(explode))
            .layer(from_fn(recover_panics));
        let base = serve(app).await;

        let resp = Client::new()
            .get(format!("{base}/explode"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
