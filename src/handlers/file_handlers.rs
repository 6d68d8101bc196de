//! HTTP handlers for file upload, metadata, content and deletion.
//! Request validation happens here; everything else is delegated to
//! `FileService`.

use crate::{
    errors::AppError,
    models::{
        access::Access,
        file::{ContentCommand, FileInfo, Metadata, UpdateCommand},
    },
    services::{
        file_service::{MIN_CONTENT_DIMENSION, content_hash},
        image_processor::{content_type_of, looks_like_image},
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Length of a canonical hyphenated UUID.
pub const ID_LEN: usize = 36;

/// Body of `POST /files/upload`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadRequest {
    /// Empty to let the server assign one.
    pub id: String,
    /// Base64 (standard alphabet) file content.
    pub data: String,
    /// Lowercase hex SHA-256 of the decoded content.
    pub hash: String,
    pub public: bool,
    pub is_image: bool,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

/// Query of `GET /files/{id}/content`. Kept as strings so malformed values
/// produce our own error message.
#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    pub width: Option<String>,
    pub height: Option<String>,
    pub format: Option<String>,
}

/// POST `/files/upload`: create or update a file.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Extension(cancel): Extension<CancellationToken>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    require_write(access)?;
    let Json(req) = payload?;

    let id = req.id.trim().to_string();
    if !id.is_empty() && id.len() != ID_LEN {
        return Err(AppError::bad_request(format!(
            "id must be empty or {} characters long",
            ID_LEN
        )));
    }

    let data = general_purpose::STANDARD
        .decode(req.data.trim())
        .map_err(|err| AppError::bad_request(format!("data is not valid base64: {}", err)))?;
    if data.is_empty() {
        return Err(AppError::unprocessable("no data"));
    }

    let hash = req.hash.trim().to_ascii_lowercase();
    if hash != content_hash(&data) {
        return Err(AppError::unprocessable("hash does not match data"));
    }
    if req.is_image && !looks_like_image(&data) {
        return Err(AppError::unsupported_media("data is not an image"));
    }

    let cmd = UpdateCommand {
        id,
        content: Bytes::from(data),
        hash,
        public: req.public,
        is_image: req.is_image,
        metadata: req.metadata,
    };
    let id = state.service.update(&cancel, cmd).await?;
    info!(%id, "file stored");
    Ok(Json(UploadResponse { id }))
}

/// GET `/files/{id}/info`: file metadata as JSON.
pub async fn file_info(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Extension(cancel): Extension<CancellationToken>,
    Path(id): Path<String>,
) -> Result<Json<FileInfo>, AppError> {
    let id = parse_id(&id)?;
    let info = state.service.info(&cancel, id).await?;
    if !access.read && !info.public {
        return Err(AppError::forbidden(format!("access to file `{}` denied", id)));
    }
    Ok(Json(info))
}

/// GET `/files/{id}/content`: file bytes; images may be resized and
/// transcoded through the query parameters.
pub async fn file_content(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Extension(cancel): Extension<CancellationToken>,
    Path(id): Path<String>,
    query: Result<Query<ContentQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let Query(q) = query?;

    let format = match q.format.as_deref().map(str::trim) {
        Some("") => return Err(AppError::bad_request("format must not be empty")),
        other => other.map(str::to_ascii_lowercase),
    };
    let cmd = ContentCommand {
        id: id.to_string(),
        width: parse_dimension("width", q.width.as_deref())?,
        height: parse_dimension("height", q.height.as_deref())?,
        format,
    };

    let data = state.service.content(&cancel, cmd, access).await?;
    Ok(content_response(data))
}

/// DELETE `/files/{id}`: remove a file. Unknown ids succeed.
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    Extension(cancel): Extension<CancellationToken>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_write(access)?;
    let id = parse_id(&id)?;
    state.service.delete(&cancel, id).await?;
    info!(id, "file deleted");
    Ok(StatusCode::OK)
}

fn require_write(access: Access) -> Result<(), AppError> {
    if access.write {
        Ok(())
    } else {
        Err(AppError::forbidden("write access required"))
    }
}

fn parse_id(raw: &str) -> Result<&str, AppError> {
    let id = raw.trim();
    if id.len() == ID_LEN {
        Ok(id)
    } else {
        Err(AppError::bad_request(format!(
            "id must be {} characters long",
            ID_LEN
        )))
    }
}

fn parse_dimension(name: &str, raw: Option<&str>) -> Result<Option<u32>, AppError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u32>() {
        Ok(value) if value >= MIN_CONTENT_DIMENSION => Ok(Some(value)),
        _ => Err(AppError::bad_request(format!(
            "{} must be an integer of at least {}",
            name, MIN_CONTENT_DIMENSION
        ))),
    }
}

fn content_response(data: Bytes) -> Response {
    let content_type = content_type_of(&data);
    let etag = format!("\"{:x}\"", md5::compute(&data));
    let length = data.len();

    let mut response = Response::new(Body::from(data));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    response
}
