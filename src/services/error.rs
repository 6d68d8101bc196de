use std::{io, path::PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failures of the storage backends, the image processor and the file
/// service.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("invalid file id `{0}`")]
    InvalidId(String),
    #[error("invalid file data: {0}")]
    InvalidFileData(String),
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("file `{0}` is locked by another writer")]
    Locked(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("unsupported image format `{0}`")]
    UnsupportedFormat(String),
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("access to file `{0}` denied")]
    AccessDenied(String),
    #[error("{name} must be between {min} and {max}, got {value}")]
    ParameterOutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("{op} `{}`: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type FileResult<T> = Result<T, FileError>;

impl FileError {
    /// Build a `map_err` adapter that tags an I/O error with the operation
    /// and path it came from.
    pub fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }
}

/// Fail fast when the caller has already given up on the request.
///
/// Only checked at operation entry; a running syscall is never interrupted.
pub fn ensure_active(cancel: &CancellationToken) -> FileResult<()> {
    if cancel.is_cancelled() {
        Err(FileError::Cancelled)
    } else {
        Ok(())
    }
}
