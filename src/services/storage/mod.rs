//! Storage backends and the contract the file service relies on.

pub mod filesystem;
mod lease;
pub mod memory;

pub use self::filesystem::FileSystemStorage;
pub use self::memory::MemoryStorage;

use crate::{
    models::file::{ContentData, FileData, FileInfo},
    services::error::FileResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type StorageHandle = Arc<dyn Storage>;

/// Persistence of (content, [`FileInfo`]) pairs keyed by file id.
///
/// Every operation checks `cancel` on entry and fails with
/// [`Cancelled`](crate::services::error::FileError::Cancelled) if it has
/// fired. Nothing is retried internally.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &'static str;

    /// Create or replace the record for `record.id` and return the id.
    ///
    /// `record.content == None` keeps the stored bytes and only rewrites the
    /// metadata. Empty content is rejected.
    async fn upsert(&self, cancel: &CancellationToken, record: FileData) -> FileResult<String>;

    /// Metadata of a stored file.
    async fn info(&self, cancel: &CancellationToken, id: &str) -> FileResult<FileInfo>;

    /// Content stream of a stored file.
    async fn content(&self, cancel: &CancellationToken, id: &str) -> FileResult<ContentData>;

    /// Remove a file. Removing an unknown id succeeds.
    async fn delete(&self, cancel: &CancellationToken, id: &str) -> FileResult<()>;
}
