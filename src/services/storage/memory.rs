//! In-memory storage, for tests and local development only.

use crate::{
    models::file::{ContentData, FileData, FileInfo},
    services::{
        error::{FileError, FileResult, ensure_active},
        storage::Storage,
    },
};
use async_trait::async_trait;
use std::{collections::HashMap, io::Cursor};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Map of records behind one read/write lock.
///
/// Records are cloned on the way in and out, so callers never share state
/// with the store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, FileData>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "inmemory"
    }

    async fn upsert(&self, cancel: &CancellationToken, mut record: FileData) -> FileResult<String> {
        ensure_active(cancel)?;
        if record.id.trim().is_empty() {
            return Err(FileError::InvalidId(record.id));
        }
        if matches!(&record.content, Some(content) if content.is_empty()) {
            return Err(FileError::InvalidFileData("empty content".into()));
        }

        let mut files = self.files.write().await;
        if record.content.is_none() {
            let previous = files
                .get(&record.id)
                .and_then(|stored| stored.content.clone())
                .ok_or_else(|| {
                    FileError::InvalidFileData(format!("no stored content for `{}` to keep", record.id))
                })?;
            record.content = Some(previous);
        }

        let id = record.id.clone();
        files.insert(id.clone(), record);
        Ok(id)
    }

    async fn info(&self, cancel: &CancellationToken, id: &str) -> FileResult<FileInfo> {
        ensure_active(cancel)?;
        let files = self.files.read().await;
        files
            .get(id)
            .map(FileInfo::from)
            .ok_or_else(|| FileError::NotFound(id.to_string()))
    }

    async fn content(&self, cancel: &CancellationToken, id: &str) -> FileResult<ContentData> {
        ensure_active(cancel)?;
        let files = self.files.read().await;
        let stored = files
            .get(id)
            .ok_or_else(|| FileError::NotFound(id.to_string()))?;

        let bytes = stored.content.as_deref().unwrap_or_default().to_vec();
        Ok(ContentData {
            reader: Box::new(Cursor::new(bytes)),
            is_image: stored.is_image,
        })
    }

    async fn delete(&self, cancel: &CancellationToken, id: &str) -> FileResult<()> {
        ensure_active(cancel)?;
        self.files.write().await.remove(id);
        Ok(())
    }
}
