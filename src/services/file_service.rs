//! FileService: idempotent uploads and access-checked, image-aware reads on
//! top of whichever [`Storage`] backend is configured.
//!
//! The service keeps no state of its own between requests.

use crate::{
    models::{
        access::Access,
        file::{ContentCommand, FileData, FileInfo, UpdateCommand},
        image::{ImageFormat, ImageInfo},
    },
    services::{
        error::{FileError, FileResult, ensure_active},
        image_processor,
        storage::StorageHandle,
    },
};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::{io::AsyncReadExt, task};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub const MIN_CONTENT_DIMENSION: u32 = 10;
pub const MAX_CONTENT_DIMENSION: u32 = 10_000;

/// How images are normalised on upload and served by default.
#[derive(Clone, Copy, Debug)]
pub struct ImageSettings {
    pub format: ImageFormat,
    /// Bounding box edge used on upload and as the default on reads.
    pub max_dimension: u32,
}

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub struct FileService {
    storage: StorageHandle,
    image: ImageSettings,
}

impl FileService {
    pub fn new(storage: StorageHandle, image: ImageSettings) -> Self {
        Self { storage, image }
    }

    pub fn storage_name(&self) -> &'static str {
        self.storage.name()
    }

    /// Store file content and metadata; returns the file id.
    ///
    /// Resubmitting content whose hash matches either the original upload or
    /// the stored (processed) copy only refreshes metadata and visibility.
    pub async fn update(&self, cancel: &CancellationToken, cmd: UpdateCommand) -> FileResult<String> {
        ensure_active(cancel)?;

        let prior = if cmd.id.is_empty() {
            None
        } else {
            match self.storage.info(cancel, &cmd.id).await {
                Ok(info) => Some(info),
                Err(FileError::NotFound(_)) => None,
                Err(err) => return Err(err),
            }
        };
        let id = if cmd.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            cmd.id.clone()
        };

        let mut rewrite = true;
        let mut created_at = Utc::now();
        if let Some(prior) = &prior {
            rewrite = cmd.hash != prior.hash_source && cmd.hash != prior.hash_stored;
            created_at = prior.created_at;
        }

        let mut content = cmd.content.clone();
        let mut hash_stored = String::new();
        let mut image_info: Option<ImageInfo> = None;
        if rewrite && cmd.is_image {
            let processed = self
                .process(cmd.content.clone(), self.image.format.as_str(), self.image.max_dimension, self.image.max_dimension)
                .await?;
            hash_stored = content_hash(&processed.data);
            if let Some(prior) = &prior {
                rewrite = prior.hash_stored != hash_stored;
            }
            content = processed.data;
            image_info = Some(processed.info);
        }

        let record = match (rewrite, prior) {
            (false, Some(prior)) => {
                debug!(%id, "content unchanged, updating metadata only");
                FileData {
                    id,
                    content: None,
                    hash_source: prior.hash_source,
                    hash_stored: prior.hash_stored,
                    public: cmd.public,
                    is_image: prior.is_image,
                    file_size: prior.file_size,
                    format: prior.format,
                    width: prior.width,
                    height: prior.height,
                    metadata: cmd.metadata,
                    created_at,
                    updated_at: Utc::now(),
                }
            }
            _ => FileData {
                id,
                file_size: content.len() as u64,
                content: Some(content),
                hash_source: cmd.hash,
                hash_stored,
                public: cmd.public,
                is_image: cmd.is_image,
                format: image_info.map(|info| info.format),
                width: image_info.map_or(0, |info| info.width),
                height: image_info.map_or(0, |info| info.height),
                metadata: cmd.metadata,
                created_at,
                updated_at: Utc::now(),
            },
        };

        self.storage.upsert(cancel, record).await
    }

    /// File bytes, transcoded and resized when the file is an image.
    ///
    /// Callers without unrestricted read access only see public files.
    pub async fn content(
        &self,
        cancel: &CancellationToken,
        cmd: ContentCommand,
        access: Access,
    ) -> FileResult<Bytes> {
        ensure_active(cancel)?;

        if !access.read {
            let info = self.storage.info(cancel, &cmd.id).await?;
            if !info.public {
                return Err(FileError::AccessDenied(cmd.id));
            }
        }

        let width = self.dimension("width", cmd.width)?;
        let height = self.dimension("height", cmd.height)?;
        let format = match cmd.format.as_deref() {
            None => self.image.format,
            Some(tag) => ImageFormat::from_tag(tag)
                .filter(ImageFormat::is_output)
                .ok_or_else(|| FileError::UnsupportedFormat(tag.to_string()))?,
        };

        let stored = self.storage.content(cancel, &cmd.id).await?;
        let is_image = stored.is_image;
        let mut reader = stored.reader;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(FileError::io("read content", &cmd.id))?;
        drop(reader);

        let data = Bytes::from(buf);
        if !is_image {
            return Ok(data);
        }
        Ok(self.process(data, format.as_str(), width, height).await?.data)
    }

    pub async fn info(&self, cancel: &CancellationToken, id: &str) -> FileResult<FileInfo> {
        ensure_active(cancel)?;
        self.storage.info(cancel, id).await
    }

    pub async fn delete(&self, cancel: &CancellationToken, id: &str) -> FileResult<()> {
        ensure_active(cancel)?;
        self.storage.delete(cancel, id).await
    }

    fn dimension(&self, name: &'static str, requested: Option<u32>) -> FileResult<u32> {
        match requested {
            None => Ok(self.image.max_dimension),
            Some(value) if (MIN_CONTENT_DIMENSION..=MAX_CONTENT_DIMENSION).contains(&value) => {
                Ok(value)
            }
            Some(value) => Err(FileError::ParameterOutOfRange {
                name,
                value,
                min: MIN_CONTENT_DIMENSION,
                max: MAX_CONTENT_DIMENSION,
            }),
        }
    }

    async fn process(
        &self,
        data: Bytes,
        format: &str,
        width: u32,
        height: u32,
    ) -> FileResult<image_processor::Processed> {
        let format = format.to_string();
        task::spawn_blocking(move || image_processor::process(data, &format, width, height)).await?
    }
}
