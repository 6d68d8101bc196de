//! Represents a stored file: its content, the derived image fields and the
//! caller supplied metadata.

use crate::models::image::ImageFormat;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tokio::io::AsyncRead;

/// A single metadata value. Only scalars are accepted; anything else fails
/// to deserialize. Integers are kept apart from floats so they round-trip
/// without a fractional part.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

/// Caller supplied key/value pairs attached to a file.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Full write-side record handed to a storage backend.
#[derive(Clone, Debug, Default)]
pub struct FileData {
    /// Object identifier.
    pub id: String,

    /// Bytes to persist. `None` keeps the content already stored for `id`
    /// and only rewrites the metadata record.
    pub content: Option<Bytes>,

    /// SHA-256 of the bytes as the caller submitted them.
    pub hash_source: String,

    /// SHA-256 of the bytes actually persisted after image processing.
    /// Empty for non-image content.
    pub hash_stored: String,

    /// Whether the file can be read without elevated rights.
    pub public: bool,

    pub is_image: bool,

    /// Length of the persisted content in bytes.
    pub file_size: u64,

    /// Stored image encoding, `None` for non-image content.
    pub format: Option<ImageFormat>,

    pub width: u32,
    pub height: u32,

    pub metadata: Metadata,

    /// Set on first write and carried over by every later update.
    pub created_at: DateTime<Utc>,

    /// Refreshed by every successful write.
    pub updated_at: DateTime<Utc>,
}

/// Read-side projection of [`FileData`] without the content bytes.
///
/// This is also the on-disk metadata record of the filesystem backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileInfo {
    pub id: String,
    pub hash_source: String,
    pub hash_stored: String,
    pub public: bool,
    pub file_size: u64,
    pub is_image: bool,
    #[serde(default)]
    pub format: Option<ImageFormat>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FileData> for FileInfo {
    fn from(data: &FileData) -> Self {
        Self {
            id: data.id.clone(),
            hash_source: data.hash_source.clone(),
            hash_stored: data.hash_stored.clone(),
            public: data.public,
            file_size: data.file_size,
            is_image: data.is_image,
            format: data.format,
            width: data.width,
            height: data.height,
            metadata: data.metadata.clone(),
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }
}

/// Owned, type-erased content reader.
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content stream returned by a storage backend.
///
/// The caller owns the reader; dropping it releases the underlying handle.
pub struct ContentData {
    pub reader: ContentReader,
    pub is_image: bool,
}

impl fmt::Debug for ContentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentData")
            .field("is_image", &self.is_image)
            .finish_non_exhaustive()
    }
}

/// Input of [`FileService::update`](crate::services::file_service::FileService::update).
#[derive(Clone, Debug, Default)]
pub struct UpdateCommand {
    /// Target id; empty means "assign a new one".
    pub id: String,
    pub content: Bytes,
    /// SHA-256 (lowercase hex) of `content`, already verified by the caller.
    pub hash: String,
    pub public: bool,
    pub is_image: bool,
    pub metadata: Metadata,
}

/// Input of [`FileService::content`](crate::services::file_service::FileService::content).
#[derive(Clone, Debug, Default)]
pub struct ContentCommand {
    pub id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_projection_owns_its_metadata() {
        let mut data = FileData {
            id: "abcdef".into(),
            content: Some(Bytes::from_static(b"payload")),
            file_size: 7,
            ..Default::default()
        };
        data.metadata
            .insert("owner".into(), MetadataValue::String("alice".into()));

        let info = FileInfo::from(&data);
        data.metadata
            .insert("owner".into(), MetadataValue::String("mallory".into()));

        assert_eq!(
            info.metadata.get("owner"),
            Some(&MetadataValue::String("alice".into()))
        );
        assert_eq!(info.file_size, 7);
    }

    #[test]
    fn metadata_accepts_only_scalars() {
        let ok: Metadata =
            serde_json::from_str(r#"{"a": "x", "b": true, "c": 1.5}"#).unwrap();
        assert_eq!(ok.get("b"), Some(&MetadataValue::Bool(true)));
        assert_eq!(ok.get("c"), Some(&MetadataValue::Number(1.5)));

        assert!(serde_json::from_str::<Metadata>(r#"{"a": null}"#).is_err());
        assert!(serde_json::from_str::<Metadata>(r#"{"a": [1, 2]}"#).is_err());
        assert!(serde_json::from_str::<Metadata>(r#"{"a": {"b": 1}}"#).is_err());
    }

    #[test]
    fn integers_keep_their_form() {
        let parsed: Metadata = serde_json::from_str(r#"{"pages": 12, "ratio": 0.5}"#).unwrap();
        assert_eq!(parsed.get("pages"), Some(&MetadataValue::Integer(12)));
        assert_eq!(parsed.get("ratio"), Some(&MetadataValue::Number(0.5)));
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#"{"pages":12,"ratio":0.5}"#
        );
    }
}
