//! FileSystemStorage: durable storage of file content and metadata on
//! local disk, sharded beneath `root/{id[0..2]}/{id[2..4]}/`.
//!
//! Per object the shard directory holds:
//! - `{id}.bin`: content bytes
//! - `{id}.meta.json`: the [`FileInfo`] record
//! - `{id}.lock`: a transient lease while a writer works on the object
//!
//! Writes go to a temporary file which is fsynced and renamed over the
//! final name; the shard directory is fsynced once both renames are done.
//! Content and metadata are two independent atomic replacements, a crash
//! between them can leave one updated and the other not.

use crate::{
    models::file::{ContentData, FileData, FileInfo},
    services::{
        error::{FileError, FileResult, ensure_active},
        storage::{
            Storage,
            lease::Lease,
        },
    },
};
use async_trait::async_trait;
use chrono::TimeDelta;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest id a shard path can be derived from.
pub const MIN_ID_LEN: usize = 6;

const CONTENT_SUFFIX: &str = "bin";
const META_SUFFIX: &str = "meta.json";
const TMP_SUFFIX: &str = "tmp";

#[derive(Clone, Debug)]
pub struct FileSystemStorage {
    /// Storage root shared by every process serving the same files.
    root: PathBuf,

    /// How long a lease stays valid; must comfortably exceed the slowest
    /// expected write.
    lease_lifetime: Duration,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>, lease_lifetime: Duration) -> Self {
        Self {
            root: root.into(),
            lease_lifetime,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lease_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.lease_lifetime).unwrap_or(TimeDelta::MAX)
    }

    /// Directory holding every file of `id`.
    ///
    /// Rejects ids too short to shard and ids that could escape the root.
    fn shard_dir(&self, id: &str) -> FileResult<PathBuf> {
        if id.chars().count() < MIN_ID_LEN {
            return Err(FileError::InvalidId(id.to_string()));
        }
        if id.contains("..")
            || id
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(FileError::InvalidId(id.to_string()));
        }

        let first: String = id.chars().take(2).collect();
        let second: String = id.chars().skip(2).take(2).collect();
        Ok(self.root.join(first).join(second))
    }

    fn content_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.{}", id, CONTENT_SUFFIX))
    }

    fn meta_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.{}", id, META_SUFFIX))
    }

    /// Write content (when present) and metadata while the lease is held.
    async fn write_record(&self, dir: &Path, record: &FileData) -> FileResult<()> {
        let content_path = Self::content_path(dir, &record.id);
        match &record.content {
            Some(content) => write_atomic(&content_path, content).await?,
            None => {
                if !fs::try_exists(&content_path)
                    .await
                    .map_err(FileError::io("stat content", &content_path))?
                {
                    return Err(FileError::InvalidFileData(format!(
                        "no stored content for `{}` to keep",
                        record.id
                    )));
                }
            }
        }

        let info = serde_json::to_vec_pretty(&FileInfo::from(record))?;
        write_atomic(&Self::meta_path(dir, &record.id), &info).await?;

        sync_dir(dir).await
    }

    /// Remove the content and metadata of `id` plus any temporaries an
    /// interrupted write left behind. The lease is left to its holder.
    async fn remove_files(&self, dir: &Path, id: &str) -> FileResult<()> {
        let content = Self::content_path(dir, id);
        let meta = Self::meta_path(dir, id);
        for path in [tmp_path(&content), tmp_path(&meta), content, meta] {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(FileError::io("remove file", path)(err)),
            }
        }

        sync_dir(dir).await
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn upsert(&self, cancel: &CancellationToken, record: FileData) -> FileResult<String> {
        ensure_active(cancel)?;
        let start = Instant::now();

        if matches!(&record.content, Some(content) if content.is_empty()) {
            return Err(FileError::InvalidFileData("empty content".into()));
        }
        let dir = self.shard_dir(&record.id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(FileError::io("create shard", &dir))?;

        let lease = Lease::acquire(&dir, &record.id, self.lease_delta()).await?;
        let result = self.write_record(&dir, &record).await;
        lease.release().await;
        result?;

        let elapsed = start.elapsed();
        if elapsed >= self.lease_lifetime {
            warn!(
                id = %record.id,
                duration = ?elapsed,
                threshold = ?self.lease_lifetime,
                file_size = record.file_size,
                "long upsert call"
            );
        }

        Ok(record.id)
    }

    async fn info(&self, cancel: &CancellationToken, id: &str) -> FileResult<FileInfo> {
        ensure_active(cancel)?;
        if id.is_empty() {
            return Err(FileError::InvalidId(id.to_string()));
        }
        let path = Self::meta_path(&self.shard_dir(id)?, id);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FileError::NotFound(id.to_string()));
            }
            Err(err) => return Err(FileError::io("read metadata", path)(err)),
        };

        serde_json::from_slice(&raw).map_err(|err| {
            warn!(id, error = %err, "unreadable metadata record");
            FileError::NotFound(id.to_string())
        })
    }

    async fn content(&self, cancel: &CancellationToken, id: &str) -> FileResult<ContentData> {
        let info = self.info(cancel, id).await?;
        let path = Self::content_path(&self.shard_dir(id)?, id);

        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                FileError::NotFound(id.to_string())
            } else {
                FileError::io("open content", &path)(err)
            }
        })?;

        Ok(ContentData {
            reader: Box::new(file),
            is_image: info.is_image,
        })
    }

    async fn delete(&self, cancel: &CancellationToken, id: &str) -> FileResult<()> {
        ensure_active(cancel)?;
        if id.is_empty() {
            return Err(FileError::InvalidId(id.to_string()));
        }
        let dir = self.shard_dir(id)?;

        match fs::metadata(&dir).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(id, "shard directory missing, nothing to delete");
                return Ok(());
            }
            Err(err) => return Err(FileError::io("stat shard", dir)(err)),
        }

        let lease = Lease::acquire(&dir, id, self.lease_delta()).await?;
        let result = self.remove_files(&dir, id).await;
        lease.release().await;
        result
    }
}

/// Replace `path` with `data` via a fsynced temporary file and a rename.
async fn write_atomic(path: &Path, data: &[u8]) -> FileResult<()> {
    let tmp_path = tmp_path(path);

    if let Err(err) = write_synced(&tmp_path, data).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(FileError::io("rename", path)(err));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", TMP_SUFFIX));
    PathBuf::from(name)
}

async fn write_synced(path: &Path, data: &[u8]) -> FileResult<()> {
    let mut file = File::create(path)
        .await
        .map_err(FileError::io("create", path))?;
    file.write_all(data)
        .await
        .map_err(FileError::io("write", path))?;
    file.flush().await.map_err(FileError::io("flush", path))?;
    file.sync_all().await.map_err(FileError::io("sync", path))
}

/// Persist directory entry changes (renames, removals).
async fn sync_dir(dir: &Path) -> FileResult<()> {
    let handle = File::open(dir)
        .await
        .map_err(FileError::io("open shard", dir))?;
    handle
        .sync_all()
        .await
        .map_err(FileError::io("sync shard", dir))
}
