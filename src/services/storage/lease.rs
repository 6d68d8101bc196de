//! Per-object lease files.
//!
//! A lease is `<id>.lock` next to the object's files, holding the RFC 3339
//! instant it expires at. Creating it exclusively grants the holder sole
//! write access to that object across every process sharing the storage
//! root. A lease past its expiry is considered abandoned and may be taken
//! over. Acquisition never waits: a live lease fails with `Locked`.

use crate::services::error::{FileError, FileResult};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

const LEASE_SUFFIX: &str = "lock";
const TAKEOVER_SUFFIX: &str = "steal";

/// Path of the lease file for `id` inside its shard directory.
pub(crate) fn lease_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.{}", id, LEASE_SUFFIX))
}

/// Marker serialising takeovers of an abandoned lease.
fn takeover_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.{}.{}", id, LEASE_SUFFIX, TAKEOVER_SUFFIX))
}

/// A held lease. Call [`Lease::release`] once the guarded work is done.
#[derive(Debug)]
pub(crate) struct Lease {
    id: String,
    path: PathBuf,
}

impl Lease {
    /// Take the lease for `id`, reclaiming it if the previous holder's
    /// expiry has passed.
    pub(crate) async fn acquire(dir: &Path, id: &str, lifetime: TimeDelta) -> FileResult<Self> {
        let path = lease_path(dir, id);
        let now = Utc::now();

        let file = match create_exclusive(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                match recorded_expiry(&path, lifetime).await? {
                    Some(expires_at) if now < expires_at => {
                        return Err(FileError::Locked(id.to_string()));
                    }
                    _ => take_over(dir, id, &path, lifetime).await?,
                }
            }
            Err(err) => return Err(FileError::io("create lease", &path)(err)),
        };

        let lease = Self {
            id: id.to_string(),
            path,
        };
        if let Err(err) = lease.stamp(file, expiry_after(now, lifetime)).await {
            lease.release().await;
            return Err(err);
        }

        debug!(id, "lease acquired");
        Ok(lease)
    }

    async fn stamp(&self, mut file: File, expires_at: DateTime<Utc>) -> FileResult<()> {
        let stamp = expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        file.write_all(stamp.as_bytes())
            .await
            .map_err(FileError::io("write lease", &self.path))?;
        file.sync_all()
            .await
            .map_err(FileError::io("sync lease", &self.path))
    }

    /// Remove the lease file. Failures are logged and otherwise ignored: an
    /// orphaned lease expires on its own.
    pub(crate) async fn release(self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => debug!(id = %self.id, "lease released"),
            Err(err) => warn!(id = %self.id, error = %err, "unlock failed"),
        }
    }
}

async fn create_exclusive(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

fn expiry_after(instant: DateTime<Utc>, lifetime: TimeDelta) -> DateTime<Utc> {
    instant
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Replace an abandoned lease with our own.
///
/// Only the holder of the takeover marker may remove a lease, and it checks
/// the expiry again once it holds the marker, so two contenders that both
/// saw the same expired lease cannot both end up holding it.
async fn take_over(dir: &Path, id: &str, path: &Path, lifetime: TimeDelta) -> FileResult<File> {
    let marker = takeover_path(dir, id);
    match create_exclusive(&marker).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            clear_abandoned_marker(&marker, lifetime).await;
            return Err(FileError::Locked(id.to_string()));
        }
        Err(err) => return Err(FileError::io("create takeover marker", &marker)(err)),
    }

    let result = replace_expired(id, path, lifetime).await;
    if let Err(err) = fs::remove_file(&marker).await {
        warn!(id, error = %err, "takeover marker not removed");
    }
    result
}

async fn replace_expired(id: &str, path: &Path, lifetime: TimeDelta) -> FileResult<File> {
    match recorded_expiry(path, lifetime).await? {
        Some(expires_at) if Utc::now() < expires_at => {
            return Err(FileError::Locked(id.to_string()));
        }
        Some(expires_at) => {
            warn!(id, expired_at = %expires_at, "reclaiming abandoned lease");
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(FileError::io("remove stale lease", path)(err)),
            }
        }
        // Released meanwhile; a new holder can only appear through create_new.
        None => {}
    }

    create_exclusive(path).await.map_err(|err| {
        if err.kind() == ErrorKind::AlreadyExists {
            FileError::Locked(id.to_string())
        } else {
            FileError::io("create lease", path)(err)
        }
    })
}

/// Remove a takeover marker left behind by a crashed contender. The caller
/// still reports `Locked`; the next attempt can proceed.
async fn clear_abandoned_marker(marker: &Path, lifetime: TimeDelta) {
    let Ok(modified) = fs::metadata(marker).await.and_then(|meta| meta.modified()) else {
        return;
    };
    if expiry_after(DateTime::<Utc>::from(modified), lifetime) <= Utc::now() {
        match fs::remove_file(marker).await {
            Ok(()) => warn!(path = %marker.display(), "removed abandoned takeover marker"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %marker.display(), error = %err, "takeover marker not removed"),
        }
    }
}

/// Expiry written by the current holder, `None` if the lease is gone.
/// When the content is unreadable (holder crashed mid-write, or has not
/// stamped it yet), the file's modification time plus the lease lifetime
/// stands in for it.
async fn recorded_expiry(path: &Path, lifetime: TimeDelta) -> FileResult<Option<DateTime<Utc>>> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(FileError::io("read lease", path)(err)),
    };

    if let Ok(expires_at) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Ok(Some(expires_at.with_timezone(&Utc)));
    }

    let modified = match fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(FileError::io("stat lease", path)(err)),
    };
    Ok(Some(expiry_after(DateTime::<Utc>::from(modified), lifetime)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const ID: &str = "abcdef0123";

    #[tokio::test]
    async fn acquire_writes_expiry_and_release_removes_it() {
        let dir = TempDir::new().unwrap();
        let lease = Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(lease_path(dir.path(), ID)).unwrap();
        let expires_at = DateTime::parse_from_rfc3339(&raw).unwrap();
        assert!(expires_at.with_timezone(&Utc) > Utc::now());

        lease.release().await;
        assert!(!lease_path(dir.path(), ID).exists());
    }

    #[tokio::test]
    async fn live_lease_is_not_stolen() {
        let dir = TempDir::new().unwrap();
        let held = Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap();

        let err = Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Locked(id) if id == ID));

        held.release().await;
        Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap()
            .release()
            .await;
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let past = (Utc::now() - TimeDelta::minutes(5)).to_rfc3339_opts(SecondsFormat::Secs, true);
        std::fs::write(lease_path(dir.path(), ID), past).unwrap();

        let lease = Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap();
        let raw = std::fs::read_to_string(lease_path(dir.path(), ID)).unwrap();
        assert!(DateTime::parse_from_rfc3339(&raw).unwrap().with_timezone(&Utc) > Utc::now());
        lease.release().await;
    }

    #[tokio::test]
    async fn corrupt_lease_falls_back_to_modification_time() {
        let dir = TempDir::new().unwrap();
        let path = lease_path(dir.path(), ID);

        // Fresh garbage: mtime + lifetime is still in the future.
        std::fs::write(&path, "garbage").unwrap();
        let err = Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Locked(_)));

        // Old garbage: considered abandoned.
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);

        Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap()
            .release()
            .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_takeover_of_expired_lease_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let past = (Utc::now() - TimeDelta::minutes(5)).to_rfc3339_opts(SecondsFormat::Secs, true);

        for round in 0..200 {
            std::fs::write(lease_path(dir.path(), ID), &past).unwrap();

            let contenders: Vec<_> = (0..2)
                .map(|_| {
                    let dir = dir.path().to_path_buf();
                    tokio::spawn(async move { Lease::acquire(&dir, ID, TimeDelta::seconds(30)).await })
                })
                .collect();

            let mut winners = Vec::new();
            for contender in contenders {
                match contender.await.unwrap() {
                    Ok(lease) => winners.push(lease),
                    Err(err) => assert!(matches!(err, FileError::Locked(_)), "{err}"),
                }
            }
            assert_eq!(winners.len(), 1, "round {round}");
            assert!(!takeover_path(dir.path(), ID).exists());
            for lease in winners {
                lease.release().await;
            }
        }
    }

    #[tokio::test]
    async fn abandoned_takeover_marker_is_cleared() {
        let dir = TempDir::new().unwrap();
        let past = (Utc::now() - TimeDelta::minutes(5)).to_rfc3339_opts(SecondsFormat::Secs, true);
        std::fs::write(lease_path(dir.path(), ID), past).unwrap();

        let marker = takeover_path(dir.path(), ID);
        let file = std::fs::File::create(&marker).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);

        let err = Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Locked(_)));
        assert!(!marker.exists());

        Lease::acquire(dir.path(), ID, TimeDelta::seconds(30))
            .await
            .unwrap()
            .release()
            .await;
    }
}
