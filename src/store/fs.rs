//! Filesystem-backed artifact store.
//!
//! # Layout
//!
//! ```text
//! <root>/<key>/versions/<version>.blob   immutable uploads
//! <root>/<key>/LATEST                    pointer file holding one version id
//! <root>/<key>/LATEST.lock               lock file, never removed
//! ```
//!
//! Blobs and the pointer are written to a temp file in the same directory
//! and renamed into place, so readers never see partial content. Promotes
//! hold an OS exclusive lock on `LATEST.lock`, which makes `promote_if` a
//! real compare-and-swap across processes sharing the root. The kernel drops
//! the lock when its holder exits, so a crashed promote leaves nothing stuck.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::{Artifact, ArtifactStore, StoreError, validate_key};
use crate::types::VersionId;

const LATEST_FILE: &str = "LATEST";
const LOCK_FILE: &str = "LATEST.lock";
const VERSIONS_DIR: &str = "versions";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FsArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root, lock_timeout })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn blob_path(&self, key: &str, version: &VersionId) -> PathBuf {
        self.key_dir(key)
            .join(VERSIONS_DIR)
            .join(format!("{}.blob", version.as_str()))
    }

    fn read_latest(&self, key: &str) -> Result<Option<VersionId>, StoreError> {
        match fs::read_to_string(self.key_dir(key).join(LATEST_FILE)) {
            Ok(content) => {
                let id = content.trim();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(VersionId::new(id)))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(key, source)),
        }
    }

    fn write_latest(&self, key: &str, version: &VersionId) -> Result<(), StoreError> {
        let dir = self.key_dir(key);
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| io_error(key, e))?;
        tmp.write_all(version.as_str().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| io_error(key, e))?;
        tmp.persist(dir.join(LATEST_FILE))
            .map_err(|e| io_error(key, e.error))?;
        Ok(())
    }

    fn ensure_version_exists(&self, key: &str, version: &VersionId) -> Result<(), StoreError> {
        if self.blob_path(key, version).is_file() {
            Ok(())
        } else {
            Err(StoreError::UnknownVersion {
                key: key.to_string(),
                version: version.clone(),
            })
        }
    }

    fn lock(&self, key: &str) -> Result<PromoteLock, StoreError> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).map_err(|e| io_error(key, e))?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| io_error(key, e))?;
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(PromoteLock { file }),
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout {
                            key: key.to_string(),
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(source) => return Err(io_error(key, source)),
            }
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Releases the exclusive lock when dropped. The file itself stays.
struct PromoteLock {
    file: File,
}

impl Drop for PromoteLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release promote lock: {e}");
        }
    }
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

fn mint_version(bytes: &[u8]) -> VersionId {
    let digest = format!("{:x}", Sha256::digest(bytes));
    VersionId::new(format!(
        "{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%6fZ"),
        &digest[..12]
    ))
}

impl ArtifactStore for FsArtifactStore {
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<VersionId, StoreError> {
        validate_key(key)?;
        let versions_dir = self.key_dir(key).join(VERSIONS_DIR);
        fs::create_dir_all(&versions_dir).map_err(|e| io_error(key, e))?;

        let version = mint_version(bytes);
        let mut tmp = NamedTempFile::new_in(&versions_dir).map_err(|e| io_error(key, e))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| io_error(key, e))?;
        tmp.persist(self.blob_path(key, &version))
            .map_err(|e| io_error(key, e.error))?;

        tracing::debug!(key, version = %version, bytes = bytes.len(), "uploaded artifact");
        Ok(version)
    }

    fn promote(&self, key: &str, version: &VersionId) -> Result<(), StoreError> {
        validate_key(key)?;
        let _lock = self.lock(key)?;
        self.ensure_version_exists(key, version)?;
        self.write_latest(key, version)
    }

    fn promote_if(
        &self,
        key: &str,
        version: &VersionId,
        expected: Option<&VersionId>,
    ) -> Result<(), StoreError> {
        validate_key(key)?;
        let _lock = self.lock(key)?;
        let actual = self.read_latest(key)?;
        if actual.as_ref() != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.cloned(),
                actual,
            });
        }
        self.ensure_version_exists(key, version)?;
        self.write_latest(key, version)
    }

    fn download_latest(&self, key: &str) -> Result<Artifact, StoreError> {
        validate_key(key)?;
        let version = self.read_latest(key)?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        let bytes = fs::read(self.blob_path(key, &version)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::UnknownVersion {
                    key: key.to_string(),
                    version: version.clone(),
                }
            } else {
                io_error(key, e)
            }
        })?;
        Ok(Artifact { version, bytes })
    }

    fn latest_version(&self, key: &str) -> Result<Option<VersionId>, StoreError> {
        validate_key(key)?;
        self.read_latest(key)
    }
}
