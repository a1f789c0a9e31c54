//! In-process artifact store.
//!
//! Shared through an `Arc`, one `MemoryArtifactStore` stands in for the
//! remote store seen by several simulated worker processes, each with its
//! own cache directory. Failures can be injected per operation and key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{Artifact, ArtifactStore, StoreError, validate_key};
use crate::types::VersionId;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Upload,
    Promote,
    Download,
}

impl StoreOp {
    fn name(&self) -> &'static str {
        match self {
            StoreOp::Upload => "upload",
            StoreOp::Promote => "promote",
            StoreOp::Download => "download",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredVersion {
    id: VersionId,
    uploaded_at: DateTime<Utc>,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct KeyState {
    versions: Vec<StoredVersion>,
    latest: Option<VersionId>,
}

impl KeyState {
    fn find(&self, version: &VersionId) -> Option<&StoredVersion> {
        self.versions.iter().find(|v| &v.id == version)
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    key: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    keys: Mutex<HashMap<String, KeyState>>,
    faults: Mutex<Vec<Fault>>,
    next_version: AtomicU64,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `op` on `key` (or on any key when `None`) fail until
    /// [`clear_failures`](Self::clear_failures) is called.
    pub fn inject_failure(&self, op: StoreOp, key: Option<&str>) {
        self.faults.lock().push(Fault {
            op,
            key: key.map(str::to_string),
        });
    }

    pub fn clear_failures(&self) {
        self.faults.lock().clear();
    }

    /// All uploaded versions of `key`, oldest first, promoted or not.
    #[must_use]
    pub fn versions(&self, key: &str) -> Vec<VersionId> {
        self.keys
            .lock()
            .get(key)
            .map(|state| state.versions.iter().map(|v| v.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Upload time of a stored version.
    #[must_use]
    pub fn uploaded_at(&self, key: &str, version: &VersionId) -> Option<DateTime<Utc>> {
        self.keys
            .lock()
            .get(key)
            .and_then(|state| state.find(version).map(|v| v.uploaded_at))
    }

    fn check_fault(&self, op: StoreOp, key: &str) -> Result<(), StoreError> {
        let faults = self.faults.lock();
        let hit = faults
            .iter()
            .any(|f| f.op == op && f.key.as_deref().is_none_or(|k| k == key));
        if hit {
            return Err(StoreError::Unavailable {
                operation: op.name(),
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<VersionId, StoreError> {
        validate_key(key)?;
        self.check_fault(StoreOp::Upload, key)?;

        let n = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let id = VersionId::new(format!("v{n:06}"));
        self.keys
            .lock()
            .entry(key.to_string())
            .or_default()
            .versions
            .push(StoredVersion {
                id: id.clone(),
                uploaded_at: Utc::now(),
                bytes: bytes.to_vec(),
            });
        Ok(id)
    }

    fn promote(&self, key: &str, version: &VersionId) -> Result<(), StoreError> {
        validate_key(key)?;
        self.check_fault(StoreOp::Promote, key)?;

        let mut keys = self.keys.lock();
        let state = keys.entry(key.to_string()).or_default();
        if state.find(version).is_none() {
            return Err(StoreError::UnknownVersion {
                key: key.to_string(),
                version: version.clone(),
            });
        }
        state.latest = Some(version.clone());
        Ok(())
    }

    fn promote_if(
        &self,
        key: &str,
        version: &VersionId,
        expected: Option<&VersionId>,
    ) -> Result<(), StoreError> {
        validate_key(key)?;
        self.check_fault(StoreOp::Promote, key)?;

        let mut keys = self.keys.lock();
        let state = keys.entry(key.to_string()).or_default();
        if state.latest.as_ref() != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.cloned(),
                actual: state.latest.clone(),
            });
        }
        if state.find(version).is_none() {
            return Err(StoreError::UnknownVersion {
                key: key.to_string(),
                version: version.clone(),
            });
        }
        state.latest = Some(version.clone());
        Ok(())
    }

    fn download_latest(&self, key: &str) -> Result<Artifact, StoreError> {
        validate_key(key)?;
        self.check_fault(StoreOp::Download, key)?;

        let keys = self.keys.lock();
        let state = keys.get(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        let latest = state.latest.as_ref().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        let stored = state
            .find(latest)
            .ok_or_else(|| StoreError::UnknownVersion {
                key: key.to_string(),
                version: latest.clone(),
            })?;
        Ok(Artifact {
            version: stored.id.clone(),
            bytes: stored.bytes.clone(),
        })
    }

    fn latest_version(&self, key: &str) -> Result<Option<VersionId>, StoreError> {
        validate_key(key)?;
        self.check_fault(StoreOp::Download, key)?;
        Ok(self.keys.lock().get(key).and_then(|s| s.latest.clone()))
    }
}
