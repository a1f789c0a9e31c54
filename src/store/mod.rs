//! Durable, versioned artifact storage.
//!
//! An artifact store keeps every uploaded blob as an immutable version and
//! one mutable "latest" pointer per key. Uploading never changes what
//! readers see; only a promote does. Each kind uses two keys, `<kind>` for
//! the index blob and `<kind>_mapping` for the label mapping blob.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::{MemoryArtifactStore, StoreOp};

use thiserror::Error;

use crate::types::VersionId;

/// A downloaded blob together with the version it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub version: VersionId,
    pub bytes: Vec<u8>,
}

/// Contract consumed by the cache and publish path.
///
/// Implementations must make `promote` atomic for readers: a download either
/// sees the old latest or the new one, never a mix.
pub trait ArtifactStore: Send + Sync {
    /// Stores `bytes` as a new immutable version of `key`.
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<VersionId, StoreError>;

    /// Points `key`'s latest at `version` unconditionally.
    fn promote(&self, key: &str, version: &VersionId) -> Result<(), StoreError>;

    /// Points `key`'s latest at `version` only if latest currently equals
    /// `expected` (`None` meaning nothing has been promoted yet).
    ///
    /// Returns [`StoreError::Conflict`] when latest has moved.
    fn promote_if(
        &self,
        key: &str,
        version: &VersionId,
        expected: Option<&VersionId>,
    ) -> Result<(), StoreError>;

    /// Downloads the blob `key`'s latest pointer refers to.
    fn download_latest(&self, key: &str) -> Result<Artifact, StoreError>;

    /// Returns the version `key`'s latest points at, without the blob.
    fn latest_version(&self, key: &str) -> Result<Option<VersionId>, StoreError>;
}

/// Errors specific to artifact store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No version of '{key}' has been promoted")]
    NotFound { key: String },

    #[error("Version '{version}' of '{key}' does not exist")]
    UnknownVersion { key: String, version: VersionId },

    #[error("Latest of '{key}' moved: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<VersionId>,
        actual: Option<VersionId>,
    },

    #[error("Invalid artifact key '{0}': use lowercase letters, digits, '_' or '-'")]
    InvalidKey(String),

    #[error("Timed out waiting for the promote lock on '{key}'")]
    LockTimeout { key: String },

    #[error("Store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store unavailable during {operation} of '{key}': {reason}")]
    Unavailable {
        operation: &'static str,
        key: String,
        reason: String,
    },
}

impl StoreError {
    /// True for the optimistic-concurrency rejection.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("company").is_ok());
        assert!(validate_key("item_description_mapping").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("Company").is_err());
    }
}
