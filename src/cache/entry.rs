//! Metadata sidecar describing what a kind's local cache holds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Kind, VersionId};

/// The versions materialized in a kind's cache files.
///
/// Written last, after both blobs are in place, so its presence means the
/// pair on disk is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub kind: Kind,
    pub index_version: VersionId,
    pub mapping_version: VersionId,
    /// When the blobs were written locally
    pub fetched_at: DateTime<Utc>,
    /// When the versions were last compared against the store
    pub checked_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(kind: Kind, index_version: VersionId, mapping_version: VersionId) -> Self {
        let now = Utc::now();
        Self {
            kind,
            index_version,
            mapping_version,
            fetched_at: now,
            checked_at: now,
        }
    }

    /// True when more than `interval` has passed since the last check.
    ///
    /// A zero interval is always due.
    pub fn revalidation_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let elapsed = (now - self.checked_at).to_std().unwrap_or_default();
        elapsed >= interval
    }

    /// True when the store's latest versions are the ones cached here.
    pub fn matches(&self, index: Option<&VersionId>, mapping: Option<&VersionId>) -> bool {
        index == Some(&self.index_version) && mapping == Some(&self.mapping_version)
    }

    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.checked_at = now;
    }
}
