//! Local on-disk materialization of each kind's latest version.
//!
//! # Layout
//!
//! ```text
//! <dir>/<kind>_index.vec      index blob
//! <dir>/<kind>_mapping.json   label mapping blob
//! <dir>/<kind>_entry.json     CacheEntry, removed first and written last
//! ```
//!
//! Every file is written to a temp file in `<dir>` and renamed into place.
//! A copy counts as complete only while its entry exists, so a refresh that
//! dies between the blob renames reads as a miss and is downloaded again.
//! [`LocalCache::publish`] is the only path that moves the store's latest
//! pointers.

mod entry;

pub use entry::CacheEntry;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::store::{ArtifactStore, StoreError};
use crate::types::{Kind, VersionId};
use crate::vector::{FlatIndex, LabelMapping};

/// What [`LocalCache::ensure_cached`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A complete local copy was already present
    Hit,
    /// Nothing usable was cached; latest was downloaded
    Downloaded,
    /// The store moved past the cached versions; latest was re-downloaded
    Refreshed,
}

/// Condition under which a publish may move the latest pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Promote whatever latest currently is
    Unconditional,
    /// Promote only if latest still points at the versions that were read
    Matches {
        index: VersionId,
        mapping: VersionId,
    },
}

impl Precondition {
    /// Precondition matching the versions a cache entry was built from.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Precondition::Matches {
            index: entry.index_version.clone(),
            mapping: entry.mapping_version.clone(),
        }
    }
}

/// Versions promoted by a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedVersions {
    pub index: VersionId,
    pub mapping: VersionId,
}

/// A kind's index and mapping as loaded from the local cache.
#[derive(Debug, Clone)]
pub struct CachedIndex {
    pub index: FlatIndex,
    pub mapping: LabelMapping,
    pub entry: CacheEntry,
}

pub struct LocalCache {
    dir: PathBuf,
    store: Arc<dyn ArtifactStore>,
    revalidate: Option<Duration>,
}

impl LocalCache {
    /// Opens (creating if needed) a cache rooted at `dir`.
    ///
    /// With `revalidate` set, [`ensure_cached`](Self::ensure_cached) compares
    /// the cached versions with the store's latest once that much time has
    /// passed since the previous comparison.
    pub fn new(
        dir: impl Into<PathBuf>,
        store: Arc<dyn ArtifactStore>,
        revalidate: Option<Duration>,
    ) -> SyncResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SyncError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            store,
            revalidate,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    fn index_path(&self, kind: Kind) -> PathBuf {
        self.dir.join(format!("{kind}_index.vec"))
    }

    fn mapping_path(&self, kind: Kind) -> PathBuf {
        self.dir.join(format!("{kind}_mapping.json"))
    }

    fn entry_path(&self, kind: Kind) -> PathBuf {
        self.dir.join(format!("{kind}_entry.json"))
    }

    /// Reads the cache entry, `None` when the kind has no complete local copy.
    pub fn entry(&self, kind: Kind) -> SyncResult<Option<CacheEntry>> {
        let path = self.entry_path(kind);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SyncError::Io { path, source }),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&content).map_err(|e| SyncError::CacheCorrupt {
                kind,
                artifact: "entry",
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if !self.index_path(kind).is_file() || !self.mapping_path(kind).is_file() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Guarantees a complete local copy of `kind` exists on return.
    ///
    /// Downloads the latest index and mapping when nothing usable is cached.
    /// When a revalidation is due and the store has moved, re-downloads. A
    /// failed revalidation keeps serving the local copy.
    pub fn ensure_cached(&self, kind: Kind) -> SyncResult<CacheStatus> {
        let entry = match self.entry(kind) {
            Ok(entry) => entry,
            Err(e @ SyncError::CacheCorrupt { .. }) => {
                warn!(%kind, "discarding unreadable cache entry: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        let Some(mut entry) = entry else {
            self.download(kind)?;
            return Ok(CacheStatus::Downloaded);
        };

        let Some(interval) = self.revalidate else {
            debug!(%kind, version = %entry.index_version, "cache hit");
            return Ok(CacheStatus::Hit);
        };

        let now = Utc::now();
        if !entry.revalidation_due(now, interval) {
            debug!(%kind, version = %entry.index_version, "cache hit");
            return Ok(CacheStatus::Hit);
        }

        match self.remote_versions(kind) {
            Ok((index, mapping)) if entry.matches(index.as_ref(), mapping.as_ref()) => {
                entry.mark_checked(now);
                if let Err(e) = self.write_entry(kind, &entry) {
                    warn!(%kind, "failed to record revalidation: {e}");
                }
                debug!(%kind, version = %entry.index_version, "cache hit, still latest");
                Ok(CacheStatus::Hit)
            }
            Ok((None, _)) | Ok((_, None)) => {
                warn!(%kind, "store has no latest version; serving local copy");
                Ok(CacheStatus::Hit)
            }
            Ok((Some(index), _)) => {
                info!(%kind, cached = %entry.index_version, latest = %index, "cache is stale");
                match self.download(kind) {
                    Ok(()) => Ok(CacheStatus::Refreshed),
                    Err(e @ SyncError::CacheUnavailable { .. }) => {
                        warn!(%kind, "refresh failed, serving local copy: {e}");
                        Ok(CacheStatus::Hit)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                warn!(%kind, "staleness check failed, serving local copy: {e}");
                Ok(CacheStatus::Hit)
            }
        }
    }

    fn remote_versions(
        &self,
        kind: Kind,
    ) -> Result<(Option<VersionId>, Option<VersionId>), StoreError> {
        let index = self.store.latest_version(&kind.index_key())?;
        let mapping = self.store.latest_version(&kind.mapping_key())?;
        Ok((index, mapping))
    }

    fn download(&self, kind: Kind) -> SyncResult<()> {
        let unavailable = |source| SyncError::CacheUnavailable { kind, source };
        let index = self
            .store
            .download_latest(&kind.index_key())
            .map_err(unavailable)?;
        let mapping = self
            .store
            .download_latest(&kind.mapping_key())
            .map_err(unavailable)?;

        let entry = CacheEntry::new(kind, index.version, mapping.version);
        self.write_local(kind, &index.bytes, &mapping.bytes, &entry)?;
        info!(
            %kind,
            index_version = %entry.index_version,
            mapping_version = %entry.mapping_version,
            "downloaded latest artifacts"
        );
        Ok(())
    }

    /// Deserializes what is on local disk, without contacting the store.
    ///
    /// Missing or undecodable files are reported as [`SyncError::CacheCorrupt`].
    pub fn load(&self, kind: Kind) -> SyncResult<CachedIndex> {
        let entry = self.entry(kind)?.ok_or_else(|| SyncError::CacheCorrupt {
            kind,
            artifact: "entry",
            path: self.entry_path(kind),
            reason: "no complete local copy".to_string(),
        })?;

        let index_path = self.index_path(kind);
        let bytes = fs::read(&index_path).map_err(|source| SyncError::Io {
            path: index_path.clone(),
            source,
        })?;
        let index = FlatIndex::from_bytes(&bytes).map_err(|e| SyncError::CacheCorrupt {
            kind,
            artifact: "index",
            path: index_path.clone(),
            reason: e.to_string(),
        })?;

        let mapping_path = self.mapping_path(kind);
        let bytes = fs::read(&mapping_path).map_err(|source| SyncError::Io {
            path: mapping_path.clone(),
            source,
        })?;
        let mapping = LabelMapping::from_bytes(&bytes).map_err(|e| SyncError::CacheCorrupt {
            kind,
            artifact: "mapping",
            path: mapping_path.clone(),
            reason: e.to_string(),
        })?;

        let report = mapping.desync_report(index.cardinality());
        if !report.is_clean() {
            warn!(
                %kind,
                cardinality = index.cardinality(),
                labels = mapping.len(),
                missing = report.missing,
                orphaned = report.orphaned,
                "index and mapping are out of sync; unlabeled ids will be skipped"
            );
        }

        Ok(CachedIndex {
            index,
            mapping,
            entry,
        })
    }

    /// [`ensure_cached`](Self::ensure_cached) followed by [`load`](Self::load).
    ///
    /// A corrupt local copy is discarded and downloaded once more.
    pub fn checkout(&self, kind: Kind) -> SyncResult<CachedIndex> {
        self.ensure_cached(kind)?;
        match self.load(kind) {
            Err(e @ SyncError::CacheCorrupt { .. }) => {
                warn!(%kind, "re-downloading corrupt cache: {e}");
                self.invalidate(kind)?;
                self.ensure_cached(kind)?;
                self.load(kind)
            }
            other => other,
        }
    }

    /// Removes the local copy of `kind`; the next operation downloads again.
    pub fn invalidate(&self, kind: Kind) -> SyncResult<()> {
        for path in [
            self.entry_path(kind),
            self.index_path(kind),
            self.mapping_path(kind),
        ] {
            remove_if_exists(&path)?;
        }
        debug!(%kind, "invalidated local cache");
        Ok(())
    }

    /// Uploads both blobs, promotes the index then the mapping, and refreshes
    /// the local copy.
    ///
    /// Nothing is promoted unless both uploads succeed. If the mapping promote
    /// fails after the index was promoted, the index pointer is moved back to
    /// its prior version. With [`Precondition::Matches`] either promote is
    /// rejected with [`SyncError::VersionConflict`] when latest has moved.
    pub fn publish(
        &self,
        kind: Kind,
        index: &FlatIndex,
        mapping: &LabelMapping,
        precondition: &Precondition,
    ) -> SyncResult<PublishedVersions> {
        let index_bytes = index.to_bytes();
        let mapping_bytes = mapping
            .to_bytes()
            .map_err(|source| SyncError::Vector { kind, source })?;
        let index_key = kind.index_key();
        let mapping_key = kind.mapping_key();

        let index_version = self
            .store
            .upload(&index_key, &index_bytes)
            .map_err(|source| store_unavailable(kind, "upload", source))?;
        let mapping_version = self
            .store
            .upload(&mapping_key, &mapping_bytes)
            .map_err(|source| store_unavailable(kind, "upload", source))?;

        let prior_index = match precondition {
            Precondition::Unconditional => self
                .store
                .latest_version(&index_key)
                .map_err(|source| store_unavailable(kind, "promote", source))?,
            Precondition::Matches { index, .. } => Some(index.clone()),
        };

        let promoted = match precondition {
            Precondition::Unconditional => self.store.promote(&index_key, &index_version),
            Precondition::Matches { index, .. } => {
                self.store
                    .promote_if(&index_key, &index_version, Some(index))
            }
        };
        promoted.map_err(|source| promote_failed(kind, source))?;

        let promoted = match precondition {
            Precondition::Unconditional => self.store.promote(&mapping_key, &mapping_version),
            Precondition::Matches { mapping, .. } => {
                self.store
                    .promote_if(&mapping_key, &mapping_version, Some(mapping))
            }
        };
        if let Err(source) = promoted {
            self.roll_back_index(kind, &index_version, prior_index.as_ref());
            return Err(promote_failed(kind, source));
        }

        info!(
            %kind,
            index_version = %index_version,
            mapping_version = %mapping_version,
            cardinality = index.cardinality(),
            "published"
        );

        let entry = CacheEntry::new(kind, index_version.clone(), mapping_version.clone());
        if let Err(e) = self.write_local(kind, &index_bytes, &mapping_bytes, &entry) {
            warn!(%kind, "published but failed to refresh local cache: {e}");
            self.invalidate(kind)?;
        }

        Ok(PublishedVersions {
            index: index_version,
            mapping: mapping_version,
        })
    }

    fn roll_back_index(&self, kind: Kind, ours: &VersionId, prior: Option<&VersionId>) {
        let Some(prior) = prior else {
            warn!(%kind, version = %ours, "mapping promote failed and the index has no prior version to restore");
            return;
        };
        match self.store.promote_if(&kind.index_key(), prior, Some(ours)) {
            Ok(()) => warn!(%kind, restored = %prior, "mapping promote failed; rolled index back"),
            Err(e) => error!(%kind, restored = %prior, "failed to roll index back: {e}"),
        }
    }

    fn write_local(
        &self,
        kind: Kind,
        index_bytes: &[u8],
        mapping_bytes: &[u8],
        entry: &CacheEntry,
    ) -> SyncResult<()> {
        // Without an entry the pair below is never read, so a crash between
        // the two renames cannot pair the new index with the old mapping.
        remove_if_exists(&self.entry_path(kind))?;
        write_atomic(&self.dir, &self.index_path(kind), index_bytes)?;
        write_atomic(&self.dir, &self.mapping_path(kind), mapping_bytes)?;
        self.write_entry(kind, entry)
    }

    fn write_entry(&self, kind: Kind, entry: &CacheEntry) -> SyncResult<()> {
        let path = self.entry_path(kind);
        let json = serde_json::to_vec_pretty(entry).map_err(|e| SyncError::Io {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        write_atomic(&self.dir, &path, &json)
    }
}

fn remove_if_exists(path: &Path) -> SyncResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SyncError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let io_err = |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn store_unavailable(kind: Kind, operation: &'static str, source: StoreError) -> SyncError {
    SyncError::StoreUnavailable {
        kind,
        operation,
        source,
    }
}

fn promote_failed(kind: Kind, source: StoreError) -> SyncError {
    if source.is_conflict() {
        SyncError::VersionConflict { kind, attempts: 1 }
    } else {
        store_unavailable(kind, "promote", source)
    }
}
