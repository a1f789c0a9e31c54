//! Incremental append of newly observed texts to a published index.
//!
//! An append is a read-modify-write over the latest version: check out the
//! cached pair, add vectors for the new texts, publish. [`PublishMode`]
//! decides what happens when another writer published in between.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CachedIndex, LocalCache, Precondition, PublishedVersions};
use crate::config::PublishMode;
use crate::error::{SyncError, SyncResult};
use crate::types::Kind;
use crate::vector::{EmbeddingGenerator, FlatIndex, LabelMapping, VectorId};

use super::builder::embed_batch;

/// Pause before re-reading latest, multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(15);

/// An append applied in memory but not yet published.
#[derive(Debug, Clone)]
pub struct PendingAppend {
    kind: Kind,
    index: FlatIndex,
    mapping: LabelMapping,
    base: CacheEntry,
    ids: Vec<VectorId>,
}

impl PendingAppend {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Ids assigned to the new texts, relative to the base version.
    pub fn ids(&self) -> &[VectorId] {
        &self.ids
    }

    /// The cache entry the append was computed from.
    pub fn base(&self) -> &CacheEntry {
        &self.base
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone)]
pub struct AppendReport {
    pub kind: Kind,
    /// Ids assigned to the appended texts, in input order
    pub ids: Vec<VectorId>,
    /// Index size after the append
    pub cardinality: usize,
    /// Publish attempts, 1 when no conflict occurred
    pub attempts: u32,
    /// `None` when there was nothing to append
    pub versions: Option<PublishedVersions>,
}

pub struct IncrementalAppender {
    cache: Arc<LocalCache>,
    embedder: Arc<dyn EmbeddingGenerator>,
    mode: PublishMode,
    max_retries: u32,
}

impl IncrementalAppender {
    pub fn new(
        cache: Arc<LocalCache>,
        embedder: Arc<dyn EmbeddingGenerator>,
        mode: PublishMode,
        max_retries: u32,
    ) -> Self {
        Self {
            cache,
            embedder,
            mode,
            max_retries,
        }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Appends `texts` to `kind` and publishes the result.
    ///
    /// In [`PublishMode::Optimistic`] a conflicting publish invalidates the
    /// local copy, re-reads latest and re-applies the same vectors, up to
    /// `max_retries` more times. In [`PublishMode::LastWriteWins`] the first
    /// publish always lands, possibly discarding a concurrent append.
    ///
    /// A base whose mapping does not cover exactly the index ids is treated
    /// as a conflict in optimistic mode, so torn reads are never published.
    pub fn append(&self, kind: Kind, texts: &[String]) -> SyncResult<AppendReport> {
        if texts.is_empty() {
            let cached = self.cache.checkout(kind)?;
            return Ok(AppendReport {
                kind,
                ids: Vec::new(),
                cardinality: cached.index.cardinality(),
                attempts: 0,
                versions: None,
            });
        }

        let vectors = embed_batch(self.embedder.as_ref(), kind, texts)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let base = self.cache.checkout(kind)?;
            let result = if self.mode == PublishMode::Optimistic
                && !base.mapping.is_paired_with(base.index.cardinality())
            {
                // Read landed between another writer's index and mapping promotes
                Err(SyncError::VersionConflict {
                    kind,
                    attempts: attempt,
                })
            } else {
                apply(kind, base, &vectors, texts).and_then(|pending| self.commit(pending))
            };

            match result {
                Ok(mut report) => {
                    report.attempts = attempt;
                    return Ok(report);
                }
                Err(e) if e.is_conflict() && self.mode == PublishMode::Optimistic => {
                    if attempt > self.max_retries {
                        warn!(%kind, attempts = attempt, "giving up after repeated publish conflicts");
                        return Err(SyncError::VersionConflict {
                            kind,
                            attempts: attempt,
                        });
                    }
                    info!(%kind, attempt, "latest moved during append; re-reading and retrying");
                    self.cache.invalidate(kind)?;
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads the current cached version and applies `texts` to it in memory.
    pub fn prepare(&self, kind: Kind, texts: &[String]) -> SyncResult<PendingAppend> {
        let vectors = embed_batch(self.embedder.as_ref(), kind, texts)?;
        let base = self.cache.checkout(kind)?;
        apply(kind, base, &vectors, texts)
    }

    /// Publishes a prepared append according to the configured mode.
    ///
    /// Returns [`SyncError::VersionConflict`] in optimistic mode when latest
    /// is no longer the version the append was computed from.
    pub fn commit(&self, pending: PendingAppend) -> SyncResult<AppendReport> {
        let precondition = match self.mode {
            PublishMode::Optimistic => Precondition::from_entry(&pending.base),
            PublishMode::LastWriteWins => Precondition::Unconditional,
        };
        let versions =
            self.cache
                .publish(pending.kind, &pending.index, &pending.mapping, &precondition)?;

        info!(
            kind = %pending.kind,
            appended = pending.ids.len(),
            cardinality = pending.index.cardinality(),
            "append published"
        );
        Ok(AppendReport {
            kind: pending.kind,
            cardinality: pending.index.cardinality(),
            ids: pending.ids,
            attempts: 1,
            versions: Some(versions),
        })
    }
}

fn apply(
    kind: Kind,
    base: CachedIndex,
    vectors: &[Vec<f32>],
    texts: &[String],
) -> SyncResult<PendingAppend> {
    let CachedIndex {
        mut index,
        mut mapping,
        entry,
    } = base;

    let ids = index
        .add(vectors)
        .map_err(|source| SyncError::Vector { kind, source })?;
    mapping
        .extend(&ids, texts)
        .map_err(|source| SyncError::Vector { kind, source })?;
    debug!(%kind, base = %entry.index_version, first_id = ?ids.first(), "applied append");

    Ok(PendingAppend {
        kind,
        index,
        mapping,
        base: entry,
        ids,
    })
}
