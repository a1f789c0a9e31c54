//! Caller-facing entry point tying cache, builder, appender and queries together.
//!
//! Operations on the same kind from one process are serialized by a per-kind
//! lock; different kinds proceed independently. Cross-process coordination is
//! left to the publish mode.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, warn};

use crate::cache::{CacheEntry, LocalCache};
use crate::config::Settings;
use crate::corpus::{CorpusProvider, JsonCorpus, ReceiptRecord};
use crate::error::{SyncError, SyncResult};
use crate::indexing::{AppendReport, IncrementalAppender, IndexBuilder, RebuildReport};
use crate::query::{QueryEngine, QueryOutcome, SearchResults, SearchTerms};
use crate::store::{ArtifactStore, FsArtifactStore};
use crate::types::{Kind, VersionId};
use crate::vector::{EmbeddingGenerator, shared_generator};

/// Local and remote state of one kind, for `semindex status`.
#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub kind: Kind,
    pub cached: Option<CacheEntry>,
    /// Vectors in the local copy
    pub cardinality: Option<usize>,
    /// Labels in the local copy
    pub labels: Option<usize>,
    pub remote_index: Option<VersionId>,
    pub remote_mapping: Option<VersionId>,
    /// Why the remote versions could not be read
    pub remote_error: Option<String>,
}

impl KindStatus {
    /// True when the local copy is known to lag the store.
    pub fn is_stale(&self) -> bool {
        match &self.cached {
            Some(entry) => {
                self.remote_error.is_none()
                    && !entry.matches(self.remote_index.as_ref(), self.remote_mapping.as_ref())
            }
            None => false,
        }
    }
}

pub struct IndexService {
    cache: Arc<LocalCache>,
    corpus: Arc<dyn CorpusProvider>,
    builder: IndexBuilder,
    appender: IncrementalAppender,
    engine: QueryEngine,
    locks: [Mutex<()>; 3],
    default_k: usize,
    parallel: bool,
}

impl IndexService {
    pub fn new(
        cache: Arc<LocalCache>,
        embedder: Arc<dyn EmbeddingGenerator>,
        corpus: Arc<dyn CorpusProvider>,
        settings: &Settings,
    ) -> Self {
        let builder = IndexBuilder::new(
            cache.clone(),
            embedder.clone(),
            settings.embedding.batch_size,
        );
        let appender = IncrementalAppender::new(
            cache.clone(),
            embedder.clone(),
            settings.publish.mode,
            settings.publish.max_retries,
        );
        let engine = QueryEngine::new(cache.clone(), embedder);

        Self {
            cache,
            corpus,
            builder,
            appender,
            engine,
            locks: Default::default(),
            default_k: settings.query.default_k,
            parallel: settings.rebuild.parallel,
        }
    }

    /// Wires the filesystem store, local cache, shared embedding model and
    /// JSON corpus described by `settings`.
    pub fn from_settings(settings: &Settings) -> SyncResult<Self> {
        let store_root = settings.store_root();
        let store = FsArtifactStore::new(&store_root, settings.store.lock_timeout()).map_err(
            |e| SyncError::Config {
                reason: format!(
                    "cannot open artifact store at '{}': {e}",
                    store_root.display()
                ),
            },
        )?;
        let store: Arc<dyn ArtifactStore> = Arc::new(store);
        let cache = Arc::new(LocalCache::new(
            settings.cache_dir(),
            store,
            settings.cache.revalidate_interval(),
        )?);
        let embedder =
            shared_generator(&settings.embedding).map_err(|source| SyncError::ModelUnavailable {
                model: settings.embedding.model.clone(),
                source,
            })?;
        let corpus = Arc::new(JsonCorpus::new(settings.corpus_path()));
        Ok(Self::new(cache, embedder, corpus, settings))
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    fn lock(&self, kind: Kind) -> MutexGuard<'_, ()> {
        let slot = match kind {
            Kind::Company => 0,
            Kind::Address => 1,
            Kind::ItemDescription => 2,
        };
        self.locks[slot].lock()
    }

    /// True when a local copy of `kind` exists or could be downloaded.
    pub fn ensure_index_available(&self, kind: Kind) -> bool {
        let _guard = self.lock(kind);
        match self.cache.ensure_cached(kind) {
            Ok(_) => true,
            Err(e) => {
                warn!(%kind, "index unavailable: {e}");
                false
            }
        }
    }

    /// Rebuilds one kind from the corpus and publishes it.
    pub fn rebuild(&self, kind: Kind) -> SyncResult<RebuildReport> {
        let _guard = self.lock(kind);
        self.builder.rebuild(kind, self.corpus.as_ref())
    }

    /// Rebuilds every kind; one kind failing does not stop the others.
    pub fn rebuild_all(&self) -> Vec<(Kind, SyncResult<RebuildReport>)> {
        let run = |kind: Kind| {
            let result = self.rebuild(kind);
            if let Err(e) = &result {
                error!(%kind, "rebuild failed: {e}");
            }
            (kind, result)
        };
        if self.parallel {
            Kind::ALL.par_iter().map(|&kind| run(kind)).collect()
        } else {
            Kind::ALL.iter().map(|&kind| run(kind)).collect()
        }
    }

    /// Appends `texts` to an already published kind.
    pub fn append(&self, kind: Kind, texts: &[String]) -> SyncResult<AppendReport> {
        let _guard = self.lock(kind);
        self.appender.append(kind, texts)
    }

    /// Appends a receipt's company, address and item descriptions, each to
    /// its own kind. Empty fields are skipped; kinds succeed or fail
    /// independently.
    pub fn append_receipt(&self, record: &ReceiptRecord) -> Vec<(Kind, SyncResult<AppendReport>)> {
        Kind::ALL
            .into_iter()
            .filter_map(|kind| {
                let texts = record.texts(kind);
                if texts.is_empty() {
                    return None;
                }
                let result = self.append(kind, &texts);
                if let Err(e) = &result {
                    error!(%kind, "append failed: {e}");
                }
                Some((kind, result))
            })
            .collect()
    }

    /// Up to `k` (default `query.default_k`) closest labels of `kind`.
    pub fn query(&self, kind: Kind, text: &str, k: Option<usize>) -> QueryOutcome {
        let _guard = self.lock(kind);
        self.engine.query(kind, text, k.unwrap_or(self.default_k))
    }

    /// Multi-category term search with `query.default_k` neighbors per term.
    pub fn search(&self, terms: &SearchTerms) -> SearchResults {
        let mut results = SearchResults::default();
        for kind in Kind::ALL {
            let kind_terms = terms.terms(kind);
            if kind_terms.is_empty() {
                continue;
            }
            let _guard = self.lock(kind);
            results.set(
                kind,
                self.engine.query_terms(kind, kind_terms, self.default_k),
            );
        }
        results
    }

    /// Local cache and store state of every kind. Never downloads.
    pub fn status(&self) -> Vec<KindStatus> {
        Kind::ALL
            .into_iter()
            .map(|kind| {
                let _guard = self.lock(kind);
                self.kind_status(kind)
            })
            .collect()
    }

    fn kind_status(&self, kind: Kind) -> KindStatus {
        let cached = self.cache.entry(kind).ok().flatten();
        let loaded = cached
            .as_ref()
            .and_then(|_| self.cache.load(kind).ok());

        let store = self.cache.store();
        let remote = store
            .latest_version(&kind.index_key())
            .and_then(|index| Ok((index, store.latest_version(&kind.mapping_key())?)));
        let (remote_index, remote_mapping, remote_error) = match remote {
            Ok((index, mapping)) => (index, mapping, None),
            Err(e) => (None, None, Some(e.to_string())),
        };

        KindStatus {
            kind,
            cached,
            cardinality: loaded.as_ref().map(|l| l.index.cardinality()),
            labels: loaded.as_ref().map(|l| l.mapping.len()),
            remote_index,
            remote_mapping,
            remote_error,
        }
    }
}
