//! Full rebuild of a kind from its source corpus.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cache::{LocalCache, Precondition, PublishedVersions};
use crate::corpus::CorpusProvider;
use crate::error::{SyncError, SyncResult};
use crate::types::Kind;
use crate::vector::{EmbeddingGenerator, FlatIndex, LabelMapping, VectorError};

/// Outcome of a successful rebuild.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub kind: Kind,
    /// Vectors in the published index
    pub cardinality: usize,
    /// Empty or whitespace-only texts dropped from the corpus
    pub skipped_blank: usize,
    /// Repeated texts dropped from the corpus
    pub skipped_duplicates: usize,
    pub versions: PublishedVersions,
    pub elapsed: Duration,
}

/// Recomputes a kind's index from scratch and publishes it.
///
/// The new pair is built entirely in memory before anything is uploaded,
/// and the publish is unconditional: the corpus is authoritative.
pub struct IndexBuilder {
    cache: Arc<LocalCache>,
    embedder: Arc<dyn EmbeddingGenerator>,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(
        cache: Arc<LocalCache>,
        embedder: Arc<dyn EmbeddingGenerator>,
        batch_size: usize,
    ) -> Self {
        Self {
            cache,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Reads the corpus, builds the pair and publishes it.
    pub fn rebuild(&self, kind: Kind, corpus: &dyn CorpusProvider) -> SyncResult<RebuildReport> {
        let start = Instant::now();
        let texts = corpus.distinct_texts(kind)?;
        let prepared = prepare_texts(texts);

        let (index, mapping) = self.build(kind, &prepared.texts)?;
        let versions = self
            .cache
            .publish(kind, &index, &mapping, &Precondition::Unconditional)?;

        let report = RebuildReport {
            kind,
            cardinality: index.cardinality(),
            skipped_blank: prepared.blank,
            skipped_duplicates: prepared.duplicates,
            versions,
            elapsed: start.elapsed(),
        };
        info!(
            %kind,
            cardinality = report.cardinality,
            skipped_blank = report.skipped_blank,
            skipped_duplicates = report.skipped_duplicates,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "rebuild complete"
        );
        Ok(report)
    }

    /// Embeds `texts` in batches into a fresh index with ids `0..texts.len()`.
    ///
    /// An empty input yields an empty index of the embedder's dimension.
    pub fn build(&self, kind: Kind, texts: &[String]) -> SyncResult<(FlatIndex, LabelMapping)> {
        let mut index = FlatIndex::new(self.embedder.dimension());
        let mut mapping = LabelMapping::new();

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let vectors = embed_batch(self.embedder.as_ref(), kind, batch)?;
            let ids = index
                .add(&vectors)
                .map_err(|source| SyncError::Vector { kind, source })?;
            mapping
                .extend(&ids, batch)
                .map_err(|source| SyncError::Vector { kind, source })?;
            debug!(%kind, batch = batch_no, size = batch.len(), "embedded batch");
        }

        Ok((index, mapping))
    }
}

/// Embeds one batch, checking the provider returned a vector per text.
pub(crate) fn embed_batch(
    embedder: &dyn EmbeddingGenerator,
    kind: Kind,
    texts: &[String],
) -> SyncResult<Vec<Vec<f32>>> {
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = embedder
        .generate_embeddings(&refs)
        .map_err(|source| SyncError::EmbeddingUnavailable { kind, source })?;
    if vectors.len() != texts.len() {
        return Err(SyncError::EmbeddingUnavailable {
            kind,
            source: VectorError::EmbeddingFailed(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )),
        });
    }
    Ok(vectors)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PreparedTexts {
    pub texts: Vec<String>,
    pub blank: usize,
    pub duplicates: usize,
}

/// Drops blank texts and repeats, keeping first occurrences in order.
pub(crate) fn prepare_texts(texts: Vec<String>) -> PreparedTexts {
    let mut seen = HashSet::with_capacity(texts.len());
    let mut prepared = PreparedTexts::default();
    for text in texts {
        if text.trim().is_empty() {
            prepared.blank += 1;
        } else if seen.insert(text.clone()) {
            prepared.texts.push(text);
        } else {
            prepared.duplicates += 1;
        }
    }
    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::StaticCorpus;
    use crate::store::{ArtifactStore, MemoryArtifactStore, StoreOp};
    use crate::vector::{HashEmbeddingGenerator, VectorDimension, VectorId};
    use tempfile::TempDir;

    fn builder(dir: &TempDir, store: &Arc<MemoryArtifactStore>, batch: usize) -> IndexBuilder {
        let cache = Arc::new(LocalCache::new(dir.path().join("cache"), store.clone(), None).unwrap());
        let embedder = Arc::new(HashEmbeddingGenerator::new(VectorDimension::new(32).unwrap()));
        IndexBuilder::new(cache, embedder, batch)
    }

    #[test]
    fn test_prepare_texts() {
        let prepared = prepare_texts(
            ["Walmart", "", "Target", "Walmart", "   "]
                .map(String::from)
                .to_vec(),
        );
        assert_eq!(prepared.texts, vec!["Walmart", "Target"]);
        assert_eq!(prepared.blank, 2);
        assert_eq!(prepared.duplicates, 1);
    }

    #[test]
    fn test_build_batches_preserve_order() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let builder = builder(&dir, &store, 2);
        let texts: Vec<String> = (0..5).map(|i| format!("item {i}")).collect();

        let (index, mapping) = builder.build(Kind::ItemDescription, &texts).unwrap();
        assert_eq!(index.cardinality(), 5);
        assert!(mapping.is_paired_with(5));
        assert_eq!(mapping.get(VectorId::new(4)), Some("item 4"));
    }

    #[test]
    fn test_empty_corpus_publishes_empty_index() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let builder = builder(&dir, &store, 1000);

        let report = builder
            .rebuild(Kind::Address, &StaticCorpus::new())
            .unwrap();
        assert_eq!(report.cardinality, 0);
        assert!(store.latest_version("address").unwrap().is_some());
        assert!(store.latest_version("address_mapping").unwrap().is_some());

        let loaded = builder.cache.load(Kind::Address).unwrap();
        assert_eq!(loaded.index.dimension().get(), 32);
        assert!(loaded.mapping.is_empty());
    }

    #[test]
    fn test_upload_failure_leaves_latest_untouched() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let builder = builder(&dir, &store, 1000);
        let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart"]);
        let first = builder.rebuild(Kind::Company, &corpus).unwrap();

        store.inject_failure(StoreOp::Upload, Some("company_mapping"));
        let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target"]);
        let err = builder.rebuild(Kind::Company, &corpus).unwrap_err();
        assert_eq!(err.status_code(), "STORE_UNAVAILABLE");

        assert_eq!(
            store.latest_version("company").unwrap(),
            Some(first.versions.index)
        );
        assert_eq!(builder.cache.load(Kind::Company).unwrap().index.cardinality(), 1);
    }
}
