//! Shared fixtures: a deterministic offline embedder and "processes" that
//! share one artifact store but keep separate cache directories.

#![allow(dead_code)]

use semindex::vector::VectorDimension;
use semindex::{
    ArtifactStore, EmbeddingGenerator, HashEmbeddingGenerator, IndexService, LocalCache,
    PublishMode, Settings, StaticCorpus,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const DIMENSION: usize = 64;

pub fn embedder() -> Arc<dyn EmbeddingGenerator> {
    Arc::new(HashEmbeddingGenerator::new(
        VectorDimension::new(DIMENSION).unwrap(),
    ))
}

pub fn settings(mode: PublishMode) -> Settings {
    let mut settings = Settings::default();
    settings.publish.mode = mode;
    settings.embedding.model = "hash".to_string();
    settings.embedding.dimension = DIMENSION;
    settings
}

/// One worker process: its own cache directory over the shared store.
pub struct Process {
    pub cache: Arc<LocalCache>,
    pub service: IndexService,
}

pub fn process(
    root: &TempDir,
    name: &str,
    store: Arc<dyn ArtifactStore>,
    corpus: StaticCorpus,
    settings: &Settings,
    revalidate: Option<Duration>,
) -> Process {
    let cache = Arc::new(LocalCache::new(root.path().join(name), store, revalidate).unwrap());
    let service = IndexService::new(cache.clone(), embedder(), Arc::new(corpus), settings);
    Process { cache, service }
}

pub fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Labels of `kind` in id order, read from the local copy.
pub fn labels(cache: &LocalCache, kind: semindex::Kind) -> Vec<String> {
    let loaded = cache.checkout(kind).unwrap();
    assert!(
        loaded.mapping.is_paired_with(loaded.index.cardinality()),
        "mapping and index out of sync"
    );
    loaded.mapping.iter().map(|(_, label)| label.to_string()).collect()
}
