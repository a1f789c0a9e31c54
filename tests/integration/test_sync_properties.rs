//! Pairing, append ids, empty rebuilds and publish atomicity, exercised
//! through the service API with separate cache directories per process.

use crate::common::{self, Process, labels, process, settings, texts};
use semindex::store::StoreOp;
use semindex::vector::{VectorDimension, VectorError, VectorId};
use semindex::{
    EmbeddingGenerator, IndexService, Kind, LocalCache, MemoryArtifactStore, PublishMode,
    QueryOutcome, SearchTerms, StaticCorpus, SyncError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct OfflineEmbedder;

impl EmbeddingGenerator for OfflineEmbedder {
    fn generate_embeddings(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Err(VectorError::EmbeddingFailed("provider offline".to_string()))
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(common::DIMENSION).unwrap()
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

fn single_process(corpus: StaticCorpus) -> (TempDir, Arc<MemoryArtifactStore>, Process) {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let worker = process(
        &root,
        "worker",
        store.clone(),
        corpus,
        &settings(PublishMode::Optimistic),
        None,
    );
    (root, store, worker)
}

#[test]
fn test_mapping_stays_paired_through_rebuild_and_appends() {
    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target", "Kroger"]);
    let (_root, _store, worker) = single_process(corpus);

    worker.service.rebuild(Kind::Company).unwrap();
    worker
        .service
        .append(Kind::Company, &texts(&["Costco", "Aldi"]))
        .unwrap();
    worker.service.append(Kind::Company, &texts(&["Safeway"])).unwrap();

    // labels() asserts the mapping domain is exactly 0..cardinality
    assert_eq!(
        labels(&worker.cache, Kind::Company),
        texts(&["Walmart", "Target", "Kroger", "Costco", "Aldi", "Safeway"])
    );
}

#[test]
fn test_append_assigns_next_ids_and_is_queryable() {
    let corpus = StaticCorpus::new().with(Kind::ItemDescription, ["Milk", "Bread", "Eggs"]);
    let (_root, _store, worker) = single_process(corpus);
    worker.service.rebuild(Kind::ItemDescription).unwrap();

    let appended = texts(&["Organic bananas", "Greek yogurt"]);
    let report = worker
        .service
        .append(Kind::ItemDescription, &appended)
        .unwrap();
    assert_eq!(report.ids, vec![VectorId::new(3), VectorId::new(4)]);
    assert_eq!(report.cardinality, 5);
    assert_eq!(report.attempts, 1);

    let loaded = worker.cache.checkout(Kind::ItemDescription).unwrap();
    assert_eq!(loaded.mapping.get(VectorId::new(3)), Some("Organic bananas"));
    assert_eq!(loaded.mapping.get(VectorId::new(4)), Some("Greek yogurt"));

    let outcome = worker
        .service
        .query(Kind::ItemDescription, "Greek yogurt", Some(3));
    let top = &outcome.matches()[0];
    assert_eq!(top.label, "Greek yogurt");
    assert!((top.similarity - 1.0).abs() < 1e-4);
}

#[test]
fn test_empty_corpus_rebuild_queries_to_nothing() {
    let (_root, _store, worker) = single_process(StaticCorpus::new());

    let report = worker.service.rebuild(Kind::Address).unwrap();
    assert_eq!(report.cardinality, 0);

    let loaded = worker.cache.checkout(Kind::Address).unwrap();
    assert_eq!(loaded.index.cardinality(), 0);
    assert!(loaded.mapping.is_empty());

    let outcome = worker.service.query(Kind::Address, "123 Main St", Some(5));
    assert_eq!(outcome, QueryOutcome::Matches(Vec::new()));
}

#[test]
fn test_failed_promote_keeps_prior_latest_for_fresh_readers() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let config = settings(PublishMode::Optimistic);

    let first = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target"]);
    let writer = process(&root, "writer-1", store.clone(), first, &config, None);
    writer.service.rebuild(Kind::Company).unwrap();

    let second = StaticCorpus::new().with(Kind::Company, ["Costco", "Aldi", "Kroger"]);
    let failing = process(&root, "writer-2", store.clone(), second, &config, None);
    store.inject_failure(StoreOp::Promote, None);
    let err = failing.service.rebuild(Kind::Company).unwrap_err();
    assert!(matches!(err, SyncError::StoreUnavailable { .. }), "{err}");
    store.clear_failures();

    // Uploads landed but were never promoted
    assert_eq!(store.versions("company").len(), 2);

    let reader = process(&root, "reader", store, StaticCorpus::new(), &config, None);
    assert!(reader.service.ensure_index_available(Kind::Company));
    assert_eq!(labels(&reader.cache, Kind::Company), texts(&["Walmart", "Target"]));
}

#[test]
fn test_failed_mapping_promote_rolls_back_index() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let config = settings(PublishMode::Optimistic);

    let corpus = StaticCorpus::new().with(Kind::Address, ["1 Main St"]);
    let writer = process(&root, "writer", store.clone(), corpus, &config, None);
    writer.service.rebuild(Kind::Address).unwrap();

    store.inject_failure(StoreOp::Promote, Some("address_mapping"));
    assert!(
        writer
            .service
            .append(Kind::Address, &texts(&["2 Oak Ave"]))
            .is_err()
    );
    store.clear_failures();

    let reader = process(&root, "reader", store, StaticCorpus::new(), &config, None);
    assert_eq!(labels(&reader.cache, Kind::Address), texts(&["1 Main St"]));
}

#[test]
fn test_embedding_failure_aborts_without_publishing() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let config = settings(PublishMode::Optimistic);
    let cache = Arc::new(LocalCache::new(root.path().join("offline"), store.clone(), None).unwrap());
    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart"]);
    let service = IndexService::new(cache, Arc::new(OfflineEmbedder), Arc::new(corpus), &config);

    let err = service.rebuild(Kind::Company).unwrap_err();
    assert!(matches!(err, SyncError::EmbeddingUnavailable { .. }), "{err}");
    assert!(store.versions("company").is_empty());
    assert!(store.versions("company_mapping").is_empty());
}

#[test]
fn test_unpublished_kind_degrades_per_category() {
    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target"]);
    let (_root, _store, worker) = single_process(corpus);
    worker.service.rebuild(Kind::Company).unwrap();

    assert!(!worker.service.ensure_index_available(Kind::Address));

    let terms = SearchTerms {
        companies: texts(&["Walmart"]),
        addresses: texts(&["123 Main St"]),
        items: Vec::new(),
    };
    let results = worker.service.search(&terms);
    assert_eq!(results.companies.matches()[0].label, "Walmart");
    assert!(!results.addresses.is_available());
    assert_eq!(results.items, QueryOutcome::Matches(Vec::new()));

    let summary = results.to_string();
    assert!(summary.starts_with("Similar companies found in database:\n- Walmart (similarity: 1.0000)"));
    assert!(!summary.contains("addresses"));
}

#[test]
fn test_revalidating_reader_sees_new_publishes() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let config = settings(PublishMode::Optimistic);

    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart"]);
    let writer = process(&root, "writer", store.clone(), corpus, &config, None);
    writer.service.rebuild(Kind::Company).unwrap();

    let fresh = process(
        &root,
        "fresh",
        store.clone(),
        StaticCorpus::new(),
        &config,
        Some(Duration::ZERO),
    );
    let stale = process(&root, "stale", store, StaticCorpus::new(), &config, None);
    assert_eq!(labels(&fresh.cache, Kind::Company), texts(&["Walmart"]));
    assert_eq!(labels(&stale.cache, Kind::Company), texts(&["Walmart"]));

    writer.service.append(Kind::Company, &texts(&["Target"])).unwrap();

    assert_eq!(
        fresh.service.query(Kind::Company, "Target", Some(1)).matches()[0].label,
        "Target"
    );
    // Without revalidation the local copy is served as-is
    assert_eq!(labels(&stale.cache, Kind::Company), texts(&["Walmart"]));
    let status = stale.service.status();
    let company = status.iter().find(|s| s.kind == Kind::Company).unwrap();
    assert!(company.is_stale());
}
