//! Receipt-level flows: nightly rebuild from a JSON corpus, query, and
//! per-receipt appends.

use crate::common::{labels, process, settings, texts};
use semindex::vector::VectorId;
use semindex::{
    IndexService, JsonCorpus, Kind, LocalCache, MemoryArtifactStore, PublishMode, QueryOutcome,
    ReceiptRecord, SearchTerms, StaticCorpus,
};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_empty_address_corpus_returns_no_matches() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let worker = process(
        &root,
        "worker",
        store,
        StaticCorpus::new(),
        &settings(PublishMode::Optimistic),
        None,
    );

    worker.service.rebuild(Kind::Address).unwrap();
    let outcome = worker.service.query(Kind::Address, "123 Main St", Some(5));
    assert_eq!(outcome, QueryOutcome::Matches(Vec::new()));
}

#[test]
fn test_duplicate_companies_collapse_on_rebuild() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target", "Walmart"]);
    let worker = process(
        &root,
        "worker",
        store,
        corpus,
        &settings(PublishMode::Optimistic),
        None,
    );

    let report = worker.service.rebuild(Kind::Company).unwrap();
    assert_eq!(report.cardinality, 2);
    assert_eq!(report.skipped_duplicates, 1);

    let loaded = worker.cache.checkout(Kind::Company).unwrap();
    assert_eq!(loaded.mapping.get(VectorId::new(0)), Some("Walmart"));
    assert_eq!(loaded.mapping.get(VectorId::new(1)), Some("Target"));

    let outcome = worker.service.query(Kind::Company, "Walmart", Some(1));
    let matches = outcome.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].label, "Walmart");
    assert!((matches[0].similarity - 1.0).abs() < 1e-4);
}

#[test]
fn test_append_after_two_entries_gets_id_two() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target"]);
    let worker = process(
        &root,
        "worker",
        store,
        corpus,
        &settings(PublishMode::Optimistic),
        None,
    );
    worker.service.rebuild(Kind::Company).unwrap();

    let report = worker
        .service
        .append(Kind::Company, &texts(&["Costco"]))
        .unwrap();
    assert_eq!(report.ids, vec![VectorId::new(2)]);
    assert_eq!(report.cardinality, 3);

    let loaded = worker.cache.checkout(Kind::Company).unwrap();
    assert_eq!(loaded.mapping.get(VectorId::new(2)), Some("Costco"));
    assert_eq!(loaded.index.cardinality(), 3);
}

#[test]
fn test_json_corpus_rebuild_then_receipt_append() {
    let root = TempDir::new().unwrap();
    let corpus_path = root.path().join("corpus.json");
    std::fs::write(
        &corpus_path,
        r#"[
            {"company": "Walmart", "address": "100 Main St", "items": ["Milk", "Bread"]},
            {"company": "Target", "address": "", "items": ["Milk", "Eggs"]},
            {"company": "Walmart", "items": []}
        ]"#,
    )
    .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let cache = Arc::new(LocalCache::new(root.path().join("cache"), store, None).unwrap());
    let service = IndexService::new(
        cache.clone(),
        crate::common::embedder(),
        Arc::new(JsonCorpus::new(&corpus_path)),
        &settings(PublishMode::Optimistic),
    );

    let results = service.rebuild_all();
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(labels(&cache, Kind::Company), texts(&["Walmart", "Target"]));
    assert_eq!(labels(&cache, Kind::Address), texts(&["100 Main St"]));
    assert_eq!(
        labels(&cache, Kind::ItemDescription),
        texts(&["Milk", "Bread", "Eggs"])
    );

    let receipt: ReceiptRecord = serde_json::from_str(
        r#"{"company": "Costco", "address": "9 Warehouse Rd", "items": ["Paper towels"]}"#,
    )
    .unwrap();
    let appended = service.append_receipt(&receipt);
    assert_eq!(appended.len(), 3);
    for (kind, result) in &appended {
        let report = result.as_ref().unwrap();
        assert_eq!(report.ids.len(), 1, "{kind}");
    }

    let terms = SearchTerms {
        companies: texts(&["Costco"]),
        addresses: texts(&["9 Warehouse Rd"]),
        items: texts(&["Paper towels", "Milk"]),
    };
    let results = service.search(&terms);
    assert_eq!(results.companies.matches()[0].label, "Costco");
    assert_eq!(results.addresses.matches()[0].label, "9 Warehouse Rd");
    // Two terms at the default k of 5, four items indexed
    let items = results.items.matches();
    assert_eq!(items.len(), 8);
    assert_eq!(items[0].label, "Paper towels");
    assert_eq!(items[4].label, "Milk");
}
