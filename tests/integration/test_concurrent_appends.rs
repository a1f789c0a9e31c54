//! Two or more processes appending to the same kind from the same base.
//!
//! `last_write_wins` reproduces the lost update: the second publish silently
//! replaces the first. `optimistic` detects the moved latest pointer and
//! re-applies the losing append on top of the winner.

use crate::common::{self, embedder, labels, process, settings, texts};
use semindex::{
    IncrementalAppender, Kind, LocalCache, MemoryArtifactStore, PublishMode, StaticCorpus,
    SyncError,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

/// Publishes `Walmart, Target` and returns one appender per process, each
/// with a warm cache of that base.
fn two_writers(
    root: &TempDir,
    store: &Arc<MemoryArtifactStore>,
    mode: PublishMode,
    max_retries: u32,
) -> (IncrementalAppender, IncrementalAppender) {
    let corpus = StaticCorpus::new().with(Kind::Company, ["Walmart", "Target"]);
    let seed = process(root, "seed", store.clone(), corpus, &settings(mode), None);
    seed.service.rebuild(Kind::Company).unwrap();

    let writer = |name: &str| {
        let cache = Arc::new(LocalCache::new(root.path().join(name), store.clone(), None).unwrap());
        cache.checkout(Kind::Company).unwrap();
        IncrementalAppender::new(cache, embedder(), mode, max_retries)
    };
    (writer("worker-a"), writer("worker-b"))
}

fn fresh_labels(root: &TempDir, store: &Arc<MemoryArtifactStore>, name: &str) -> Vec<String> {
    let cache = LocalCache::new(root.path().join(name), store.clone(), None).unwrap();
    labels(&cache, Kind::Company)
}

#[test]
fn test_last_write_wins_drops_the_earlier_append() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let (a, b) = two_writers(&root, &store, PublishMode::LastWriteWins, 3);

    let pending_a = a.prepare(Kind::Company, &texts(&["Costco"])).unwrap();
    let pending_b = b.prepare(Kind::Company, &texts(&["Aldi"])).unwrap();
    assert_eq!(pending_a.base().index_version, pending_b.base().index_version);

    a.commit(pending_a).unwrap();
    b.commit(pending_b).unwrap();

    // Current behavior: Costco is gone from the published index until the
    // next rebuild from the corpus.
    assert_eq!(
        fresh_labels(&root, &store, "reader"),
        texts(&["Walmart", "Target", "Aldi"])
    );
}

#[test]
fn test_optimistic_commit_rejects_a_stale_base() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let (a, b) = two_writers(&root, &store, PublishMode::Optimistic, 3);

    let pending_a = a.prepare(Kind::Company, &texts(&["Costco"])).unwrap();
    let pending_b = b.prepare(Kind::Company, &texts(&["Aldi"])).unwrap();
    a.commit(pending_a).unwrap();

    let err = b.commit(pending_b).unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert_eq!(
        fresh_labels(&root, &store, "reader"),
        texts(&["Walmart", "Target", "Costco"])
    );
}

#[test]
fn test_optimistic_append_retries_onto_the_winner() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let (a, b) = two_writers(&root, &store, PublishMode::Optimistic, 3);

    let first = a.append(Kind::Company, &texts(&["Costco"])).unwrap();
    assert_eq!(first.attempts, 1);

    // b still holds the seed version locally
    let second = b.append(Kind::Company, &texts(&["Aldi"])).unwrap();
    assert_eq!(second.attempts, 2);
    assert_eq!(second.ids, vec![semindex::VectorId::new(3)]);

    assert_eq!(
        fresh_labels(&root, &store, "reader"),
        texts(&["Walmart", "Target", "Costco", "Aldi"])
    );
}

#[test]
fn test_optimistic_append_gives_up_without_retries() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let (a, b) = two_writers(&root, &store, PublishMode::Optimistic, 0);

    a.append(Kind::Company, &texts(&["Costco"])).unwrap();
    let err = b.append(Kind::Company, &texts(&["Aldi"])).unwrap_err();
    assert!(
        matches!(err, SyncError::VersionConflict { attempts: 1, .. }),
        "{err}"
    );
}

#[test]
fn test_parallel_optimistic_appends_keep_every_text() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(MemoryArtifactStore::new());
    let corpus = StaticCorpus::new().with(Kind::ItemDescription, ["Milk"]);
    let seed = process(
        &root,
        "seed",
        store.clone(),
        corpus,
        &settings(PublishMode::Optimistic),
        None,
    );
    seed.service.rebuild(Kind::ItemDescription).unwrap();

    let items = ["Eggs", "Bread", "Butter", "Cheese"];
    std::thread::scope(|scope| {
        for (n, item) in items.iter().enumerate() {
            let cache = Arc::new(
                LocalCache::new(root.path().join(format!("worker-{n}")), store.clone(), None)
                    .unwrap(),
            );
            let appender =
                IncrementalAppender::new(cache, common::embedder(), PublishMode::Optimistic, 20);
            scope.spawn(move || {
                appender
                    .append(Kind::ItemDescription, &[item.to_string()])
                    .unwrap();
            });
        }
    });

    let cache = LocalCache::new(root.path().join("reader"), store.clone(), None).unwrap();
    let published: BTreeSet<String> = labels(&cache, Kind::ItemDescription)
        .into_iter()
        .collect();
    let expected: BTreeSet<String> = ["Milk", "Eggs", "Bread", "Butter", "Cheese"]
        .map(String::from)
        .into_iter()
        .collect();
    assert_eq!(published, expected);
}
