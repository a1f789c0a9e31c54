//! Services wired from settings over a shared on-disk artifact store.

use crate::common::{DIMENSION, texts};
use semindex::{ArtifactStore, FsArtifactStore, IndexService, Kind, PublishMode, Settings};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const CORPUS: &str = r#"[
    {"company": "Walmart", "address": "100 Main St", "items": ["Milk"]},
    {"company": "Target", "address": "200 Oak Ave", "items": ["Bread"]}
]"#;

/// Settings for one worker; every worker shares the store and corpus.
fn worker_settings(workspace: &Path, cache_dir: &str) -> Settings {
    let mut settings = Settings::default();
    settings.workspace_root = Some(workspace.to_path_buf());
    settings.cache.dir = cache_dir.into();
    settings.cache.revalidate = false;
    settings.embedding.model = "hash".to_string();
    settings.embedding.dimension = DIMENSION;
    settings.publish.mode = PublishMode::Optimistic;
    settings
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".semindex")).unwrap();
    std::fs::write(dir.path().join(".semindex/corpus.json"), CORPUS).unwrap();
    dir
}

#[test]
fn test_rebuild_publishes_versioned_blobs_on_disk() {
    let dir = workspace();
    let settings = worker_settings(dir.path(), ".semindex/cache-a");
    let service = IndexService::from_settings(&settings).unwrap();

    let results = service.rebuild_all();
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let store_root = dir.path().join(".semindex/store");
    for key in ["company", "company_mapping", "address", "item_description_mapping"] {
        let latest = std::fs::read_to_string(store_root.join(key).join("LATEST")).unwrap();
        let (stamp, digest) = latest.trim().rsplit_once('-').unwrap();
        assert!(!stamp.is_empty());
        assert_eq!(digest.len(), 12, "{latest}");
        assert!(
            store_root
                .join(key)
                .join("versions")
                .join(format!("{}.blob", latest.trim()))
                .is_file()
        );
        // The lock file stays; only the OS lock on it is released
        assert!(store_root.join(key).join("LATEST.lock").is_file());
    }

    let cache_dir = dir.path().join(".semindex/cache-a");
    assert!(cache_dir.join("company_index.vec").is_file());
    assert!(cache_dir.join("company_mapping.json").is_file());
    assert!(cache_dir.join("company_entry.json").is_file());
}

#[test]
fn test_second_worker_downloads_and_appends() {
    let dir = workspace();
    let a = IndexService::from_settings(&worker_settings(dir.path(), ".semindex/cache-a")).unwrap();
    let b = IndexService::from_settings(&worker_settings(dir.path(), ".semindex/cache-b")).unwrap();

    a.rebuild(Kind::Company).unwrap();
    assert_eq!(
        b.query(Kind::Company, "Target", Some(1)).matches()[0].label,
        "Target"
    );

    // a's local copy is now behind b's publish
    b.append(Kind::Company, &texts(&["Costco"])).unwrap();
    let report = a.append(Kind::Company, &texts(&["Aldi"])).unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(report.cardinality, 4);

    let store =
        FsArtifactStore::new(dir.path().join(".semindex/store"), Duration::from_secs(1)).unwrap();
    let latest = store.latest_version("company").unwrap().unwrap();
    let status = a.status();
    let company = status.iter().find(|s| s.kind == Kind::Company).unwrap();
    assert_eq!(company.remote_index.as_ref(), Some(&latest));
    assert!(!company.is_stale());
    assert_eq!(company.cardinality, Some(4));
}

#[test]
fn test_corrupt_local_copy_is_refetched() {
    let dir = workspace();
    let settings = worker_settings(dir.path(), ".semindex/cache-a");
    let service = IndexService::from_settings(&settings).unwrap();
    service.rebuild(Kind::Address).unwrap();

    let index_path = dir.path().join(".semindex/cache-a/address_index.vec");
    std::fs::write(&index_path, b"not an index").unwrap();

    let outcome = service.query(Kind::Address, "100 Main St", Some(1));
    assert_eq!(outcome.matches()[0].label, "100 Main St");
    assert_ne!(std::fs::read(&index_path).unwrap(), b"not an index");
}
