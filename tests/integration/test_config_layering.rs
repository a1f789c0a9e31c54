//! Generated template, file overrides and environment overrides.

use semindex::{PublishMode, Settings};
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_init_template_loads_as_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = Settings::init_config_file_in(temp_dir.path(), false).unwrap();
    assert_eq!(path, temp_dir.path().join(".semindex/settings.toml"));

    let loaded = Settings::load_from(&path).unwrap();
    let defaults = Settings::default();
    assert_eq!(loaded.cache.dir, defaults.cache.dir);
    assert_eq!(loaded.store.root, defaults.store.root);
    assert_eq!(loaded.embedding.model, defaults.embedding.model);
    assert_eq!(loaded.publish.mode, PublishMode::Optimistic);
    assert_eq!(loaded.rebuild.interval_secs, 86_400);
    assert_eq!(loaded.corpus.path, PathBuf::from(".semindex/corpus.json"));

    // A second init without force leaves the file alone
    assert!(Settings::init_config_file_in(temp_dir.path(), false).is_err());
    assert!(Settings::init_config_file_in(temp_dir.path(), true).is_ok());
}

#[test]
fn test_publish_mode_from_environment() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.toml");
    std::fs::write(&path, "[publish]\nmode = \"optimistic\"\nmax_retries = 2\n").unwrap();

    unsafe {
        std::env::set_var("SEMINDEX_PUBLISH__MODE", "last_write_wins");
    }
    let settings = Settings::load_from(&path);
    unsafe {
        std::env::remove_var("SEMINDEX_PUBLISH__MODE");
    }

    let settings = settings.unwrap();
    assert_eq!(settings.publish.mode, PublishMode::LastWriteWins);
    assert_eq!(settings.publish.max_retries, 2);
}

#[test]
fn test_relative_paths_resolve_against_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.workspace_root = Some(temp_dir.path().to_path_buf());
    settings.store.root = PathBuf::from("/srv/semindex/store");

    assert_eq!(settings.cache_dir(), temp_dir.path().join(".semindex/cache"));
    assert_eq!(settings.store_root(), PathBuf::from("/srv/semindex/store"));
    assert_eq!(
        settings.corpus_path(),
        temp_dir.path().join(".semindex/corpus.json")
    );
}
