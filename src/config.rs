//! Configuration module for the receipt index synchronizer.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SEMINDEX_` and use double
//! underscores to separate nested levels:
//! - `SEMINDEX_PUBLISH__MODE=last_write_wins` sets `publish.mode`
//! - `SEMINDEX_EMBEDDING__MODEL=hash` sets `embedding.model`
//! - `SEMINDEX_CACHE__REVALIDATE_SECS=0` sets `cache.revalidate_secs`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".semindex";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "SEMINDEX_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .semindex is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Local cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Artifact store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Publish concurrency settings
    #[serde(default)]
    pub publish: PublishConfig,

    /// Query settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Full rebuild settings
    #[serde(default)]
    pub rebuild: RebuildConfig,

    /// Source corpus settings
    #[serde(default)]
    pub corpus: CorpusConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Directory holding the local copies of each kind
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Compare the cached versions against the store at most this often
    #[serde(default = "default_true")]
    pub revalidate: bool,

    /// Seconds between staleness checks; 0 checks on every operation
    #[serde(default = "default_revalidate_secs")]
    pub revalidate_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// Root directory of the filesystem artifact store
    #[serde(default = "default_store_root")]
    pub root: PathBuf,

    /// How long a promote waits for another writer's lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// fastembed model name, or "hash" for the offline generator
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Output width of the hash generator (fastembed models report their own)
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts embedded per call during a full rebuild
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-call embedding timeout in seconds; 0 disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Where fastembed downloads model files
    #[serde(default = "crate::vector::default_models_dir")]
    pub models_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Promote only if latest has not moved since it was read; re-merge on conflict
    #[default]
    Optimistic,
    /// Promote unconditionally; a concurrent append may be lost
    LastWriteWins,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublishConfig {
    /// How appends promote new versions
    #[serde(default)]
    pub mode: PublishMode,

    /// Re-merge attempts after a conflicting optimistic promote
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// Neighbors returned per term when no k is given
    #[serde(default = "default_k")]
    pub default_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RebuildConfig {
    /// Rebuild the three kinds concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Scheduler period in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorpusConfig {
    /// JSON file of receipt records read by full rebuilds
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".semindex/cache")
}
fn default_revalidate_secs() -> u64 {
    300
}
fn default_store_root() -> PathBuf {
    PathBuf::from(".semindex/store")
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_384
}
fn default_batch_size() -> usize {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_k() -> usize {
    5
}
fn default_interval_secs() -> u64 {
    86_400
}
fn default_corpus_path() -> PathBuf {
    PathBuf::from(".semindex/corpus.json")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            debug: false,
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            publish: PublishConfig::default(),
            query: QueryConfig::default(),
            rebuild: RebuildConfig::default(),
            corpus: CorpusConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            revalidate: true,
            revalidate_secs: default_revalidate_secs(),
        }
    }
}

impl CacheConfig {
    /// Staleness check interval, `None` when revalidation is disabled.
    pub fn revalidate_interval(&self) -> Option<Duration> {
        self.revalidate
            .then(|| Duration::from_secs(self.revalidate_secs))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            models_dir: crate::vector::default_models_dir(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::default(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
        }
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .semindex directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore stays
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for a .semindex directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .semindex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolves a configured path against the workspace root.
    ///
    /// Absolute paths are returned unchanged; relative ones are joined onto
    /// the workspace root when one was detected.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.resolve_path(&self.cache.dir)
    }

    pub fn store_root(&self) -> PathBuf {
        self.resolve_path(&self.store.root)
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.resolve_path(&self.corpus.path)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    /// Writes the commented template under `<dir>/.semindex/settings.toml`.
    pub fn init_config_file_in(
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# semindex configuration file

# Version of the configuration schema
version = 1

# Global debug mode (debug-level logs)
debug = false

[cache]
# Local copies of each kind's index and mapping (relative to workspace root)
dir = ".semindex/cache"
# Check whether the store moved past the cached versions
revalidate = true
# Seconds between checks; 0 checks on every operation
revalidate_secs = 300

[store]
# Root of the versioned artifact store shared by all workers
root = ".semindex/store"
# How long a promote waits for another writer's lock (milliseconds)
lock_timeout_ms = 5000

[embedding]
# fastembed model (AllMiniLML6V2, BGESmallENV15, MultilingualE5Small, ...)
# or "hash" for the offline feature-hashing generator
model = "AllMiniLML6V2"
# Output width of the hash generator
dimension = 384
# Texts embedded per call during a full rebuild
batch_size = 1000
# Per-call timeout in seconds; 0 disables it
timeout_secs = 60
# Model download directory
models_dir = "{}"

[publish]
# "optimistic": promote only if latest is unchanged, re-merge on conflict
# "last_write_wins": promote unconditionally
mode = "optimistic"
max_retries = 3

[query]
# Neighbors returned per term
default_k = 5

[rebuild]
# Rebuild company, address and item_description concurrently
parallel = true
# Scheduler period in seconds
interval_secs = 86400

[corpus]
# JSON array of receipt records read by full rebuilds
path = ".semindex/corpus.json"
"#,
            crate::vector::default_models_dir().display()
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}
