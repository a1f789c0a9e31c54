//! Error types for index synchronization and querying
//!
//! Builders and appenders fail loudly with these errors and never leave a
//! partial publish behind. The query engine converts them into a per-kind
//! "unavailable" outcome instead of propagating them.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;
use crate::types::Kind;
use crate::vector::VectorError;

/// Main error type for rebuild, append, cache and publish operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The embedding provider failed or timed out
    #[error("Embedding provider unavailable for {kind}: {source}")]
    EmbeddingUnavailable {
        kind: Kind,
        #[source]
        source: VectorError,
    },

    /// The configured embedding model could not be loaded
    #[error("Embedding model '{model}' could not be loaded: {source}")]
    ModelUnavailable {
        model: String,
        #[source]
        source: VectorError,
    },

    /// An upload, promote or download against the artifact store failed
    #[error("Artifact store unavailable during {operation} for {kind}: {source}")]
    StoreUnavailable {
        kind: Kind,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// No local copy exists and the remote fetch failed
    #[error("No cached artifacts for {kind} and the remote fetch failed: {source}")]
    CacheUnavailable {
        kind: Kind,
        #[source]
        source: StoreError,
    },

    /// A local blob failed to deserialize
    #[error("Cached {artifact} for {kind} at '{path}' is corrupt: {reason}")]
    CacheCorrupt {
        kind: Kind,
        artifact: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Optimistic publish kept losing to concurrent writers
    #[error("Latest version of {kind} kept moving during publish; gave up after {attempts} attempts")]
    VersionConflict { kind: Kind, attempts: u32 },

    /// Dimension mismatches and other vector-level failures
    #[error("Vector operation failed for {kind}: {source}")]
    Vector {
        kind: Kind,
        #[source]
        source: VectorError,
    },

    /// The source corpus could not be read
    #[error("Source corpus unavailable for {kind}: {reason}")]
    CorpusUnavailable { kind: Kind, reason: String },

    /// Local cache file system errors
    #[error("Cache I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl SyncError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::EmbeddingUnavailable { .. } => "EMBEDDING_UNAVAILABLE",
            Self::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::CacheUnavailable { .. } => "CACHE_UNAVAILABLE",
            Self::CacheCorrupt { .. } => "CACHE_CORRUPT",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::Vector { .. } => "VECTOR_ERROR",
            Self::CorpusUnavailable { .. } => "CORPUS_UNAVAILABLE",
            Self::Io { .. } => "CACHE_IO_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::EmbeddingUnavailable { .. } => vec![
                "Nothing was published; the previous latest version is still served",
                "Check the embedding model download or raise embedding.timeout_secs",
            ],
            Self::ModelUnavailable { .. } => vec![
                "Ensure you have internet connection for the first model download",
                "Set embedding.model = \"hash\" to run without a downloaded model",
            ],
            Self::StoreUnavailable { .. } => vec![
                "Nothing was promoted; retry once the artifact store is reachable",
                "Uploaded but unpromoted versions are harmless and can be pruned",
            ],
            Self::CacheUnavailable { .. } => vec![
                "Run 'semindex rebuild' if this kind has never been published",
                "Check connectivity to the artifact store",
            ],
            Self::CacheCorrupt { .. } => vec![
                "The entry will be re-downloaded on the next operation",
                "Delete the cache directory if the problem persists",
            ],
            Self::VersionConflict { .. } => vec![
                "Another writer published concurrently; retry the append",
                "Raise publish.max_retries if appends are frequent",
            ],
            Self::Vector { .. } => vec![
                "Ensure the same embedding model built the index and embeds new text",
                "Run 'semindex rebuild' after changing embedding.model",
            ],
            Self::CorpusUnavailable { .. } => vec![
                "Check corpus.path points at a readable JSON corpus",
            ],
            Self::Io { .. } => vec![
                "Check disk space and permissions for cache.dir",
            ],
            Self::Config { .. } => vec![
                "Run 'semindex init --force' to regenerate settings.toml",
            ],
        }
    }

    /// True when a concurrent writer, not a failure, caused the error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
