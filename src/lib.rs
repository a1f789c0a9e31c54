//! Vector index synchronization and querying for receipt semantic search.
//!
//! Each [`Kind`] owns a flat vector index and a label mapping, published
//! as a versioned pair through an [`store::ArtifactStore`] and served from
//! a [`cache::LocalCache`]. [`IndexService`] is the entry point callers use.

pub mod cache;
pub mod config;
pub mod corpus;
pub mod display;
pub mod error;
pub mod exit_code;
pub mod indexing;
pub mod query;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use cache::{CacheEntry, CacheStatus, LocalCache, Precondition, PublishedVersions};
pub use config::{PublishMode, Settings};
pub use corpus::{CorpusProvider, JsonCorpus, ReceiptRecord, StaticCorpus};
pub use error::{SyncError, SyncResult};
pub use indexing::{AppendReport, IncrementalAppender, IndexBuilder, RebuildReport};
pub use query::{LabelMatch, QueryEngine, QueryOutcome, SearchResults, SearchTerms};
pub use scheduler::{CycleSummary, RebuildScheduler};
pub use service::{IndexService, KindStatus};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, StoreError};
pub use types::{Kind, VersionId};
pub use vector::{EmbeddingGenerator, FlatIndex, HashEmbeddingGenerator, LabelMapping, VectorId};
