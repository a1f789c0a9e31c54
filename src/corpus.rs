//! Source corpus providers for full rebuilds.
//!
//! A provider answers one question: which texts currently exist for a kind.
//! Rebuilds recompute each index from this authoritative set, never from a
//! previously published index.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::types::Kind;

/// Supplies the full text set of a kind.
pub trait CorpusProvider: Send + Sync {
    /// Every distinct text of `kind`, in a stable order.
    fn distinct_texts(&self, kind: Kind) -> SyncResult<Vec<String>>;
}

/// One ingested receipt, as read from a corpus file or passed to
/// `IndexService::append_receipt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub address: String,
    /// Line item descriptions
    #[serde(default)]
    pub items: Vec<String>,
}

impl ReceiptRecord {
    /// Texts this receipt contributes to `kind`, skipping empty company and
    /// address fields.
    pub fn texts(&self, kind: Kind) -> Vec<String> {
        match kind {
            Kind::Company if !self.company.trim().is_empty() => vec![self.company.clone()],
            Kind::Address if !self.address.trim().is_empty() => vec![self.address.clone()],
            Kind::ItemDescription => self.items.clone(),
            _ => Vec::new(),
        }
    }
}

/// In-memory corpus; texts are returned exactly as given.
#[derive(Debug, Clone, Default)]
pub struct StaticCorpus {
    texts: BTreeMap<Kind, Vec<String>>,
}

impl StaticCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the texts of `kind`, replacing any previous ones.
    pub fn with<I, S>(mut self, kind: Kind, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.texts
            .insert(kind, texts.into_iter().map(Into::into).collect());
        self
    }
}

impl CorpusProvider for StaticCorpus {
    fn distinct_texts(&self, kind: Kind) -> SyncResult<Vec<String>> {
        Ok(self.texts.get(&kind).cloned().unwrap_or_default())
    }
}

/// Corpus backed by a JSON array of [`ReceiptRecord`]s.
///
/// The file is re-read on every call so each rebuild sees current data. A
/// missing file is an empty corpus.
#[derive(Debug, Clone)]
pub struct JsonCorpus {
    path: PathBuf,
}

impl JsonCorpus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self, kind: Kind) -> SyncResult<Vec<ReceiptRecord>> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "corpus file not found; treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SyncError::CorpusUnavailable {
                    kind,
                    reason: format!("failed to read '{}': {e}", self.path.display()),
                });
            }
        };
        serde_json::from_slice(&content).map_err(|e| SyncError::CorpusUnavailable {
            kind,
            reason: format!("invalid corpus '{}': {e}", self.path.display()),
        })
    }
}

impl CorpusProvider for JsonCorpus {
    fn distinct_texts(&self, kind: Kind) -> SyncResult<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .records(kind)?
            .iter()
            .flat_map(|record| record.texts(kind))
            .filter(|text| seen.insert(text.clone()))
            .collect())
    }
}
