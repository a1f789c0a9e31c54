//! Nearest-label queries over the cached indexes.
//!
//! Queries never fail a caller: when a kind's artifacts cannot be loaded,
//! or the query text cannot be embedded, that kind reports
//! [`QueryOutcome::Unavailable`] and other kinds are still answered.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CachedIndex, LocalCache};
use crate::indexing::builder::embed_batch;
use crate::types::Kind;
use crate::vector::{EmbeddingGenerator, Similarity};

/// A known label and how close it is to the query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMatch {
    pub label: String,
    /// `1 / (1 + distance)`, in `(0, 1]`
    pub similarity: f32,
}

/// Result of querying one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Up to k labels, closest first
    Matches(Vec<LabelMatch>),
    /// The kind could not be queried
    Unavailable { reason: String },
}

impl QueryOutcome {
    /// The matches, empty when unavailable.
    pub fn matches(&self) -> &[LabelMatch] {
        match self {
            QueryOutcome::Matches(matches) => matches,
            QueryOutcome::Unavailable { .. } => &[],
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, QueryOutcome::Matches(_))
    }
}

impl Default for QueryOutcome {
    fn default() -> Self {
        QueryOutcome::Matches(Vec::new())
    }
}

/// Terms extracted from a user question, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTerms {
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

impl SearchTerms {
    /// Terms to look up in `kind`.
    pub fn terms(&self, kind: Kind) -> &[String] {
        match kind {
            Kind::Company => &self.companies,
            Kind::Address => &self.addresses,
            Kind::ItemDescription => &self.items,
        }
    }

    pub fn is_empty(&self) -> bool {
        Kind::ALL.iter().all(|kind| self.terms(*kind).is_empty())
    }
}

/// Matches for every term of every category, concatenated per category in
/// term order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub companies: QueryOutcome,
    pub addresses: QueryOutcome,
    pub items: QueryOutcome,
}

impl SearchResults {
    pub fn get(&self, kind: Kind) -> &QueryOutcome {
        match kind {
            Kind::Company => &self.companies,
            Kind::Address => &self.addresses,
            Kind::ItemDescription => &self.items,
        }
    }

    /// Replaces the outcome recorded for `kind`.
    pub fn set(&mut self, kind: Kind, outcome: QueryOutcome) {
        *self.slot(kind) = outcome;
    }

    fn slot(&mut self, kind: Kind) -> &mut QueryOutcome {
        match kind {
            Kind::Company => &mut self.companies,
            Kind::Address => &mut self.addresses,
            Kind::ItemDescription => &mut self.items,
        }
    }

    pub fn is_empty(&self) -> bool {
        Kind::ALL.iter().all(|kind| self.get(*kind).matches().is_empty())
    }
}

/// Plain-text summary handed to a language model as context.
impl fmt::Display for SearchResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections = [
            ("companies", &self.companies),
            ("addresses", &self.addresses),
            ("items", &self.items),
        ];
        let mut first = true;
        for (name, outcome) in sections {
            let matches = outcome.matches();
            if matches.is_empty() {
                continue;
            }
            if !first {
                writeln!(f)?;
            }
            first = false;
            writeln!(f, "Similar {name} found in database:")?;
            for m in matches {
                writeln!(f, "- {} (similarity: {:.4})", m.label, m.similarity)?;
            }
        }
        Ok(())
    }
}

pub struct QueryEngine {
    cache: Arc<LocalCache>,
    embedder: Arc<dyn EmbeddingGenerator>,
}

impl QueryEngine {
    pub fn new(cache: Arc<LocalCache>, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self { cache, embedder }
    }

    /// Up to `k` labels of `kind` closest to `text`, closest first.
    pub fn query(&self, kind: Kind, text: &str, k: usize) -> QueryOutcome {
        self.query_terms(kind, &[text.to_string()], k)
    }

    /// Queries every term of every category with `k` neighbors per term.
    ///
    /// Categories without terms are left empty and never touch the cache.
    pub fn search(&self, terms: &SearchTerms, k: usize) -> SearchResults {
        let mut results = SearchResults::default();
        for kind in Kind::ALL {
            let kind_terms = terms.terms(kind);
            if !kind_terms.is_empty() {
                results.set(kind, self.query_terms(kind, kind_terms, k));
            }
        }
        results
    }

    /// Loads `kind` once and answers each term in order, concatenating.
    pub fn query_terms(&self, kind: Kind, terms: &[String], k: usize) -> QueryOutcome {
        let cached = match self.cache.checkout(kind) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(%kind, "kind unavailable for query: {e}");
                return QueryOutcome::Unavailable {
                    reason: e.to_string(),
                };
            }
        };
        if k == 0 || cached.index.is_empty() {
            return QueryOutcome::Matches(Vec::new());
        }

        let vectors = match embed_batch(self.embedder.as_ref(), kind, terms) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(%kind, "failed to embed query: {e}");
                return QueryOutcome::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let mut matches = Vec::new();
        for vector in &vectors {
            match nearest_labels(kind, &cached, vector, k) {
                Ok(found) => matches.extend(found),
                Err(reason) => {
                    warn!(%kind, "query failed: {reason}");
                    return QueryOutcome::Unavailable { reason };
                }
            }
        }
        QueryOutcome::Matches(matches)
    }
}

fn nearest_labels(
    kind: Kind,
    cached: &CachedIndex,
    vector: &[f32],
    k: usize,
) -> Result<Vec<LabelMatch>, String> {
    let hits = cached
        .index
        .search(vector, k)
        .map_err(|e| e.to_string())?;

    let mut matches = Vec::with_capacity(hits.len());
    for (id, distance) in hits {
        let Some(label) = cached.mapping.get(id) else {
            debug!(%kind, %id, "skipping id without a label");
            continue;
        };
        let similarity = Similarity::from_distance(distance).map_err(|e| e.to_string())?;
        matches.push(LabelMatch {
            label: label.to_string(),
            similarity: similarity.get(),
        });
    }
    Ok(matches)
}
