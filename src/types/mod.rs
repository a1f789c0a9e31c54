//! Core identifiers shared across the index, cache and store layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the independent semantic-search domains.
///
/// Each kind owns its own vector index, label mapping and cache entry.
/// Kinds never interact with one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Company,
    Address,
    ItemDescription,
}

impl Kind {
    /// Every kind, in rebuild order.
    pub const ALL: [Kind; 3] = [Kind::Company, Kind::Address, Kind::ItemDescription];

    /// Stable lowercase name, also used as the index artifact key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Kind::Company => "company",
            Kind::Address => "address",
            Kind::ItemDescription => "item_description",
        }
    }

    /// Artifact store key for the index blob.
    #[must_use]
    pub fn index_key(&self) -> String {
        self.as_str().to_string()
    }

    /// Artifact store key for the label mapping blob.
    #[must_use]
    pub fn mapping_key(&self) -> String {
        format!("{}_mapping", self.as_str())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown kind '{0}'. Expected one of: company, address, item_description")]
pub struct UnknownKind(pub String);

impl FromStr for Kind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" | "companies" => Ok(Kind::Company),
            "address" | "addresses" => Ok(Kind::Address),
            // The chatbot layer refers to this kind as "item"
            "item_description" | "item" | "items" => Ok(Kind::ItemDescription),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// Opaque version identifier minted by an artifact store at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Wraps a store-minted identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
