//! Id to label lookup table paired with a [`FlatIndex`](crate::vector::FlatIndex).
//!
//! The mapping records the original text embedded for each vector id. It is
//! always persisted next to its index; the pair is only meaningful when the
//! mapping's domain is exactly `0..cardinality`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vector::types::{VectorError, VectorId};

/// Current mapping blob format.
const MAPPING_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    format: u32,
    labels: BTreeMap<u32, String>,
}

impl Default for LabelMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelMapping {
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: MAPPING_FORMAT_VERSION,
            labels: BTreeMap::new(),
        }
    }

    /// Builds a mapping whose ids follow the order of `labels`, starting at 0.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mapping = Self::new();
        for (id, label) in labels.into_iter().enumerate() {
            mapping.labels.insert(id as u32, label.into());
        }
        mapping
    }

    /// Records the labels for freshly assigned ids.
    ///
    /// `ids` and `labels` must have the same length; the caller passes the
    /// ids returned by `FlatIndex::add` for the same batch.
    pub fn extend(&mut self, ids: &[VectorId], labels: &[String]) -> Result<(), VectorError> {
        if ids.len() != labels.len() {
            return Err(VectorError::Serialization(format!(
                "Cannot map {} ids to {} labels",
                ids.len(),
                labels.len()
            )));
        }
        for (id, label) in ids.iter().zip(labels) {
            self.labels.insert(id.get(), label.clone());
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: VectorId) -> Option<&str> {
        self.labels.get(&id.get()).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterates `(id, label)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (VectorId, &str)> {
        self.labels
            .iter()
            .map(|(id, label)| (VectorId::new(*id), label.as_str()))
    }

    /// True when the domain is exactly `0..cardinality`.
    #[must_use]
    pub fn is_paired_with(&self, cardinality: usize) -> bool {
        self.labels.len() == cardinality
            && self
                .labels
                .keys()
                .enumerate()
                .all(|(expected, id)| *id as usize == expected)
    }

    /// Ids in `0..cardinality` without a label, plus labels past the end.
    #[must_use]
    pub fn desync_report(&self, cardinality: usize) -> DesyncReport {
        let missing = (0..cardinality as u32)
            .filter(|id| !self.labels.contains_key(id))
            .count();
        let orphaned = self
            .labels
            .keys()
            .filter(|id| **id as usize >= cardinality)
            .count();
        DesyncReport { missing, orphaned }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, VectorError> {
        serde_json::to_vec(self).map_err(|e| VectorError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        let mapping: Self =
            serde_json::from_slice(bytes).map_err(|e| VectorError::Serialization(e.to_string()))?;
        if mapping.format != MAPPING_FORMAT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: MAPPING_FORMAT_VERSION,
                actual: mapping.format,
            });
        }
        Ok(mapping)
    }
}

/// How far a mapping is from covering an index exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesyncReport {
    /// Index ids with no label.
    pub missing: usize,
    /// Labels whose id is not in the index.
    pub orphaned: usize,
}

impl DesyncReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.orphaned == 0
    }
}
