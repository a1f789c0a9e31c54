//! Type-safe wrappers and core types for the vector index.
//!
//! Newtypes keep vector ids, dimensions and similarities from being mixed up
//! with plain integers and floats at API boundaries.

use thiserror::Error;

/// Dimension of the default embedding model (all-MiniLM-L6-v2).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Sequential vector id.
///
/// Ids equal the vector's insertion rank: they start at 0, have no gaps
/// and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VectorId(u32);

impl VectorId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Position of this vector inside the index storage.
    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Similarity derived from a distance via `1 / (1 + distance)`.
///
/// Always in `(0.0, 1.0]`; 1.0 means the query vector is identical to the
/// stored vector. Used for ranking and display only, not a probability.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Similarity(f32);

impl Similarity {
    /// Converts a non-negative distance into a similarity.
    pub fn from_distance(distance: f32) -> Result<Self, VectorError> {
        if distance.is_nan() || distance < 0.0 {
            return Err(VectorError::InvalidDistance(distance));
        }
        Ok(Self(1.0 / (1.0 + distance)))
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Validated at construction so a zero-width index can never exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors of a kind use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid distance value: {0}\nReason: distances must be non-negative numbers")]
    InvalidDistance(f32),

    #[error(
        "Index is full: {0} vectors\nSuggestion: Vector ids are 32-bit; split the corpus or rebuild"
    )]
    CapacityExceeded(usize),

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Embedding timed out after {0:?}\nSuggestion: Raise embedding.timeout_secs or embed smaller batches"
    )]
    EmbeddingTimeout(std::time::Duration),

    #[error(
        "Serialization error: {0}\nSuggestion: Check that vector data is valid and not corrupted"
    )]
    Serialization(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version of semindex"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}
