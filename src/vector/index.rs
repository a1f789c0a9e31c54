//! Exact nearest-neighbor index over squared Euclidean distance.
//!
//! Vectors live in one contiguous `f32` buffer in insertion order, so a
//! vector's id is simply its row number. This keeps ids and label mapping
//! keys trivially aligned: the next id is always the current cardinality.
//!
//! # Blob Format
//!
//! - Header (16 bytes): magic `SVIX`, format version, dimension, vector count
//! - Vectors: `count * dimension` little-endian f32 values
//!
//! Decoding checks the header and the exact payload length, so a truncated
//! or foreign file is rejected instead of producing a short index.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::vector::types::{VectorDimension, VectorError, VectorId};

/// Current blob format version.
const INDEX_FORMAT_VERSION: u32 = 1;

/// Size of the blob header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify index blobs.
const MAGIC_BYTES: &[u8; 4] = b"SVIX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Above this many vectors, distances are computed on the rayon pool.
const PARALLEL_SEARCH_THRESHOLD: usize = 4096;

/// Flat (brute force) vector index with sequential ids.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: VectorDimension,
    /// Row-major vector data, `cardinality * dimension` values.
    data: Vec<f32>,
}

impl FlatIndex {
    /// Creates an empty index. An empty index is a valid artifact.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of vectors stored.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends vectors and returns the ids assigned to them.
    ///
    /// Ids are contiguous and start at the cardinality before the call.
    /// The batch is validated up front; on error nothing is added.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<VectorId>, VectorError> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }

        let start = self.cardinality();
        let end = start + vectors.len();
        if end > u32::MAX as usize {
            return Err(VectorError::CapacityExceeded(end));
        }

        self.data.reserve(vectors.len() * self.dimension.get());
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }

        Ok((start..end).map(|id| VectorId::new(id as u32)).collect())
    }

    /// Returns the stored vector for `id`, if present.
    #[must_use]
    pub fn vector(&self, id: VectorId) -> Option<&[f32]> {
        let dim = self.dimension.get();
        let offset = id.as_index().checked_mul(dim)?;
        self.data.get(offset..offset + dim)
    }

    /// Finds the `k` nearest vectors to `query`.
    ///
    /// Results are ordered by ascending squared distance; equal distances
    /// keep insertion order. Returns fewer than `k` entries when the index
    /// holds fewer vectors, and nothing for an empty index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(VectorId, f32)>, VectorError> {
        self.dimension.validate_vector(query)?;

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let dim = self.dimension.get();
        let distance = |(row, vector): (usize, &[f32])| {
            (VectorId::new(row as u32), squared_l2(query, vector))
        };

        let mut scored: Vec<(VectorId, f32)> = if self.cardinality() >= PARALLEL_SEARCH_THRESHOLD {
            self.data
                .par_chunks_exact(dim)
                .enumerate()
                .map(distance)
                .collect()
        } else {
            self.data.chunks_exact(dim).enumerate().map(distance).collect()
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_hits);
            scored.truncate(k);
        }
        scored.sort_by(compare_hits);

        Ok(scored)
    }

    /// Serializes the index into its blob format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len() * BYTES_PER_F32);
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension.get() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.cardinality() as u32).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Decodes an index blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VectorError::Serialization(format!(
                "Index blob too small: {} bytes",
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC_BYTES {
            return Err(VectorError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = read_u32(bytes, 4);
        if version != INDEX_FORMAT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: INDEX_FORMAT_VERSION,
                actual: version,
            });
        }

        let dimension = VectorDimension::new(read_u32(bytes, 8) as usize)?;
        let count = read_u32(bytes, 12) as usize;

        let expected_len = count
            .checked_mul(dimension.get())
            .and_then(|values| values.checked_mul(BYTES_PER_F32))
            .and_then(|payload| payload.checked_add(HEADER_SIZE))
            .ok_or_else(|| {
                VectorError::Serialization(format!(
                    "Header describes an impossible payload: {count} x {}",
                    dimension.get()
                ))
            })?;
        if bytes.len() != expected_len {
            return Err(VectorError::Serialization(format!(
                "Index blob length {} does not match header (expected {expected_len})",
                bytes.len()
            )));
        }

        let data = bytes[HEADER_SIZE..]
            .chunks_exact(BYTES_PER_F32)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self { dimension, data })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn compare_hits(a: &(VectorId, f32), b: &(VectorId, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}
