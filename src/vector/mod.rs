//! Vector index, label mapping and embedding generation.
//!
//! A kind's searchable state is a ([`FlatIndex`], [`LabelMapping`]) pair.
//! Both are plain in-memory values with their own blob codecs; loading,
//! persisting and publishing them is the job of [`crate::cache`].

mod embedding;
mod index;
mod mapping;
mod types;

pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, HASH_MODEL_NAME, HashEmbeddingGenerator,
    TimedEmbedding, default_models_dir, model_to_string, parse_embedding_model,
    shared_generator,
};
pub use index::FlatIndex;
pub use mapping::{DesyncReport, LabelMapping};
pub use types::{Similarity, VECTOR_DIMENSION_384, VectorDimension, VectorError, VectorId};
