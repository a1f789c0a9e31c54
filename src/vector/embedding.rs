//! Embedding generation for index builds, appends and queries.
//!
//! The core treats the model as an opaque function from a batch of strings
//! to fixed-length vectors. Two generators ship with the crate:
//!
//! - [`FastEmbedGenerator`]: fastembed sentence models (all-MiniLM-L6-v2 by default)
//! - [`HashEmbeddingGenerator`]: deterministic feature hashing, no model download
//!
//! Loading a fastembed model is expensive, so callers obtain generators
//! through [`shared_generator`], which creates at most one instance per model
//! per process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::vector::{VectorDimension, VectorError};

/// Model name that selects [`HashEmbeddingGenerator`].
pub const HASH_MODEL_NAME: &str = "hash";

/// Trait for generating embeddings from text.
///
/// Implementations must be deterministic for a given model and return one
/// vector of [`dimension`](Self::dimension) values per input text.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Name of the underlying model, for logs and cache keys.
    fn model_name(&self) -> &str;
}

/// FastEmbed implementation backed by an ONNX sentence model.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    name: String,
}

impl FastEmbedGenerator {
    /// Loads `model`, downloading it into `cache_dir` on first use.
    ///
    /// The output dimension is probed with a test embedding so that models
    /// other than the 384-wide default work unchanged.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new(model: EmbeddingModel, cache_dir: &Path) -> Result<Self, VectorError> {
        let name = model_to_string(&model);
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(false),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model {name}: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        let probe = text_model
            .embed(vec!["probe".to_string()], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Model probe failed: {e}")))?;
        let width = probe.first().map(Vec::len).unwrap_or_default();
        let dimension = VectorDimension::new(width)?;

        tracing::info!(model = %name, dimension = width, "loaded embedding model");

        Ok(Self {
            model: Mutex::new(text_model),
            dimension,
            name,
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // fastembed expects owned strings
        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Deterministic embedding via hashed character trigrams.
///
/// Identical texts always map to identical unit vectors and texts sharing
/// many trigrams land close together. Useful offline and in tests; it has
/// no semantic knowledge beyond spelling.
#[derive(Debug, Clone)]
pub struct HashEmbeddingGenerator {
    dimension: VectorDimension,
}

impl HashEmbeddingGenerator {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];

        let padded: Vec<char> = format!(" {} ", text.trim().to_lowercase())
            .chars()
            .collect();
        for gram in padded.windows(3) {
            let gram: String = gram.iter().collect();
            let digest = Sha256::digest(gram.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) % dim as u64;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket as usize] += sign;
        }

        // Normalize to unit length (like real sentence embeddings)
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}

impl EmbeddingGenerator for HashEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASH_MODEL_NAME
    }
}

/// Bounds every embedding call by a timeout.
///
/// Each call runs on its own thread; when the deadline passes the caller gets
/// [`VectorError::EmbeddingTimeout`] and the worker thread is left to finish
/// in the background.
pub struct TimedEmbedding {
    inner: Arc<dyn EmbeddingGenerator>,
    timeout: Duration,
}

impl TimedEmbedding {
    pub fn new(inner: Arc<dyn EmbeddingGenerator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl EmbeddingGenerator for TimedEmbedding {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let owned: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        std::thread::Builder::new()
            .name("semindex-embed".to_string())
            .spawn(move || {
                let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
                // Receiver may be gone after a timeout
                let _ = tx.send(inner.generate_embeddings(&refs));
            })
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to spawn worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(VectorError::EmbeddingTimeout(self.timeout))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(
                VectorError::EmbeddingFailed("Embedding worker exited without a result".into()),
            ),
        }
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

static SHARED_GENERATORS: LazyLock<Mutex<HashMap<String, Arc<dyn EmbeddingGenerator>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the process-wide generator for the configured model.
///
/// The first call for a model creates it; later calls reuse the instance.
/// A zero `timeout_secs` disables the timeout wrapper.
pub fn shared_generator(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingGenerator>, VectorError> {
    let key = format!(
        "{}:{}:{}",
        config.model, config.dimension, config.timeout_secs
    );

    let mut generators = SHARED_GENERATORS.lock().map_err(|_| {
        VectorError::EmbeddingFailed("Embedding registry lock poisoned".to_string())
    })?;
    if let Some(existing) = generators.get(&key) {
        return Ok(Arc::clone(existing));
    }

    let base: Arc<dyn EmbeddingGenerator> = if config.model.eq_ignore_ascii_case(HASH_MODEL_NAME)
    {
        Arc::new(HashEmbeddingGenerator::new(VectorDimension::new(
            config.dimension,
        )?))
    } else {
        let model = parse_embedding_model(&config.model)?;
        Arc::new(FastEmbedGenerator::new(model, &config.models_dir)?)
    };

    let generator: Arc<dyn EmbeddingGenerator> = if config.timeout_secs > 0 {
        Arc::new(TimedEmbedding::new(
            base,
            Duration::from_secs(config.timeout_secs),
        ))
    } else {
        base
    };

    generators.insert(key, Arc::clone(&generator));
    Ok(generator)
}

/// Parses a configured model name into a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "ParaphraseMLMiniLML12V2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        other => Err(VectorError::EmbeddingFailed(format!(
            "Unknown embedding model '{other}'. Use AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, ParaphraseMLMiniLML12V2 or {HASH_MODEL_NAME}"
        ))),
    }
}

/// Inverse of [`parse_embedding_model`] for the supported models.
#[must_use]
pub fn model_to_string(model: &EmbeddingModel) -> String {
    match model {
        EmbeddingModel::AllMiniLML6V2 => "AllMiniLML6V2",
        EmbeddingModel::AllMiniLML12V2 => "AllMiniLML12V2",
        EmbeddingModel::BGESmallENV15 => "BGESmallENV15",
        EmbeddingModel::BGEBaseENV15 => "BGEBaseENV15",
        EmbeddingModel::MultilingualE5Small => "MultilingualE5Small",
        EmbeddingModel::ParaphraseMLMiniLML12V2 => "ParaphraseMLMiniLML12V2",
        _ => "custom",
    }
    .to_string()
}

/// Default directory for downloaded model files.
#[must_use]
pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("semindex")
        .join("models")
}
