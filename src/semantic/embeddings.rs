//! Embedding provider abstraction and adapter.
//!
//! The adapter sits between the cache and whatever produces vectors:
//! - Rejects blank text
//! - Normalizes text before hashing and before calling the provider
//! - Treats "no model available" as a legitimate `Ok(None)` outcome
//! - Batch generation with per-item failure isolation

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::semantic::preprocess::{hash_normalized, normalize_text};

/// Error type for embedding operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Text is empty after normalization")]
    EmptyText,

    #[error("Provider returned no vector for: {0}")]
    GenerationFailed(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),
}

/// A vector derived from a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f64>,
    /// Raw text as supplied by the caller, kept for audit
    pub source_text: String,
    /// Hex SHA-256 of the normalized text
    pub content_hash: String,
    pub model_identifier: String,
    pub generated_at: DateTime<Utc>,
}

impl Embedding {
    pub fn dimensionality(&self) -> usize {
        self.vector.len()
    }

    /// Whether two embeddings live in the same vector space.
    pub fn is_comparable(&self, other: &Embedding) -> bool {
        self.model_identifier == other.model_identifier
            && self.dimensionality() == other.dimensionality()
    }
}

/// Something that turns normalized text into a vector.
///
/// `Ok(None)` means the provider has no model for this input (for example an
/// unsupported language). Implementations must be safe to call from several
/// threads at once; wrap non re-entrant models in a `Mutex`.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the model producing the vectors.
    fn model_identifier(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<P> {
    fn model_identifier(&self) -> &str {
        (**self).model_identifier()
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        (**self).embed(text)
    }
}

/// Normalized text plus its hash, computed once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedText {
    pub normalized: String,
    pub content_hash: String,
}

/// Wraps an [`EmbeddingProvider`] and produces [`Embedding`] values.
pub struct EmbeddingAdapter<P> {
    provider: P,
}

impl<P: EmbeddingProvider> EmbeddingAdapter<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn model_identifier(&self) -> &str {
        self.provider.model_identifier()
    }

    /// Normalize and hash text without touching the provider.
    pub fn prepare(&self, text: &str) -> Result<PreparedText, EmbeddingError> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        let content_hash = hash_normalized(&normalized);
        Ok(PreparedText {
            normalized,
            content_hash,
        })
    }

    /// Generate an embedding for a single text.
    pub fn generate(&self, text: &str) -> Result<Option<Embedding>, EmbeddingError> {
        let prepared = self.prepare(text)?;
        self.generate_prepared(text, &prepared)
    }

    pub(crate) fn generate_prepared(
        &self,
        text: &str,
        prepared: &PreparedText,
    ) -> Result<Option<Embedding>, EmbeddingError> {
        let vector = match self.provider.embed(&prepared.normalized)? {
            Some(vector) => vector,
            None => {
                log::debug!(
                    "model '{}' unavailable for input, skipping embedding",
                    self.model_identifier()
                );
                return Ok(None);
            }
        };

        // Vectors are persisted as f32; anything that does not fit is unusable
        if vector.is_empty() || vector.iter().any(|x| !(*x as f32).is_finite()) {
            return Err(EmbeddingError::GenerationFailed(text.to_string()));
        }

        Ok(Some(Embedding {
            vector,
            source_text: text.to_string(),
            content_hash: prepared.content_hash.clone(),
            model_identifier: self.model_identifier().to_string(),
            generated_at: Utc::now(),
        }))
    }

    /// Generate embeddings for multiple texts.
    ///
    /// Output order matches input order. A failing item becomes `None` and
    /// does not affect the others. Runs on the current rayon pool.
    pub fn generate_batch(&self, texts: &[String]) -> Vec<Option<Embedding>> {
        texts
            .par_iter()
            .enumerate()
            .map(|(idx, text)| match self.generate(text) {
                Ok(embedding) => embedding,
                Err(e) => {
                    log::warn!("batch item {idx} failed to embed: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(feature = "fastembed")]
pub use self::local::FastEmbedProvider;

/// Run `init` on its own thread and give up waiting after `timeout`.
///
/// A timed-out worker is detached, not killed; it finishes or fails in the
/// background and its result is dropped.
#[cfg_attr(not(feature = "fastembed"), allow(dead_code))]
fn init_with_timeout<T, F>(timeout: Duration, init: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("embedding-model-init".to_string())
        .spawn(move || {
            let _ = tx.send(init());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to spawn init thread: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::DownloadTimeout(timeout.as_secs())),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "Model initialization thread panicked".to_string(),
        )),
    }
}

#[cfg(feature = "fastembed")]
mod local {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use fastembed::{InitOptions, TextEmbedding};

    use super::{EmbeddingError, EmbeddingProvider};

    /// Default download timeout for model files (5 minutes)
    const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

    /// On-device provider backed by fastembed.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct FastEmbedProvider {
        model: Mutex<TextEmbedding>,
        model_name: String,
        dimensions: usize,
    }

    impl FastEmbedProvider {
        /// Load (downloading on first use) the named model.
        /// Models are cached in the `models/` subdirectory of `cache_dir`.
        pub fn new(
            model_name: &str,
            cache_dir: PathBuf,
            download_timeout: Option<Duration>,
        ) -> Result<Self, EmbeddingError> {
            let model_enum = Self::parse_model_name(model_name)?;
            let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);

            let mut model = super::init_with_timeout(timeout, move || {
                TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
            })?;

            let dimensions = Self::probe_dimensions(&mut model)?;
            log::info!("loaded embedding model '{model_name}' ({dimensions} dimensions)");

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
                dimensions,
            })
        }

        pub fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
            match name.to_lowercase().as_str() {
                "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
                "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
                "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
                "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
                _ => Err(EmbeddingError::InvalidModel(format!(
                    "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                    name
                ))),
            }
        }

        fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
            let test_embeddings = model.embed(vec!["test"], None).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e))
            })?;

            test_embeddings
                .first()
                .map(|v| v.len())
                .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
        }
    }

    impl EmbeddingProvider for FastEmbedProvider {
        fn model_identifier(&self) -> &str {
            &self.model_name
        }

        fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
            let mut model = self.model.lock().map_err(|e| {
                EmbeddingError::Provider(format!("Failed to acquire model lock: {}", e))
            })?;

            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

            embeddings
                .into_iter()
                .next()
                .map(|v| Some(v.into_iter().map(f64::from).collect()))
                .ok_or_else(|| EmbeddingError::GenerationFailed(text.to_string()))
        }
    }

}
