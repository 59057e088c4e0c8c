use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::duplicates::DEFAULT_DUPLICATE_THRESHOLD;
use crate::semantic::hybrid::{HybridWeights, DEFAULT_SEMANTIC_WEIGHT};
use crate::semantic::preprocess::DEFAULT_MAX_CONTENT_LENGTH;
use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE_NAME: &str = "dedup.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Concurrency bound for batch embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// One worker per available core
    Auto,
    Fixed(usize),
}

/// Configuration for embedding caching and duplicate detection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Weight of semantic similarity in [0.0, 1.0]; lexical weight is 1 - this
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,

    /// Combined score above which a candidate is reported as a duplicate
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,

    /// Parallelism for batch embedding: "auto" or a positive integer
    #[serde(default = "default_embedding_parallelism")]
    pub embedding_parallelism: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Maximum characters of title + description used as canonical text
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            embedding_parallelism: "auto".to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            base_path: PathBuf::new(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_semantic_weight() -> f64 {
    DEFAULT_SEMANTIC_WEIGHT
}

fn default_duplicate_threshold() -> f64 {
    DEFAULT_DUPLICATE_THRESHOLD
}

fn default_embedding_parallelism() -> String {
    "auto".to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_max_content_length() -> usize {
    DEFAULT_MAX_CONTENT_LENGTH
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.semantic_weight) {
            return Err(ConfigError::Invalid(format!(
                "semantic_weight must be between 0.0 and 1.0, got {}",
                self.semantic_weight
            )));
        }

        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err(ConfigError::Invalid(format!(
                "duplicate_threshold must be between 0.0 and 1.0, got {}",
                self.duplicate_threshold
            )));
        }

        // "auto" or positive integer
        if self.embedding_parallelism != "auto" {
            match self.embedding_parallelism.parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::Invalid(format!(
                        "embedding_parallelism must be 'auto' or a positive integer, got '{}'",
                        self.embedding_parallelism
                    )))
                }
                Ok(_) => {}
            }
        }

        if self.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_content_length == 0 {
            return Err(ConfigError::Invalid(
                "max_content_length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load `dedup.yaml` from `base_path`, writing defaults if it is missing.
    pub fn load_with(base_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_path = base_path.as_ref();
        std::fs::create_dir_all(base_path)?;
        let path = base_path.join(CONFIG_FILE_NAME);

        // create new if does not exist
        if !path.exists() {
            log::info!("writing default config to {}", path.display());
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = String::from_utf8(std::fs::read(&path)?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE_NAME), config_str)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn parallelism(&self) -> Parallelism {
        match self.embedding_parallelism.parse::<usize>() {
            Ok(n) if n > 0 => Parallelism::Fixed(n),
            _ => Parallelism::Auto,
        }
    }

    pub fn weights(&self) -> HybridWeights {
        HybridWeights::new(self.semantic_weight)
    }
}
