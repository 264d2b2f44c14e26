//! Configuration management for poliq
//!
//! Handles loading, validation, and persistence of the TOML configuration,
//! with environment variable overrides in the form `POLIQ_SECTION__KEY`.

use crate::error::{PoliqError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g. "all-MiniLM-L6-v2")
    pub model: String,
    /// Batch size for encoding clause texts at ingest time
    pub batch_size: usize,
}

/// Generation (LLM) configuration for claim analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub enabled: bool,
    /// Provider name: "groq", "openai" or "ollama"
    pub provider: String,
    /// Override for the provider's API base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    /// Upper bound on generated tokens per analysis
    pub max_new_tokens: usize,
    /// Hard timeout for a single generation request
    pub request_timeout_secs: u64,
}

impl GenerationConfig {
    /// Resolve the chat-completions endpoint for the configured provider
    pub fn endpoint(&self) -> String {
        let base = self.base_url.clone().unwrap_or_else(|| {
            match self.provider.as_str() {
                "groq" => "https://api.groq.com/openai/v1".to_string(),
                "openai" => "https://api.openai.com/v1".to_string(),
                "ollama" => "http://localhost:11434/v1".to_string(),
                other => format!("http://localhost:11434/{}", other),
            }
        });
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimension (must match the embedding model)
    pub vector_dim: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Ceiling on max_results; larger requests are clamped, not rejected
    pub max_results: usize,
    /// Default relevance threshold when the caller supplies none
    pub default_min_score: f32,
    /// Timeout for encoding the query text
    pub embed_timeout_secs: u64,
    /// Timeout for the nearest-neighbor query
    pub query_timeout_secs: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PoliqError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PoliqError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PoliqError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: POLIQ_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("POLIQ_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "GENERATION__ENABLED" => {
                self.generation.enabled =
                    value.parse().map_err(|_| PoliqError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "GENERATION__MODEL" => {
                self.generation.model = value.to_string();
            }
            "GENERATION__PROVIDER" => {
                self.generation.provider = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "RETRIEVAL__MAX_RESULTS" => {
                self.retrieval.max_results =
                    value.parse().map_err(|_| PoliqError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PoliqError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("poliq").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| PoliqError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".poliq"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.poliq"),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            generation: GenerationConfig {
                enabled: false,
                provider: "groq".to_string(),
                base_url: None,
                api_key_env: "GROQ_API_KEY".to_string(),
                model: "llama-3.1-70b".to_string(),
                temperature: 0.7,
                max_new_tokens: 256,
                request_timeout_secs: 60,
            },
            index: IndexConfig { vector_dim: 384 },
            retrieval: RetrievalConfig {
                max_results: 50,
                default_min_score: 0.0,
                embed_timeout_secs: 30,
                query_timeout_secs: 10,
            },
        }
    }
}
