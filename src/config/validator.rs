use crate::config::Config;
use crate::error::{PoliqError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        // Validate schema version
        Self::validate_schema_version(config, &mut errors);

        // Validate storage settings
        Self::validate_storage(config, &mut errors);

        // Validate embedding settings
        Self::validate_embedding(config, &mut errors);

        // Validate generation settings
        Self::validate_generation(config, &mut errors);

        // Validate index settings
        Self::validate_index(config, &mut errors);

        // Validate retrieval settings
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoliqError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory path cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        // If generation is enabled, the API key must be resolvable
        if config.generation.enabled && config.generation.provider != "ollama" {
            let env_var = &config.generation.api_key_env;
            if let Ok(key) = std::env::var(env_var) {
                if key.is_empty() {
                    errors.push(ValidationError::new(
                        "generation.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
            } else {
                errors.push(ValidationError::new(
                    "generation.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                ));
            }
        }

        // Validate temperature range
        let temp = config.generation.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "generation.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        // Validate provider
        let provider = &config.generation.provider;
        let valid_providers = ["groq", "openai", "ollama"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "generation.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.generation.max_new_tokens == 0 {
            errors.push(ValidationError::new(
                "generation.max_new_tokens",
                "max_new_tokens must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.vector_dim == 0 {
            errors.push(ValidationError::new(
                "index.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.max_results == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_results",
                "max_results must be greater than 0",
            ));
        }

        let min_score = config.retrieval.default_min_score;
        if !(0.0..=1.0).contains(&min_score) {
            errors.push(ValidationError::new(
                "retrieval.default_min_score",
                format!("default_min_score must be in [0.0, 1.0], got {}", min_score),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_empty_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::new();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.generation.provider = "invalid".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_min_score_out_of_range() {
        let mut config = Config::default();
        config.retrieval.default_min_score = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
