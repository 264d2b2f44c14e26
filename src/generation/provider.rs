/// Generation backend trait and OpenAI-compatible HTTP implementation
use crate::config::GenerationConfig;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation backend not initialized")]
    NotInitialized,

    #[error("Generation backend initialization failed: {0}")]
    InitializationError(String),

    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    #[error("Generation request timed out")]
    Timeout,

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),
}

/// Trait for generation backends
///
/// `generate` is blocking; callers run it off the async dispatch path. The
/// prompt carries all grounding context, the backend adds nothing.
pub trait GenerationBackend: Send + Sync {
    /// Prepare the backend (resolve credentials, build the client)
    fn initialize(&self) -> Result<(), GenerationError>;

    /// Produce free text from a prompt, bounded to `max_tokens` output tokens
    fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

struct HttpClient {
    client: reqwest::blocking::Client,
    api_key: Option<String>,
}

/// OpenAI-compatible chat-completions backend
///
/// The endpoint is derived from the configured provider ("groq", "openai",
/// "ollama") unless `base_url` overrides it. Ollama needs no API key; the
/// other providers read one from the configured environment variable at
/// initialization time.
pub struct HttpGenerationBackend {
    config: GenerationConfig,
    endpoint: String,
    client: OnceLock<HttpClient>,
}

impl HttpGenerationBackend {
    pub fn new(config: GenerationConfig) -> Self {
        let endpoint = config.endpoint();
        Self {
            config,
            endpoint,
            client: OnceLock::new(),
        }
    }
}

impl GenerationBackend for HttpGenerationBackend {
    fn initialize(&self) -> Result<(), GenerationError> {
        if self.client.get().is_some() {
            return Ok(());
        }

        let api_key = if self.config.provider == "ollama" {
            None
        } else {
            let key = std::env::var(&self.config.api_key_env).map_err(|_| {
                GenerationError::InitializationError(format!(
                    "Environment variable {} is not set",
                    self.config.api_key_env
                ))
            })?;
            if key.is_empty() {
                return Err(GenerationError::InitializationError(format!(
                    "Environment variable {} is empty",
                    self.config.api_key_env
                )));
            }
            Some(key)
        };

        // The client carries its own request timeout so an abandoned call
        // terminates instead of running to completion on the blocking pool.
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::InitializationError(e.to_string()))?;

        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.model,
            endpoint = %self.endpoint,
            "generation backend ready"
        );

        let _ = self.client.set(HttpClient { client, api_key });
        Ok(())
    }

    fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, GenerationError> {
        let http = self.client.get().ok_or(GenerationError::NotInitialized)?;

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature: self.config.temperature,
        };

        let mut builder = http.client.post(&self.endpoint).json(&request);
        if let Some(key) = &http.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::RequestFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::RequestFailed(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("no choices returned".to_string()))?;

        Ok(content)
    }
}
