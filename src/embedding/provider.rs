/// Embedding backend trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model not initialized")]
    NotInitialized,

    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding backends
///
/// Abstraction over different embedding engines so the orchestrator can be
/// exercised with deterministic test doubles. `initialize` loads the model
/// weights and is expected to be driven through a single-flight guard;
/// `encode` is read-only after that and safe to call from many threads.
pub trait EmbeddingBackend: Send + Sync {
    /// Load the model; blocking, called once per process
    fn initialize(&self) -> Result<(), EmbeddingError>;

    /// Encode texts into fixed-dimension vectors (batched)
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed backend for local embedding generation
///
/// Uses all-MiniLM-L6-v2 (384 dimensions) by default. Models are downloaded
/// on-demand to `~/.cache/huggingface/` on first initialization:
/// - all-MiniLM-L6-v2: 90MB (384 dims) - recommended for most use cases
/// - bge-small-en-v1.5: 130MB (384 dims) - better accuracy
/// - bge-base-en-v1.5: 440MB (768 dims) - highest accuracy
pub struct FastEmbedBackend {
    embedding_model: EmbeddingModel,
    model_name: String,
    dimension: usize,
    batch_size: usize,
    model: OnceLock<TextEmbedding>,
}

impl FastEmbedBackend {
    /// Create a backend for the named model; the model itself is not loaded
    /// until `initialize`
    pub fn new(model_name: &str, batch_size: usize) -> Result<Self, EmbeddingError> {
        if batch_size == 0 {
            return Err(EmbeddingError::InvalidInput(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        // Map model name to FastEmbed enum
        let embedding_model = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        let dimension = match embedding_model {
            EmbeddingModel::AllMiniLML6V2 => 384,
            EmbeddingModel::BGESmallENV15 => 384,
            EmbeddingModel::BGEBaseENV15 => 768,
            _ => 384,
        };

        Ok(Self {
            embedding_model,
            model_name: model_name.to_string(),
            dimension,
            batch_size,
            model: OnceLock::new(),
        })
    }

    /// Create a backend with the default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2", 32)
    }

    /// Batch size handed to the model when encoding
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl EmbeddingBackend for FastEmbedBackend {
    fn initialize(&self) -> Result<(), EmbeddingError> {
        if self.model.get().is_some() {
            return Ok(());
        }

        tracing::info!(
            model = %self.model_name,
            dimension = self.dimension,
            "loading embedding model (downloaded to ~/.cache/huggingface/ if not cached)"
        );

        let init_options =
            InitOptions::new(self.embedding_model.clone()).with_show_download_progress(true);

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        let _ = self.model.set(model);
        Ok(())
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model.get().ok_or(EmbeddingError::NotInitialized)?;

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let embeddings = model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        // Verify all dimensions
        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
