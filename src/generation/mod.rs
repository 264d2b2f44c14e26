/// Text generation backends for claim analysis
///
/// The `GenerationBackend` trait is the seam the orchestrator depends on;
/// `HttpGenerationBackend` talks to an OpenAI-compatible chat-completions
/// endpoint (groq, openai or a local ollama instance).
mod provider;

pub use provider::{GenerationBackend, GenerationError, HttpGenerationBackend};
