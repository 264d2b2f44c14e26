/// Text embedding backends
///
/// Converts clause texts and claim descriptions into fixed-dimension vectors.
/// The `EmbeddingBackend` trait is the seam; `FastEmbedBackend` is the local
/// implementation (all-MiniLM-L6-v2, 384-dim, no API calls).
mod provider;

pub use provider::{EmbeddingBackend, EmbeddingError, FastEmbedBackend};
