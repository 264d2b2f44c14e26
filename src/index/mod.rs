//! Clause vector index
//!
//! Stores `(id, embedding, document, metadata)` tuples and answers
//! nearest-neighbor queries by cosine distance. The [`VectorStore`] trait is
//! the seam the orchestrator depends on; [`ClauseIndex`] is the SQLite-backed
//! exact-search implementation.

mod store;

pub use store::ClauseIndex;

use crate::retrieval::Clause;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index not initialized")]
    NotInitialized,

    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Arity mismatch: {clauses} clauses but {embeddings} embeddings")]
    ArityMismatch { clauses: usize, embeddings: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt index entry: {0}")]
    Corrupt(String),
}

/// A raw nearest-neighbor hit, before distance is converted to relevance
#[derive(Debug, Clone)]
pub struct RawResult {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, String>,
    /// Cosine distance in `[0, 2]`; 0 is an identical direction
    pub distance: f32,
}

/// Storage collaborator for clause embeddings
///
/// Implementations must return query results ordered by ascending distance
/// with ties broken by insertion order, and must treat re-upserting an
/// existing id as an overwrite.
pub trait VectorStore: Send + Sync {
    fn initialize(&self) -> Result<(), IndexError>;

    fn upsert(&self, clauses: &[Clause], embeddings: &[Vec<f32>]) -> Result<(), IndexError>;

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RawResult>, IndexError>;

    fn count(&self) -> usize;
}
