//! Retrieval orchestrator: embed, search, score, optionally analyze
//!
//! Sequences the three backends behind single-flight lazy initialization.
//! Retrieval and generation are independently reportable outcomes: a
//! generation failure never discards already-computed retrieval results.

use crate::backend::{BackendState, InitError, InitGuard};
use crate::config::{GenerationConfig, RetrievalConfig};
use crate::embedding::EmbeddingBackend;
use crate::generation::GenerationBackend;
use crate::index::{IndexError, RawResult, VectorStore};
use crate::retrieval::{
    build_analysis_prompt, extract_analysis, Clause, ScoredClause, NO_CLAUSES_MESSAGE,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Initialization is in flight or failed; transient, retry with backoff
    #[error("Backends are not ready; retry with backoff")]
    NotReady,

    /// Caller input out of contract; rejected before any backend call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Embedding or index failure; detail goes to the log, not the caller
    #[error("Search backend failure")]
    BackendFailure,
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Generation backend is not ready; retry with backoff")]
    NotReady,

    /// Generation failed or timed out; retrieval results remain valid
    #[error("Generation backend unavailable")]
    GenerationUnavailable,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Backends are not ready; retry with backoff")]
    NotReady,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Data-integrity rejection (dimension/arity); fatal to this ingest only
    #[error("Index rejected ingest: {0}")]
    Index(#[from] IndexError),

    #[error("Embedding backend failure")]
    BackendFailure,
}

/// Lifecycle states of the three backends, for status reporting
#[derive(Debug, Clone, Copy)]
pub struct BackendStatus {
    pub embedding: BackendState,
    pub index: BackendState,
    pub generation: BackendState,
}

/// Composes the embedding backend, vector index and generation backend
///
/// Owns one [`InitGuard`] per backend; the guards are the only shared mutable
/// state here. Once a backend is `Ready`, its inference calls run fully in
/// parallel on the blocking pool with no lock held.
pub struct RetrievalOrchestrator {
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorStore>,
    generator: Arc<dyn GenerationBackend>,
    embedder_guard: InitGuard,
    index_guard: InitGuard,
    generator_guard: InitGuard,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        index: Arc<dyn VectorStore>,
        generator: Arc<dyn GenerationBackend>,
        retrieval: RetrievalConfig,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            embedder_guard: InitGuard::new("embedding"),
            index_guard: InitGuard::new("vector-index"),
            generator_guard: InitGuard::new("generation"),
            retrieval,
            generation,
        }
    }

    /// Search for the clauses most relevant to a claim description
    ///
    /// Returns clauses in descending relevance order (ties by insertion
    /// order), each with `score = 1.0 - cosine_distance`, filtered to
    /// `score >= min_score`. Zero results after filtering is a successful
    /// response, not an error. Deterministic for a fixed index state.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredClause>, SearchError> {
        // Fail fast before touching any backend
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        if max_results == 0 {
            return Err(SearchError::InvalidArgument(
                "max_results must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&min_score) {
            return Err(SearchError::InvalidArgument(format!(
                "min_score must be in [0.0, 1.0], got {}",
                min_score
            )));
        }

        // Excess above the configured ceiling is clamped, not rejected
        let k = max_results.min(self.retrieval.max_results);

        tracing::info!(
            query_length = query.len(),
            max_results = k,
            min_score,
            "searching clauses"
        );

        let (embedder_ready, index_ready) =
            tokio::join!(self.ensure_embedder(), self.ensure_index());
        embedder_ready.map_err(not_ready)?;
        index_ready.map_err(not_ready)?;

        let vector = self.encode_query(query).await?;
        let raw = self.query_index(vector, k).await?;

        let mut results = Vec::new();
        let mut best_filtered: Option<f32> = None;

        // Raw hits arrive in ascending-distance order; that order is kept
        for hit in raw {
            let score = 1.0 - hit.distance;
            if score >= min_score {
                results.push(ScoredClause::new(
                    Clause {
                        id: hit.id,
                        text: hit.document,
                        metadata: hit.metadata,
                    },
                    score,
                ));
            } else if best_filtered.is_none() {
                // Hits descend in score, so the first rejected one is the
                // best that the threshold dropped
                best_filtered = Some(score);
            }
        }

        if results.is_empty() {
            if let Some(best) = best_filtered {
                tracing::info!(
                    best_found_score = best,
                    threshold = min_score,
                    "all results filtered out by min_score"
                );
            }
        }

        tracing::info!(results_count = results.len(), "search completed");
        Ok(results)
    }

    /// Generate a claim analysis grounded in the retrieved clauses
    ///
    /// An empty clause list short-circuits to a fixed message without
    /// invoking the generation backend.
    pub async fn analyze(
        &self,
        query: &str,
        clauses: &[ScoredClause],
    ) -> Result<String, AnalyzeError> {
        if clauses.is_empty() {
            tracing::info!("no clauses retrieved, skipping generation");
            return Ok(NO_CLAUSES_MESSAGE.to_string());
        }

        self.ensure_generator().await.map_err(|e| {
            tracing::warn!(backend = e.backend, error = %e.message, "generation backend not ready");
            AnalyzeError::NotReady
        })?;

        let prompt = build_analysis_prompt(query, clauses);
        tracing::info!(clause_count = clauses.len(), "generating claim analysis");

        let generator = Arc::clone(&self.generator);
        let max_tokens = self.generation.max_new_tokens;
        let task = tokio::task::spawn_blocking(move || generator.generate(&prompt, max_tokens));
        let timeout = Duration::from_secs(self.generation.request_timeout_secs);

        let raw = match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tracing::error!("generation timed out");
                return Err(AnalyzeError::GenerationUnavailable);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "generation task failed");
                return Err(AnalyzeError::GenerationUnavailable);
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "generation failed");
                return Err(AnalyzeError::GenerationUnavailable);
            }
            Ok(Ok(Ok(raw))) => raw,
        };

        Ok(extract_analysis(&raw))
    }

    /// Encode clause texts and upsert them into the index
    pub async fn ingest(&self, clauses: Vec<Clause>) -> Result<usize, IngestError> {
        if clauses.is_empty() {
            return Ok(0);
        }
        for clause in &clauses {
            if clause.id.trim().is_empty() {
                return Err(IngestError::InvalidArgument(
                    "clause id must not be empty".to_string(),
                ));
            }
            if clause.text.trim().is_empty() {
                return Err(IngestError::InvalidArgument(format!(
                    "clause '{}' has empty text",
                    clause.id
                )));
            }
        }

        let (embedder_ready, index_ready) =
            tokio::join!(self.ensure_embedder(), self.ensure_index());
        for ready in [embedder_ready, index_ready] {
            ready.map_err(|e| {
                tracing::warn!(backend = e.backend, error = %e.message, "backend not ready");
                IngestError::NotReady
            })?;
        }

        tracing::info!(count = clauses.len(), "ingesting clauses");

        let texts: Vec<String> = clauses.iter().map(|c| c.text.clone()).collect();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = tokio::task::spawn_blocking(move || embedder.encode(&texts))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "encode task failed");
                IngestError::BackendFailure
            })?
            .map_err(|e| {
                tracing::error!(error = %e, "clause encoding failed");
                IngestError::BackendFailure
            })?;

        let index = Arc::clone(&self.index);
        let count = clauses.len();
        tokio::task::spawn_blocking(move || index.upsert(&clauses, &embeddings))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "upsert task failed");
                IngestError::BackendFailure
            })??;

        tracing::info!(count, total = self.index.count(), "clauses ingested");
        Ok(count)
    }

    /// Number of distinct clauses currently indexed
    pub async fn count(&self) -> Result<usize, SearchError> {
        self.ensure_index().await.map_err(not_ready)?;
        Ok(self.index.count())
    }

    /// Lifecycle states of the three backends
    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            embedding: self.embedder_guard.state(),
            index: self.index_guard.state(),
            generation: self.generator_guard.state(),
        }
    }

    async fn ensure_embedder(&self) -> Result<(), InitError> {
        let backend = Arc::clone(&self.embedder);
        self.embedder_guard
            .ensure_ready(move || {
                let backend = Arc::clone(&backend);
                async move {
                    tokio::task::spawn_blocking(move || backend.initialize())
                        .await
                        .map_err(|e| anyhow::anyhow!("initialization task panicked: {}", e))??;
                    Ok(())
                }
            })
            .await
    }

    async fn ensure_index(&self) -> Result<(), InitError> {
        let index = Arc::clone(&self.index);
        self.index_guard
            .ensure_ready(move || {
                let index = Arc::clone(&index);
                async move {
                    tokio::task::spawn_blocking(move || index.initialize())
                        .await
                        .map_err(|e| anyhow::anyhow!("initialization task panicked: {}", e))??;
                    Ok(())
                }
            })
            .await
    }

    async fn ensure_generator(&self) -> Result<(), InitError> {
        let generator = Arc::clone(&self.generator);
        self.generator_guard
            .ensure_ready(move || {
                let generator = Arc::clone(&generator);
                async move {
                    tokio::task::spawn_blocking(move || generator.initialize())
                        .await
                        .map_err(|e| anyhow::anyhow!("initialization task panicked: {}", e))??;
                    Ok(())
                }
            })
            .await
    }

    async fn encode_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let task = tokio::task::spawn_blocking(move || embedder.encode(&[text]));
        let timeout = Duration::from_secs(self.retrieval.embed_timeout_secs);

        let embeddings = match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tracing::error!("query embedding timed out");
                return Err(SearchError::BackendFailure);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "query embedding task failed");
                return Err(SearchError::BackendFailure);
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "query embedding failed");
                return Err(SearchError::BackendFailure);
            }
            Ok(Ok(Ok(embeddings))) => embeddings,
        };

        match embeddings.into_iter().next() {
            Some(vector) => Ok(vector),
            None => {
                tracing::error!("embedding backend returned no vector");
                Err(SearchError::BackendFailure)
            }
        }
    }

    async fn query_index(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RawResult>, SearchError> {
        let index = Arc::clone(&self.index);
        let task = tokio::task::spawn_blocking(move || index.query(&vector, k));
        let timeout = Duration::from_secs(self.retrieval.query_timeout_secs);

        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tracing::error!("index query timed out");
                Err(SearchError::BackendFailure)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "index query task failed");
                Err(SearchError::BackendFailure)
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "index query failed");
                Err(SearchError::BackendFailure)
            }
            Ok(Ok(Ok(raw))) => Ok(raw),
        }
    }
}

fn not_ready(e: InitError) -> SearchError {
    tracing::warn!(backend = e.backend, error = %e.message, "backend not ready");
    SearchError::NotReady
}
