//! Integration tests for the retrieval orchestrator
//!
//! Exercises search, ingest and analyze end to end against deterministic
//! in-memory backend doubles, so every scored result and every backend call
//! count can be asserted exactly.

use poliq::backend::BackendState;
use poliq::config::{GenerationConfig, RetrievalConfig};
use poliq::embedding::{EmbeddingBackend, EmbeddingError};
use poliq::generation::{GenerationBackend, GenerationError};
use poliq::index::{IndexError, RawResult, VectorStore};
use poliq::retrieval::{
    AnalyzeError, Clause, RetrievalOrchestrator, ScoredClause, SearchError, NO_CLAUSES_MESSAGE,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Embedder double with a fixed text-to-vector table
struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    init_calls: AtomicUsize,
    encode_calls: AtomicUsize,
    init_failures_remaining: AtomicUsize,
    encode_delay: Duration,
}

impl StubEmbedder {
    fn new(vectors: HashMap<String, Vec<f32>>) -> Self {
        Self {
            vectors,
            init_calls: AtomicUsize::new(0),
            encode_calls: AtomicUsize::new(0),
            init_failures_remaining: AtomicUsize::new(0),
            encode_delay: Duration::ZERO,
        }
    }

    fn failing_first_init(vectors: HashMap<String, Vec<f32>>) -> Self {
        let stub = Self::new(vectors);
        stub.init_failures_remaining.store(1, Ordering::SeqCst);
        stub
    }

    fn slow_encode(vectors: HashMap<String, Vec<f32>>, delay: Duration) -> Self {
        let mut stub = Self::new(vectors);
        stub.encode_delay = delay;
        stub
    }
}

impl EmbeddingBackend for StubEmbedder {
    fn initialize(&self) -> Result<(), EmbeddingError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the race window so concurrent callers actually overlap
        std::thread::sleep(Duration::from_millis(10));
        let remaining = self.init_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(EmbeddingError::InitializationError(
                "model download failed".to_string(),
            ));
        }
        Ok(())
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.encode_calls.fetch_add(1, Ordering::SeqCst);
        if !self.encode_delay.is_zero() {
            std::thread::sleep(self.encode_delay);
        }
        texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .ok_or_else(|| EmbeddingError::InvalidInput(format!("unknown text: {}", text)))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// In-memory cosine-scan index double, insertion-ordered like the real one
struct StubIndex {
    entries: Mutex<Vec<(Clause, Vec<f32>)>>,
    init_calls: AtomicUsize,
}

impl StubIndex {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            init_calls: AtomicUsize::new(0),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (mag_a * mag_b)
}

impl VectorStore for StubIndex {
    fn initialize(&self) -> Result<(), IndexError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    fn upsert(&self, clauses: &[Clause], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        if clauses.len() != embeddings.len() {
            return Err(IndexError::ArityMismatch {
                clauses: clauses.len(),
                embeddings: embeddings.len(),
            });
        }
        let mut entries = self.entries.lock().unwrap();
        for (clause, embedding) in clauses.iter().zip(embeddings) {
            match entries.iter().position(|(c, _)| c.id == clause.id) {
                Some(pos) => entries[pos] = (clause.clone(), embedding.clone()),
                None => entries.push((clause.clone(), embedding.clone())),
            }
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RawResult>, IndexError> {
        let entries = self.entries.lock().unwrap();
        let mut scored: Vec<(f32, usize)> = entries
            .iter()
            .enumerate()
            .map(|(pos, (_, embedding))| (cosine_distance(vector, embedding), pos))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(distance, pos)| {
                let (clause, _) = &entries[pos];
                RawResult {
                    id: clause.id.clone(),
                    document: clause.text.clone(),
                    metadata: clause.metadata.clone(),
                    distance,
                }
            })
            .collect())
    }

    fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Generator double returning a canned response, or failing when given none
struct StubGenerator {
    response: Option<String>,
    init_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    generate_delay: Duration,
}

impl StubGenerator {
    fn new(response: Option<&str>) -> Self {
        Self {
            response: response.map(String::from),
            init_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            generate_delay: Duration::ZERO,
        }
    }

    fn slow(response: Option<&str>, delay: Duration) -> Self {
        let mut stub = Self::new(response);
        stub.generate_delay = delay;
        stub
    }
}

impl GenerationBackend for StubGenerator {
    fn initialize(&self) -> Result<(), GenerationError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String, GenerationError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.generate_delay.is_zero() {
            std::thread::sleep(self.generate_delay);
        }
        match &self.response {
            Some(text) => Ok(text.clone()),
            None => Err(GenerationError::RequestFailed(
                "provider returned 503".to_string(),
            )),
        }
    }
}

fn retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        max_results: 50,
        default_min_score: 0.0,
        embed_timeout_secs: 5,
        query_timeout_secs: 5,
    }
}

fn generation_config() -> GenerationConfig {
    GenerationConfig {
        enabled: true,
        provider: "groq".to_string(),
        base_url: None,
        api_key_env: "GROQ_API_KEY".to_string(),
        model: "test-model".to_string(),
        temperature: 0.0,
        max_new_tokens: 64,
        request_timeout_secs: 5,
    }
}

const QUERY: &str = "my car was hit in a parking lot";
const TEXT_A: &str = "collision damage to the insured vehicle is covered";
const TEXT_B: &str = "wear and tear is excluded from coverage";
const TEXT_C: &str = "claims must be reported within 30 days";

/// Unit vectors chosen so cosine similarity against the query vector
/// `[1, 0]` is exactly the first component: A scores ~0.9, B ~0.4, C ~0.1
fn test_vectors() -> HashMap<String, Vec<f32>> {
    let mut vectors = HashMap::new();
    vectors.insert(QUERY.to_string(), vec![1.0, 0.0]);
    vectors.insert(TEXT_A.to_string(), vec![0.9, 0.435_889_9]);
    vectors.insert(TEXT_B.to_string(), vec![0.4, 0.916_515_1]);
    vectors.insert(TEXT_C.to_string(), vec![0.1, 0.994_987_4]);
    vectors
}

fn test_clauses() -> Vec<Clause> {
    vec![
        Clause::new("CLAUSE_A", TEXT_A).with_meta("section", "Coverage"),
        Clause::new("CLAUSE_B", TEXT_B).with_meta("section", "Exclusions"),
        Clause::new("CLAUSE_C", TEXT_C).with_meta("section", "Claims Procedure"),
    ]
}

struct Fixture {
    embedder: Arc<StubEmbedder>,
    index: Arc<StubIndex>,
    generator: Arc<StubGenerator>,
    orchestrator: Arc<RetrievalOrchestrator>,
}

fn fixture_with(embedder: StubEmbedder, generator: StubGenerator) -> Fixture {
    let embedder = Arc::new(embedder);
    let index = Arc::new(StubIndex::new());
    let generator = Arc::new(generator);
    let orchestrator = Arc::new(RetrievalOrchestrator::new(
        embedder.clone(),
        index.clone(),
        generator.clone(),
        retrieval_config(),
        generation_config(),
    ));
    Fixture {
        embedder,
        index,
        generator,
        orchestrator,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        StubEmbedder::new(test_vectors()),
        StubGenerator::new(Some("The claim is covered. ANALYSIS: Covered under CLAUSE_A.")),
    )
}

async fn seeded_fixture() -> Fixture {
    let fx = fixture();
    fx.orchestrator.ingest(test_clauses()).await.unwrap();
    fx
}

fn ids(results: &[ScoredClause]) -> Vec<&str> {
    results.iter().map(|r| r.clause.id.as_str()).collect()
}

#[tokio::test]
async fn test_search_ranks_by_relevance() {
    let fx = seeded_fixture().await;

    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();

    assert_eq!(ids(&results), vec!["CLAUSE_A", "CLAUSE_B", "CLAUSE_C"]);
    assert!((results[0].score - 0.9).abs() < 1e-3);
    assert!((results[1].score - 0.4).abs() < 1e-3);
    assert!((results[2].score - 0.1).abs() < 1e-3);
    for result in &results {
        assert!((0.0..=1.0).contains(&result.score));
    }
    assert_eq!(results[0].clause.meta("section"), "Coverage");
}

#[tokio::test]
async fn test_search_applies_min_score_threshold() {
    let fx = seeded_fixture().await;

    let results = fx.orchestrator.search(QUERY, 3, 0.5).await.unwrap();
    assert_eq!(ids(&results), vec!["CLAUSE_A"]);

    let results = fx.orchestrator.search(QUERY, 2, 0.0).await.unwrap();
    assert_eq!(ids(&results), vec!["CLAUSE_A", "CLAUSE_B"]);
}

#[tokio::test]
async fn test_search_all_filtered_is_ok_empty() {
    let fx = seeded_fixture().await;

    // Threshold above every score: success with zero results, not an error
    let results = fx.orchestrator.search(QUERY, 10, 0.95).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_search_empty_index_is_ok_empty() {
    let fx = fixture();

    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_search_is_deterministic() {
    let fx = seeded_fixture().await;

    let first = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();
    for _ in 0..5 {
        let again = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();
        assert_eq!(ids(&again), ids(&first));
        for (a, b) in again.iter().zip(&first) {
            assert_eq!(a.score, b.score);
        }
    }
}

#[tokio::test]
async fn test_search_rejects_invalid_arguments() {
    let fx = seeded_fixture().await;

    let err = fx.orchestrator.search("   ", 10, 0.0).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument(_)));

    let err = fx.orchestrator.search(QUERY, 0, 0.0).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument(_)));

    let err = fx.orchestrator.search(QUERY, 10, 1.5).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument(_)));

    let err = fx.orchestrator.search(QUERY, 10, -0.1).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_ingest_upsert_is_idempotent() {
    let fx = fixture();

    fx.orchestrator.ingest(test_clauses()).await.unwrap();
    fx.orchestrator.ingest(test_clauses()).await.unwrap();
    assert_eq!(fx.orchestrator.count().await.unwrap(), 3);

    // Overwriting an id replaces the stored text
    let updated = vec![Clause::new("CLAUSE_C", TEXT_B)];
    fx.orchestrator.ingest(updated).await.unwrap();
    assert_eq!(fx.orchestrator.count().await.unwrap(), 3);

    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();
    let clause_c = results.iter().find(|r| r.clause.id == "CLAUSE_C").unwrap();
    assert_eq!(clause_c.clause.text, TEXT_B);
}

#[tokio::test]
async fn test_ingest_rejects_blank_ids_and_texts() {
    let fx = fixture();

    let err = fx
        .orchestrator
        .ingest(vec![Clause::new("  ", TEXT_A)])
        .await
        .unwrap_err();
    assert!(matches!(err, poliq::retrieval::IngestError::InvalidArgument(_)));

    let err = fx
        .orchestrator
        .ingest(vec![Clause::new("CLAUSE_X", "")])
        .await
        .unwrap_err();
    assert!(matches!(err, poliq::retrieval::IngestError::InvalidArgument(_)));

    assert_eq!(fx.orchestrator.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_searches_initialize_once() {
    let fx = seeded_fixture().await;
    let embedder_inits = fx.embedder.init_calls.load(Ordering::SeqCst);
    let index_inits = fx.index.init_calls.load(Ordering::SeqCst);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let orchestrator = fx.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.search(QUERY, 10, 0.0).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    // Ingest already initialized both backends; searches must not re-init
    assert_eq!(embedder_inits, 1);
    assert_eq!(index_inits, 1);
    assert_eq!(fx.embedder.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.index.init_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_cold_start_initializes_once() {
    let fx = fixture();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let orchestrator = fx.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.search(QUERY, 10, 0.0).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(fx.embedder.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.index.init_calls.load(Ordering::SeqCst), 1);
    // Generation is untouched by search
    assert_eq!(fx.generator.init_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_init_reports_not_ready_then_recovers() {
    let fx = fixture_with(
        StubEmbedder::failing_first_init(test_vectors()),
        StubGenerator::new(None),
    );

    let err = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap_err();
    assert!(matches!(err, SearchError::NotReady));

    // Failure is not cached; the next call retries and succeeds
    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(fx.embedder.init_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_analyze_short_circuits_on_empty_results() {
    let fx = fixture();

    let analysis = fx.orchestrator.analyze(QUERY, &[]).await.unwrap();
    assert_eq!(analysis, NO_CLAUSES_MESSAGE);

    // The generation backend is never touched, not even initialized
    assert_eq!(fx.generator.init_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.generator.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_analyze_extracts_text_after_marker() {
    let fx = seeded_fixture().await;
    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();

    let analysis = fx.orchestrator.analyze(QUERY, &results).await.unwrap();
    assert_eq!(analysis, "Covered under CLAUSE_A.");
    assert_eq!(fx.generator.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_analyze_failure_is_generation_unavailable() {
    let fx = fixture_with(StubEmbedder::new(test_vectors()), StubGenerator::new(None));
    fx.orchestrator.ingest(test_clauses()).await.unwrap();
    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();

    let err = fx.orchestrator.analyze(QUERY, &results).await.unwrap_err();
    assert!(matches!(err, AnalyzeError::GenerationUnavailable));
}

#[tokio::test]
async fn test_analyze_timeout_is_generation_unavailable() {
    let embedder = Arc::new(StubEmbedder::new(test_vectors()));
    let index = Arc::new(StubIndex::new());
    let generator = Arc::new(StubGenerator::slow(
        Some("ANALYSIS: too late"),
        Duration::from_secs(2),
    ));
    let mut generation = generation_config();
    generation.request_timeout_secs = 1;
    let orchestrator = RetrievalOrchestrator::new(
        embedder,
        index,
        generator.clone(),
        retrieval_config(),
        generation,
    );

    orchestrator.ingest(test_clauses()).await.unwrap();
    let results = orchestrator.search(QUERY, 10, 0.0).await.unwrap();

    let err = orchestrator.analyze(QUERY, &results).await.unwrap_err();
    assert!(matches!(err, AnalyzeError::GenerationUnavailable));
    assert_eq!(generator.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_embedding_timeout_is_backend_failure() {
    let embedder = Arc::new(StubEmbedder::slow_encode(
        test_vectors(),
        Duration::from_secs(2),
    ));
    let index = Arc::new(StubIndex::new());
    let generator = Arc::new(StubGenerator::new(None));
    let mut retrieval = retrieval_config();
    retrieval.embed_timeout_secs = 1;
    let orchestrator = RetrievalOrchestrator::new(
        embedder,
        index,
        generator,
        retrieval,
        generation_config(),
    );

    let err = orchestrator.search(QUERY, 10, 0.0).await.unwrap_err();
    assert!(matches!(err, SearchError::BackendFailure));
}

#[tokio::test]
async fn test_max_results_clamped_to_configured_ceiling() {
    let embedder = Arc::new(StubEmbedder::new(test_vectors()));
    let index = Arc::new(StubIndex::new());
    let generator = Arc::new(StubGenerator::new(None));
    let mut retrieval = retrieval_config();
    retrieval.max_results = 2;
    let orchestrator = RetrievalOrchestrator::new(
        embedder,
        index,
        generator,
        retrieval,
        generation_config(),
    );

    orchestrator.ingest(test_clauses()).await.unwrap();

    // Asking for 10 with a ceiling of 2 clamps, it does not error
    let results = orchestrator.search(QUERY, 10, 0.0).await.unwrap();
    assert_eq!(ids(&results), vec!["CLAUSE_A", "CLAUSE_B"]);
}

#[tokio::test]
async fn test_status_reflects_backend_lifecycle() {
    let fx = fixture();

    let status = fx.orchestrator.status();
    assert_eq!(status.embedding, BackendState::Uninitialized);
    assert_eq!(status.index, BackendState::Uninitialized);
    assert_eq!(status.generation, BackendState::Uninitialized);

    fx.orchestrator.ingest(test_clauses()).await.unwrap();
    let results = fx.orchestrator.search(QUERY, 10, 0.0).await.unwrap();
    fx.orchestrator.analyze(QUERY, &results).await.unwrap();

    let status = fx.orchestrator.status();
    assert_eq!(status.embedding, BackendState::Ready);
    assert_eq!(status.index, BackendState::Ready);
    assert_eq!(status.generation, BackendState::Ready);
}
