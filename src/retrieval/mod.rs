//! Clause retrieval and analysis orchestration
//!
//! Composes the embedding backend, the vector index and the generation
//! backend into the two operations exposed to callers: `search` (ranked,
//! score-filtered clauses for a claim description) and `analyze` (generated
//! claim analysis grounded in retrieved clauses).

mod orchestrator;
mod prompt;

pub use orchestrator::{
    AnalyzeError, BackendStatus, IngestError, RetrievalOrchestrator, SearchError,
};
pub use prompt::{build_analysis_prompt, extract_analysis, ANSWER_MARKER, NO_CLAUSES_MESSAGE};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A retrievable unit of policy text
///
/// `id` is caller-assigned and stable across updates; re-ingesting a clause
/// with an existing id overwrites the stored version (upsert).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub id: String,
    pub text: String,
    /// Optional descriptive fields (e.g. policy_type, section)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Clause {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata lookup; absent keys read as empty string
    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }
}

/// A clause returned from search, with its relevance score
///
/// `score` is relevance in `[0.0, 1.0]`, higher is better; it is derived from
/// cosine distance as `1.0 - distance`, never the raw distance itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredClause {
    #[serde(flatten)]
    pub clause: Clause,
    pub score: f32,
}

impl ScoredClause {
    pub fn new(clause: Clause, score: f32) -> Self {
        Self { clause, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_metadata_reads_empty() {
        let clause = Clause::new("C1", "some text").with_meta("section", "Coverage");
        assert_eq!(clause.meta("section"), "Coverage");
        assert_eq!(clause.meta("policy_type"), "");
    }
}
