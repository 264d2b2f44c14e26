//! SQLite-backed exact cosine index
//!
//! The search contract requires deterministic results, stable
//! insertion-order tie-breaking and overwrite-by-id, so this index keeps the
//! full table in memory and scans it exactly rather than maintaining an
//! approximate graph. Upsert takes the write lock and therefore blocks
//! concurrent queries for its duration; queries share a read lock and run in
//! parallel with each other.

use crate::index::{IndexError, RawResult, VectorStore};
use crate::retrieval::Clause;
use crate::storage::{ClauseRow, Database};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

struct Entry {
    clause: Clause,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct MemTable {
    /// Entries in insertion order; overwrites keep their original position
    entries: Vec<Entry>,
    by_id: HashMap<String, usize>,
}

/// Exact-search clause index with write-through SQLite persistence
pub struct ClauseIndex {
    dimension: usize,
    db_path: PathBuf,
    db: OnceLock<Database>,
    mem: RwLock<MemTable>,
}

impl ClauseIndex {
    /// Create an index handle; no I/O happens until `initialize`
    pub fn new(db_path: PathBuf, dimension: usize) -> Self {
        Self {
            dimension,
            db_path,
            db: OnceLock::new(),
            mem: RwLock::new(MemTable::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl VectorStore for ClauseIndex {
    /// Open the database and rebuild the in-memory table in insertion order
    fn initialize(&self) -> Result<(), IndexError> {
        if self.db.get().is_some() {
            return Ok(());
        }

        let db = Database::new(&self.db_path)
            .map_err(|e| IndexError::InitializationError(e.to_string()))?;

        let rows = db
            .load_clauses()
            .map_err(|e| IndexError::InitializationError(e.to_string()))?;

        let mut table = MemTable::default();
        for row in rows {
            let embedding = decode_embedding(&row.embedding)?;
            self.check_dimension(&embedding)?;

            let metadata: HashMap<String, String> = serde_json::from_str(&row.metadata_json)
                .map_err(|e| IndexError::Corrupt(format!("metadata for '{}': {}", row.id, e)))?;

            table.by_id.insert(row.id.clone(), table.entries.len());
            table.entries.push(Entry {
                clause: Clause {
                    id: row.id,
                    text: row.document,
                    metadata,
                },
                embedding,
            });
        }

        tracing::info!(
            clause_count = table.entries.len(),
            dimension = self.dimension,
            "clause index loaded"
        );

        *self.mem.write().unwrap() = table;
        let _ = self.db.set(db);
        Ok(())
    }

    fn upsert(&self, clauses: &[Clause], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        if clauses.len() != embeddings.len() {
            return Err(IndexError::ArityMismatch {
                clauses: clauses.len(),
                embeddings: embeddings.len(),
            });
        }

        // Validate everything before any write; an ingest either lands
        // completely or not at all.
        for embedding in embeddings {
            self.check_dimension(embedding)?;
        }

        let db = self.db.get().ok_or(IndexError::NotInitialized)?;

        let mut rows = Vec::with_capacity(clauses.len());
        for (clause, embedding) in clauses.iter().zip(embeddings) {
            let metadata_json = serde_json::to_string(&clause.metadata)
                .map_err(|e| IndexError::InvalidArgument(format!("metadata: {}", e)))?;
            rows.push(ClauseRow {
                id: clause.id.clone(),
                document: clause.text.clone(),
                metadata_json,
                embedding: encode_embedding(embedding),
            });
        }

        // Write lock held across the database write keeps the memory table
        // and the persisted rows consistent, and serializes ingest.
        let mut table = self.mem.write().unwrap();

        db.upsert_clauses(&rows)
            .map_err(|e| IndexError::Database(e.to_string()))?;

        for (clause, embedding) in clauses.iter().zip(embeddings) {
            let entry = Entry {
                clause: clause.clone(),
                embedding: embedding.clone(),
            };
            match table.by_id.get(&clause.id).copied() {
                Some(pos) => table.entries[pos] = entry,
                None => {
                    let pos = table.entries.len();
                    table.by_id.insert(clause.id.clone(), pos);
                    table.entries.push(entry);
                }
            }
        }

        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RawResult>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidArgument(
                "k must be greater than 0".to_string(),
            ));
        }
        if self.db.get().is_none() {
            return Err(IndexError::NotInitialized);
        }
        self.check_dimension(vector)?;

        let table = self.mem.read().unwrap();

        // Empty results are not errors
        if table.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = table
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (cosine_distance(vector, &entry.embedding), pos))
            .collect();

        // Ascending distance, ties by insertion order
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, pos)| {
                let entry = &table.entries[pos];
                RawResult {
                    id: entry.clause.id.clone(),
                    document: entry.clause.text.clone(),
                    metadata: entry.clause.metadata.clone(),
                    distance,
                }
            })
            .collect())
    }

    fn count(&self) -> usize {
        self.mem.read().unwrap().entries.len()
    }
}

/// Cosine distance on `[0, 2]`; zero-magnitude vectors are treated as maximally
/// unrelated rather than producing NaN
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    // Rounding can push the ratio past ±1, which would leak a negative
    // distance and a score above 1.0
    1.0 - (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, IndexError> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::Corrupt(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
