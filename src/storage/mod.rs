//! Storage layer for poliq
//!
//! Provides SQLite-backed persistence for clauses and their embeddings. The
//! persisted layout is internal; the index only relies on clauses surviving
//! an upsert/reload round trip unchanged.

pub mod database;

pub use database::{ClauseRow, Database, DbPool};
