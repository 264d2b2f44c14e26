//! SQLite database management with migrations
//!
//! Structured storage for clauses and their embeddings. `slot` records
//! insertion order and survives upserts, which is what makes query-time
//! tie-breaking stable across restarts.

use crate::error::{PoliqError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// A persisted clause with its raw embedding bytes
#[derive(Debug, Clone)]
pub struct ClauseRow {
    pub id: String,
    pub document: String,
    pub metadata_json: String,
    pub embedding: Vec<u8>,
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PoliqError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Create connection manager
        let manager = SqliteConnectionManager::file(db_path);

        // Build pool with configuration
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| PoliqError::Config(format!("Failed to create connection pool: {}", e)))?;

        // Configure connection
        {
            let conn = pool
                .get()
                .map_err(|e| PoliqError::Config(format!("Failed to get connection: {}", e)))?;

            // Enable WAL mode for better concurrency
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };

        // Run migrations
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| PoliqError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        // Create migrations table if it doesn't exist
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        // Get current version
        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        // Apply migrations
        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                // Execute migration
                conn.execute_batch(migration)?;

                // Record migration
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Load all clauses in insertion order
    pub fn load_clauses(&self) -> Result<Vec<ClauseRow>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, document, metadata, embedding FROM clauses ORDER BY slot ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ClauseRow {
                id: row.get(0)?,
                document: row.get(1)?,
                metadata_json: row.get(2)?,
                embedding: row.get(3)?,
            })
        })?;

        let mut clauses = Vec::new();
        for row in rows {
            clauses.push(row?);
        }
        Ok(clauses)
    }

    /// Insert or overwrite clauses by id in a single transaction
    ///
    /// An overwritten clause keeps its original slot.
    pub fn upsert_clauses(&self, rows: &[ClauseRow]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for row in rows {
            tx.execute(
                "INSERT INTO clauses (id, document, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     document = excluded.document,
                     metadata = excluded.metadata,
                     embedding = excluded.embedding",
                params![row.id, row.document, row.metadata_json, row.embedding],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Number of distinct clauses stored
    pub fn count_clauses(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clauses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &["
    CREATE TABLE clauses (
        slot INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        document TEXT NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB NOT NULL
    );
    CREATE INDEX idx_clauses_id ON clauses(id);
"];
