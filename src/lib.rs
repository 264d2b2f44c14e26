//! Poliq - Policy Clause Intelligence
//!
//! Retrieves the most relevant policy clauses for a free-text claim
//! description via nearest-neighbor search over dense embeddings, then
//! optionally synthesizes a grounded coverage analysis (RAG). Backends load
//! lazily behind single-flight guards so concurrent requests never race on
//! model or index initialization.

pub mod backend;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod retrieval;
pub mod sample;
pub mod storage;

pub use error::{PoliqError, Result};
