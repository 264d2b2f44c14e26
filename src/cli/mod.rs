//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "poliq",
    version,
    about = "Policy clause retrieval with optional RAG-powered claim analysis",
    long_about = "Poliq indexes insurance policy clauses as dense vector embeddings and retrieves \
                  the most relevant clauses for a free-text claim description, optionally \
                  generating a grounded coverage analysis with an LLM."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/poliq/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed the index with the built-in sample policy clauses
    Init,

    /// Ingest policy clauses from a JSON file
    Ingest {
        /// Path to a JSON array of clauses: [{"id", "text", "metadata"}]
        file: PathBuf,
    },

    /// Search indexed clauses for a claim description
    Search {
        /// Claim description text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Minimum relevance score threshold, 0.0 to 1.0 (defaults to
        /// retrieval.default_min_score from the config)
        #[arg(short, long)]
        min_score: Option<f32>,

        /// Generate an AI analysis of the claim against the results
        #[arg(short, long)]
        analyze: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index size and backend readiness
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
