use poliq::cli::{Cli, Commands, ConfigAction};
use poliq::config::Config;
use poliq::embedding::{EmbeddingBackend, FastEmbedBackend};
use poliq::error::{PoliqError, Result};
use poliq::generation::HttpGenerationBackend;
use poliq::index::ClauseIndex;
use poliq::retrieval::{Clause, RetrievalOrchestrator, ScoredClause};
use poliq::sample::sample_clauses;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Init => {
            cmd_init(cli.config).await?;
        }
        Commands::Ingest { file } => {
            cmd_ingest(cli.config, &file).await?;
        }
        Commands::Search {
            query,
            limit,
            min_score,
            analyze,
            json,
        } => {
            cmd_search(cli.config, &query, limit, min_score, analyze, json).await?;
        }
        Commands::Status => {
            cmd_status(cli.config).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "poliq=debug" } else { "poliq=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'poliq config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

/// Wire the three backends into an orchestrator
fn build_orchestrator(config: &Config) -> Result<RetrievalOrchestrator> {
    let embedder = FastEmbedBackend::new(&config.embedding.model, config.embedding.batch_size)
        .map_err(|e| PoliqError::Config(e.to_string()))?;

    // Dimension mismatch between config and model is a fatal configuration
    // error, caught here rather than per-request
    if embedder.dimension() != config.index.vector_dim {
        return Err(PoliqError::Config(format!(
            "index.vector_dim is {} but model '{}' produces {}-dimensional vectors",
            config.index.vector_dim,
            config.embedding.model,
            embedder.dimension()
        )));
    }

    let data_dir = expand_path(&config.storage.data_dir)?;
    let db_path = data_dir.join("store").join("clauses.sqlite");
    let index = ClauseIndex::new(db_path, config.index.vector_dim);

    let generator = HttpGenerationBackend::new(config.generation.clone());

    Ok(RetrievalOrchestrator::new(
        Arc::new(embedder),
        Arc::new(index),
        Arc::new(generator),
        config.retrieval.clone(),
        config.generation.clone(),
    ))
}

async fn cmd_init(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    let clauses = sample_clauses();
    let count = orchestrator
        .ingest(clauses)
        .await
        .map_err(|e| PoliqError::Other(e.into()))?;

    let total = orchestrator
        .count()
        .await
        .map_err(|e| PoliqError::Other(e.into()))?;

    println!("✓ Ingested {} sample clauses ({} total in index)", count, total);
    Ok(())
}

async fn cmd_ingest(config_path: Option<PathBuf>, file: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    let content = std::fs::read_to_string(file).map_err(|e| PoliqError::Io {
        source: e,
        context: format!("Failed to read clause file: {:?}", file),
    })?;
    let clauses: Vec<Clause> = serde_json::from_str(&content).map_err(|e| PoliqError::Json {
        source: e,
        context: format!("Failed to parse clause file: {:?}", file),
    })?;

    let count = orchestrator
        .ingest(clauses)
        .await
        .map_err(|e| PoliqError::Other(e.into()))?;

    let total = orchestrator
        .count()
        .await
        .map_err(|e| PoliqError::Other(e.into()))?;

    println!("✓ Ingested {} clauses ({} total in index)", count, total);
    Ok(())
}

/// JSON output shape for `search --json`
#[derive(Serialize)]
struct SearchReport {
    query: String,
    results: Vec<ScoredClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<String>,
    total_results: usize,
    search_time_ms: f64,
}

async fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    limit: usize,
    min_score: Option<f32>,
    analyze: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    // Absent flag falls back to the configured default threshold
    let min_score = min_score.unwrap_or(config.retrieval.default_min_score);

    let start = Instant::now();
    let results = orchestrator
        .search(query, limit, min_score)
        .await
        .map_err(|e| PoliqError::Other(e.into()))?;
    let search_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    // Generation failures must not discard the retrieval results; report
    // them separately and keep going
    let analysis = if analyze && config.generation.enabled {
        match orchestrator.analyze(query, &results).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(error = %e, "analysis unavailable, returning retrieval results only");
                None
            }
        }
    } else {
        if analyze {
            tracing::info!("generation is disabled in config, skipping analysis");
        }
        None
    };

    if json {
        let report = SearchReport {
            query: query.to_string(),
            total_results: results.len(),
            results,
            analysis,
            search_time_ms,
        };
        let out = serde_json::to_string_pretty(&report).map_err(|e| PoliqError::Json {
            source: e,
            context: "Failed to serialize search report".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if results.is_empty() {
        println!("No clauses matched (threshold: {})", min_score);
    } else {
        println!("Found {} clauses ({:.0}ms):\n", results.len(), search_time_ms);
        for scored in &results {
            println!("  [{:.3}] {} - {}", scored.score, scored.clause.id, scored.clause.text);
            let policy_type = scored.clause.meta("policy_type");
            let section = scored.clause.meta("section");
            if !policy_type.is_empty() || !section.is_empty() {
                println!("          {} / {}", policy_type, section);
            }
        }
    }

    if let Some(analysis) = analysis {
        println!("\nAnalysis:\n{}", analysis);
    }

    Ok(())
}

async fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    let count = orchestrator
        .count()
        .await
        .map_err(|e| PoliqError::Other(e.into()))?;
    let status = orchestrator.status();

    println!("Poliq Status");
    println!("============");
    println!("\nIndexed clauses: {}", count);
    println!("\nBackends:");
    println!("  embedding:  {}", status.embedding.as_str());
    println!("  index:      {}", status.index.as_str());
    println!("  generation: {}", status.generation.as_str());
    println!(
        "\nGeneration: {} ({} / {})",
        if config.generation.enabled { "enabled" } else { "disabled" },
        config.generation.provider,
        config.generation.model
    );

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| PoliqError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PoliqError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            // Save default config
            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PoliqError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| PoliqError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
