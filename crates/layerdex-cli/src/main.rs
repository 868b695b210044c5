//! Layerdex CLI - Command-line interface for layer index files

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use layerdex::IndexConfig;
use std::path::{Path, PathBuf};

mod commands;

const DEFAULT_DB_PATH: &str = "./data/layerdex.db";

#[derive(Parser)]
#[command(name = "layerdex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the index file [default: ./data/layerdex.db]
    #[arg(short, long, env = "LAYERDEX_DB", global = true)]
    db_path: Option<PathBuf>,

    /// JSON file with index configuration; --db-path overrides its path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index information and row counts
    Status,

    /// Index a layer from a TOC JSON document
    Import {
        /// TOC document produced by the layer extractor
        toc: PathBuf,

        /// Digest of the layer blob
        #[arg(long)]
        digest: String,

        /// Image reference the layer was pulled from (e.g. "nginx:1.25")
        #[arg(long)]
        image: Option<String>,
    },

    /// List indexed layers by digest or image provenance
    Layers(LayerArgs),

    /// Search file names across indexed layers
    Search(SearchArgs),
}

#[derive(clap::Args)]
pub(crate) struct LayerArgs {
    /// Exact layer digest
    #[arg(long, conflicts_with_all = ["registry", "namespace", "repository", "tag", "image"])]
    pub digest: Option<String>,

    #[arg(long)]
    pub registry: Option<String>,

    #[arg(long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub repository: Option<String>,

    #[arg(long)]
    pub tag: Option<String>,

    /// Image reference; individual flags override its parts
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(clap::Args)]
#[command(group(ArgGroup::new("mode").args(["prefix", "suffix", "glob"])))]
pub(crate) struct SearchArgs {
    /// File path, or a pattern when combined with a match flag
    pub pattern: String,

    /// Match paths starting with the pattern
    #[arg(long)]
    pub prefix: bool,

    /// Match paths ending with the pattern
    #[arg(long)]
    pub suffix: bool,

    /// Treat the pattern as a GLOB expression
    #[arg(long)]
    pub glob: bool,

    /// Only search layers with this digest
    #[arg(long, conflicts_with = "image")]
    pub digest: Option<String>,

    /// Only search layers from this image reference
    #[arg(long)]
    pub image: Option<String>,

    /// Stop after this many results
    #[arg(short, long)]
    pub limit: Option<usize>,
}

fn load_config(db_path: Option<PathBuf>, config: Option<&Path>) -> Result<IndexConfig> {
    let mut cfg = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str::<IndexConfig>(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => IndexConfig::new(DEFAULT_DB_PATH),
    };
    if let Some(path) = db_path {
        cfg.path = path;
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = load_config(cli.db_path, cli.config.as_deref())?;

    // Execute command
    match cli.command {
        Commands::Status => {
            commands::status::execute(config, cli.json)?;
        }
        Commands::Import { toc, digest, image } => {
            commands::import::execute(config, &toc, &digest, image.as_deref(), cli.json)?;
        }
        Commands::Layers(args) => {
            commands::layers::execute(config, args, cli.json)?;
        }
        Commands::Search(args) => {
            commands::search::execute(config, args, cli.json)?;
        }
    }

    Ok(())
}
