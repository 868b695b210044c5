//! Status command implementation

use anyhow::{Context, Result};
use layerdex::IndexConfig;

pub fn execute(config: IndexConfig, json: bool) -> Result<()> {
    tracing::info!("Checking index status: {}", config.path.display());

    let index = super::open_existing_index(config)?;
    let stats = index.stats().context("Failed to read index statistics")?;

    if json {
        return super::print_json(&stats);
    }

    println!("\nIndex Status");
    println!("{}", "=".repeat(60));
    println!("Path: {}", index.path().display());
    println!("Schema Version: {}", stats.schema_version);
    println!("Layers: {}", stats.layers);
    println!("Files: {}", stats.files);

    Ok(())
}
