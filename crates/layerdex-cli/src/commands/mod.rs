//! Subcommand implementations

pub mod import;
pub mod layers;
pub mod search;
pub mod status;

use anyhow::{bail, Context, Result};
use layerdex::{IndexConfig, Layer, LayerIndex};
use serde::Serialize;

pub(crate) fn open_index(config: IndexConfig) -> Result<LayerIndex> {
    let path = config.path.clone();
    LayerIndex::open(config)
        .with_context(|| format!("Failed to open layer index at {}", path.display()))
}

/// Open an index that must already exist; used by the read-only commands
/// so a mistyped path does not create an empty index file.
pub(crate) fn open_existing_index(config: IndexConfig) -> Result<LayerIndex> {
    if !config.path.is_file() {
        bail!("No layer index found at {}", config.path.display());
    }
    open_index(config)
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode JSON output")?
    );
    Ok(())
}

/// One-line summary used by the text output of several commands
pub(crate) fn layer_line(layer: &Layer) -> String {
    let indexed_at = layer
        .indexed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>6}  {}  {}  {}",
        layer.id,
        layer.digest,
        indexed_at,
        layer.image_ref.as_deref().unwrap_or("-")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_index_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo").join("layerdex.db");

        let err = open_existing_index(IndexConfig::new(&path)).err().unwrap();
        assert!(err.to_string().contains("No layer index found"));
        assert!(!path.exists());
        assert!(!dir.path().join("typo").exists());

        open_index(IndexConfig::new(&path)).unwrap().close().unwrap();
        assert!(open_existing_index(IndexConfig::new(&path)).is_ok());
    }
}
