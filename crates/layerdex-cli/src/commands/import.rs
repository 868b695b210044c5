//! Import command implementation

use anyhow::{Context, Result};
use layerdex::{ImageContext, IndexConfig, Toc};
use std::path::Path;

pub fn execute(
    config: IndexConfig,
    toc_path: &Path,
    digest: &str,
    image: Option<&str>,
    json: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(toc_path)
        .with_context(|| format!("Failed to read TOC {}", toc_path.display()))?;
    let toc: Toc = serde_json::from_str(&text)
        .with_context(|| format!("Invalid TOC document {}", toc_path.display()))?;
    let image = image
        .map(ImageContext::parse)
        .transpose()
        .context("Invalid image reference")?;

    let index = super::open_index(config)?;
    let layer_id = index
        .insert(digest, &toc, image.as_ref())
        .with_context(|| format!("Failed to index layer {}", digest))?;

    tracing::info!(
        digest,
        layer_id = %layer_id,
        files = toc.files.len(),
        "Imported layer"
    );

    if json {
        return super::print_json(&serde_json::json!({
            "layer_id": layer_id,
            "digest": digest,
            "files": toc.files.len(),
            "image_ref": image.as_ref().and_then(ImageContext::image_ref),
        }));
    }

    println!(
        "Indexed {} as layer {} ({} files)",
        digest,
        layer_id,
        toc.files.len()
    );
    if let Some(image_ref) = image.as_ref().and_then(ImageContext::image_ref) {
        println!("Image: {}", image_ref);
    }

    Ok(())
}
