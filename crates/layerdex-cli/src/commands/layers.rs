//! Layers command implementation

use anyhow::{Context, Result};
use layerdex::{ImageFilter, IndexConfig};

use crate::LayerArgs;

fn filter_from(args: LayerArgs) -> Result<ImageFilter> {
    let mut filter = match args.image.as_deref() {
        Some(reference) => {
            ImageFilter::from_reference(reference).context("Invalid image reference")?
        }
        None => ImageFilter::new(),
    };
    if let Some(registry) = args.registry {
        filter = filter.registry(registry);
    }
    if let Some(namespace) = args.namespace {
        filter = filter.namespace(namespace);
    }
    if let Some(repository) = args.repository {
        filter = filter.repository(repository);
    }
    if let Some(tag) = args.tag {
        filter = filter.tag(tag);
    }
    Ok(filter)
}

pub fn execute(config: IndexConfig, args: LayerArgs, json: bool) -> Result<()> {
    let index = super::open_existing_index(config)?;

    let layers = match args.digest.clone() {
        Some(digest) => index
            .find_layers_by_digest(&digest)
            .context("Failed to look up digest")?,
        None => {
            let filter = filter_from(args)?;
            tracing::debug!(?filter, "Listing layers");
            index
                .find_layers_by_image(&filter)
                .context("Failed to query layers")?
        }
    };

    if json {
        return super::print_json(&layers);
    }

    if layers.is_empty() {
        println!("No layers found");
        return Ok(());
    }
    for layer in &layers {
        println!("{}", super::layer_line(layer));
    }
    println!("\n{} layer(s)", layers.len());

    Ok(())
}
