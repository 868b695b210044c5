//! Search command implementation

use anyhow::{Context, Result};
use layerdex::{FileScope, ImageFilter, IndexConfig, NameMatch};

use crate::SearchArgs;

fn name_match(args: &SearchArgs) -> NameMatch {
    let pattern = args.pattern.clone();
    if args.prefix {
        NameMatch::Prefix(pattern)
    } else if args.suffix {
        NameMatch::Suffix(pattern)
    } else if args.glob {
        NameMatch::Glob(pattern)
    } else {
        NameMatch::Exact(pattern)
    }
}

fn scope(args: &SearchArgs) -> Result<FileScope> {
    if let Some(digest) = &args.digest {
        return Ok(FileScope::Digest(digest.clone()));
    }
    match args.image.as_deref() {
        Some(reference) => Ok(FileScope::Image(
            ImageFilter::from_reference(reference).context("Invalid image reference")?,
        )),
        None => Ok(FileScope::All),
    }
}

pub fn execute(config: IndexConfig, args: SearchArgs, json: bool) -> Result<()> {
    let index = super::open_existing_index(config)?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let matches = index
        .find_files_by_name(name_match(&args), scope(&args)?)
        .context("Failed to start file search")?;

    if json {
        let hits = matches
            .take(limit)
            .collect::<layerdex::Result<Vec<_>>>()
            .context("File search failed")?;
        return super::print_json(&hits);
    }

    let mut count = 0usize;
    for hit in matches.take(limit) {
        let hit = hit.context("File search failed")?;
        println!(
            "{}  {:>10}  {:<8}  {}",
            hit.file.name,
            hit.file.size,
            hit.file.entry_type().to_string(),
            hit.layer.digest
        );
        count += 1;
    }
    println!("\n{} match(es)", count);

    Ok(())
}
