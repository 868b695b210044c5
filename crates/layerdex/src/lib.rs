//! Layerdex: a persistent index of container-image layers
//!
//! Layerdex records, for every scanned layer, its size metadata and full
//! file listing, optionally tagged with the image reference that produced
//! it, and answers lookups by digest, by image provenance and by file name.
//!
//! - **Lazy initialization**: the backing SQLite file is created on first use,
//!   exactly once, no matter how many threads race on it
//! - **Atomic inserts**: a layer and all of its files become visible together
//! - **Concurrent reads**: queries run on a read-only connection pool and
//!   never block the writer
//!
//! # Quick Start
//!
//! ```no_run
//! use layerdex::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let index = LayerIndex::open(IndexConfig::new("./data/layers.db"))?;
//!
//! let toc = Toc::new(100, 400).with_file(TocFile::new("/etc/passwd").with_size(1024));
//! let image = ImageContext::parse("ghcr.io/chainguard/nginx:latest")?;
//! index.insert("sha256:abc", &toc, Some(&image))?;
//!
//! for hit in index.find_files_by_name(NameMatch::Exact("/etc/passwd".into()), FileScope::All)? {
//!     let hit = hit?;
//!     println!("{} is in layer {}", hit.file.name, hit.layer.digest);
//! }
//! # Ok(())
//! # }
//! ```

pub mod prelude;

// Re-export core types
pub use layerdex_core::{
    config::{DuplicatePolicy, IndexConfig, ReadPoolConfig, SynchronousMode},
    deadline::Deadline,
    error::{ErrorKind, IndexError, InitError, InitStage, Phase, Result},
    observe,
    types::image::{DEFAULT_NAMESPACE, DEFAULT_REGISTRY},
    types::{
        EntryType, FileEntry, FileId, ImageContext, ImageFilter, Layer, LayerId, Toc, TocFile,
    },
};

// Re-export the SQLite implementation
pub use layerdex_sqlite::{
    FileMatch, FileMatches, FileScope, IndexStats, InsertOptions,
    LayerIndex, NameMatch, SCHEMA_VERSION,
};
