//! Layerdex Core: types and configuration for the container layer index
//!
//! This crate defines the storage-engine independent pieces of layerdex:
//! - Data model: layers, file entries, TOC records and image provenance
//! - Configuration: index and read pool settings (serde-friendly)
//! - Errors: the typed error taxonomy shared by every backend
//! - Deadlines: caller-supplied bounds for inserts and long-running queries
//! - Observability: optional metrics hooks (`observe` feature)

pub mod config;
pub mod deadline;
pub mod error;
pub mod observe;
pub mod types;

pub use config::{DuplicatePolicy, IndexConfig, ReadPoolConfig, SynchronousMode};
pub use deadline::Deadline;
pub use error::{ErrorKind, IndexError, InitError, InitStage, Phase, Result};
pub use types::{
    EntryType, FileEntry, FileId, ImageContext, ImageFilter, Layer, LayerId, Toc, TocFile,
};
