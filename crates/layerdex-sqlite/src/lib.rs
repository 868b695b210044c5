//! SQLite-backed layer index
//!
//! Persists scanned container-image layers and their file listings in a
//! single SQLite file and serves lookups by digest, image provenance and
//! file name.
//!
//! Key features:
//! - Lazy, exactly-once initialization with a sticky failure state
//! - One atomic transaction per layer, serialized behind a single writer
//! - WAL mode with a pool of read-only connections for queries
//! - Forward migration of files created before provenance columns existed

pub mod query;
mod read_pool;
mod schema;
pub mod store;
mod timestamp;
pub mod txn;

pub use query::{FileMatch, FileMatches, FileScope, NameMatch};
pub use schema::SCHEMA_VERSION;
pub use store::{IndexStats, InsertOptions, LayerIndex};
