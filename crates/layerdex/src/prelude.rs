//! Layerdex Prelude
//!
//! Import this to get all commonly used types:
//!
//! ```
//! use layerdex::prelude::*;
//! ```

// Store
pub use crate::{IndexStats, InsertOptions, LayerIndex};

// Configs
pub use crate::{DuplicatePolicy, IndexConfig, ReadPoolConfig, SynchronousMode};

// Data model
pub use crate::{EntryType, FileEntry, FileId, ImageContext, ImageFilter, Layer, LayerId, Toc, TocFile};

// Queries
pub use crate::{FileMatch, FileMatches, FileScope, NameMatch};

// Errors and deadlines
pub use crate::{Deadline, ErrorKind, IndexError, Result};
