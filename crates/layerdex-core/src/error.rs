use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Step of store initialization that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    CreateDir,
    Open,
    Configure,
    Schema,
    ReadPool,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStage::CreateDir => write!(f, "create directory"),
            InitStage::Open => write!(f, "open database"),
            InitStage::Configure => write!(f, "configure connection"),
            InitStage::Schema => write!(f, "create schema"),
            InitStage::ReadPool => write!(f, "open read pool"),
        }
    }
}

/// Initialization failure.
///
/// Cloneable so that every caller racing on first use receives the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to initialize layer index at {} ({stage}): {reason}", path.display())]
pub struct InitError {
    pub path: PathBuf,
    pub stage: InitStage,
    pub reason: String,
}

impl InitError {
    pub fn new(path: impl Into<PathBuf>, stage: InitStage, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Which kind of operation a deadline or cancellation interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Insert,
    Query,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Insert => write!(f, "insert"),
            Phase::Query => write!(f, "query"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Initialization(#[from] InitError),

    #[error("Re-initialization limit reached after {attempts} attempts")]
    ReinitLimit { attempts: u32 },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Write lock timeout after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Read pool acquire timeout after {timeout_ms}ms")]
    PoolTimeout { timeout_ms: u64 },

    #[error("Deadline exceeded during {phase}")]
    DeadlineExceeded { phase: Phase },

    #[error("{phase} cancelled")]
    Cancelled { phase: Phase },

    #[error("Layer index is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`IndexError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The store could not be brought up; sticky for the instance.
    Initialization,
    /// An insert failed and was rolled back; the store stays usable.
    Transaction,
    /// Input was rejected before touching the store.
    Validation,
    /// A read failed.
    Query,
    /// The handle was closed.
    Closed,
    Io,
    Internal,
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::Initialization(_) | IndexError::ReinitLimit { .. } => {
                ErrorKind::Initialization
            }
            IndexError::Transaction(_) | IndexError::LockTimeout { .. } => ErrorKind::Transaction,
            IndexError::Validation(_) => ErrorKind::Validation,
            IndexError::Query(_) | IndexError::PoolTimeout { .. } => ErrorKind::Query,
            IndexError::DeadlineExceeded { phase } | IndexError::Cancelled { phase } => {
                match phase {
                    Phase::Insert => ErrorKind::Transaction,
                    Phase::Query => ErrorKind::Query,
                }
            }
            IndexError::Closed => ErrorKind::Closed,
            IndexError::Io(_) => ErrorKind::Io,
            IndexError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The initialization error, if this is one.
    pub fn as_init_error(&self) -> Option<&InitError> {
        match self {
            IndexError::Initialization(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
