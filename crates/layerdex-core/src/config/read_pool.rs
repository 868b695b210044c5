use serde::{Deserialize, Serialize};

/// Configuration for read connection pooling
///
/// Queries run on dedicated read-only connections so that they never block,
/// and are never blocked by, the single writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadPoolConfig {
    /// Whether pooling is enabled (default: true)
    ///
    /// When disabled the pool holds a single read-only connection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of read-only connections in the pool (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Timeout in milliseconds when acquiring a pooled connection (default: 5000)
    ///
    /// If no connection is available within this time, an error is returned.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl Default for ReadPoolConfig {
    fn default() -> Self {
        Self::enabled(default_pool_size())
    }
}

impl ReadPoolConfig {
    /// Create a new enabled read pool configuration
    pub fn enabled(pool_size: usize) -> Self {
        Self {
            enabled: true,
            pool_size,
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }

    /// Single read connection
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the acquire timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Number of connections the pool will actually open
    pub fn effective_size(&self) -> usize {
        if self.enabled {
            self.pool_size.max(1)
        } else {
            1
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout() -> u64 {
    5000
}
