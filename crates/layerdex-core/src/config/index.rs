use super::read_pool::ReadPoolConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a layer index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode
    /// Default: true
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// SQLite synchronous mode
    #[serde(default)]
    pub synchronous: SynchronousMode,

    /// SQLite cache size (in pages, negative = KB)
    /// Default: -16000 (16MB)
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// How long a connection waits on a locked database file before
    /// returning SQLITE_BUSY
    /// Default: 5000ms
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Upper bound on waiting for the store-wide writer lock
    /// Default: 30000ms
    #[serde(default = "default_write_lock_timeout")]
    pub write_lock_timeout_ms: u64,

    /// Mode for directories created on the way to `path` (unix only)
    /// Default: 0o750
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// How many times `reinitialize()` may retry after a failed initialization
    /// Default: 3
    #[serde(default = "default_max_reinit_attempts")]
    pub max_reinit_attempts: u32,

    /// What to do when a digest is inserted again
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Rows fetched per round trip by paged file searches
    /// Default: 512
    #[serde(default = "default_query_page_size")]
    pub query_page_size: usize,

    /// Read pool configuration (enabled by default with 4 connections)
    #[serde(default)]
    pub read_pool: ReadPoolConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SynchronousMode {
    /// Full fsync (safest, slowest)
    Full,
    /// fsync at critical moments (good balance)
    #[default]
    Normal,
    /// No fsync (fastest, least safe)
    Off,
}

impl SynchronousMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            SynchronousMode::Full => "FULL",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Off => "OFF",
        }
    }
}

/// Behavior when a layer with the same digest is already indexed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Every insert creates a new layer row (re-scan history is kept)
    #[default]
    Append,
    /// Return the id of the oldest existing layer and write nothing
    SkipExisting,
}

fn default_wal_mode() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -16000 // 16MB
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_write_lock_timeout() -> u64 {
    30_000
}

fn default_dir_mode() -> u32 {
    0o750
}

fn default_max_reinit_attempts() -> u32 {
    3
}

fn default_query_page_size() -> usize {
    512
}

impl IndexConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal_mode: default_wal_mode(),
            synchronous: SynchronousMode::default(),
            cache_size: default_cache_size(),
            busy_timeout_ms: default_busy_timeout(),
            write_lock_timeout_ms: default_write_lock_timeout(),
            dir_mode: default_dir_mode(),
            max_reinit_attempts: default_max_reinit_attempts(),
            duplicate_policy: DuplicatePolicy::default(),
            query_page_size: default_query_page_size(),
            read_pool: ReadPoolConfig::default(),
        }
    }

    pub fn with_synchronous(mut self, synchronous: SynchronousMode) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_wal_mode(mut self, wal_mode: bool) -> Self {
        self.wal_mode = wal_mode;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_write_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.write_lock_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_reinit_attempts(mut self, attempts: u32) -> Self {
        self.max_reinit_attempts = attempts;
        self
    }

    pub fn with_query_page_size(mut self, page_size: usize) -> Self {
        self.query_page_size = page_size.max(1);
        self
    }

    /// Configure read connection pooling
    pub fn with_read_pool(mut self, config: ReadPoolConfig) -> Self {
        self.read_pool = config;
        self
    }

    /// Enable read pooling with the specified pool size
    pub fn with_read_pool_size(mut self, pool_size: usize) -> Self {
        self.read_pool = ReadPoolConfig::enabled(pool_size);
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn write_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let cfg: IndexConfig = serde_json::from_str(r#"{"path": "/var/lib/layerdex/toc.db"}"#)
            .unwrap();
        assert!(cfg.wal_mode);
        assert_eq!(cfg.synchronous, SynchronousMode::Normal);
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Append);
        assert_eq!(cfg.dir_mode, 0o750);
        assert_eq!(cfg.read_pool, ReadPoolConfig::enabled(4));
        assert_eq!(cfg.query_page_size, 512);
    }

    #[test]
    fn test_duplicate_policy_snake_case() {
        let cfg: IndexConfig = serde_json::from_str(
            r#"{"path": "x.db", "duplicate_policy": "skip_existing", "read_pool": {"enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::SkipExisting);
        assert_eq!(cfg.read_pool.effective_size(), 1);
    }

    #[test]
    fn test_builders() {
        let cfg = IndexConfig::new("a.db")
            .with_query_page_size(0)
            .with_read_pool_size(8)
            .with_synchronous(SynchronousMode::Full);
        assert_eq!(cfg.query_page_size, 1);
        assert_eq!(cfg.read_pool.effective_size(), 8);
        assert_eq!(cfg.synchronous.as_pragma(), "FULL");
    }
}
