use chrono::{DateTime, Utc};
use layerdex_core::{
    error::{IndexError, InitError, InitStage, Phase, Result},
    observe, Deadline, DuplicatePolicy, ImageContext, IndexConfig, LayerId, Toc,
};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::read_pool::SqliteReadPool;
use crate::schema;
use crate::txn::IndexWriteTxn;

type InitOutcome = std::result::Result<Arc<Backend>, InitError>;

/// Connections owned by an initialized index.
pub(crate) struct Backend {
    /// The writer; `None` once the index is closed
    writer: Mutex<Option<Connection>>,
    pub(crate) readers: SqliteReadPool,
    schema_version: u32,
}

/// Per-call options for [`LayerIndex::insert_with`].
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Bounds the writer lock wait and is checked between file rows
    pub deadline: Deadline,
    /// Explicit indexed-at time; the database clock is used when unset
    pub indexed_at: Option<DateTime<Utc>>,
}

impl InsertOptions {
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_indexed_at(mut self, indexed_at: DateTime<Utc>) -> Self {
        self.indexed_at = Some(indexed_at);
        self
    }
}

/// Row counts and lifetime counters for an index handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub layers: u64,
    pub files: u64,
    pub schema_version: u32,
    /// How many times the initialization routine has run on this handle
    pub initializations: u64,
    pub inserts_committed: u64,
    pub inserts_failed: u64,
}

/// SQLite-backed index of container-image layers and their files
///
/// The backing file is created lazily: the first operation (or an explicit
/// [`initialize`](Self::initialize)) runs initialization exactly once, and
/// every caller racing on that first use observes the same outcome. A failed
/// initialization is sticky until [`reinitialize`](Self::reinitialize).
///
/// Writes are serialized on a single writer connection; reads use a pool of
/// read-only connections and only ever observe committed layers.
pub struct LayerIndex {
    config: IndexConfig,
    state: RwLock<Arc<OnceLock<InitOutcome>>>,
    reinit_attempts: AtomicU32,
    closed: AtomicBool,
    init_runs: AtomicU64,
    inserts_committed: AtomicU64,
    inserts_failed: AtomicU64,
}

impl LayerIndex {
    /// Create a handle without touching the filesystem.
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            state: RwLock::new(Arc::new(OnceLock::new())),
            reinit_attempts: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            init_runs: AtomicU64::new(0),
            inserts_committed: AtomicU64::new(0),
            inserts_failed: AtomicU64::new(0),
        }
    }

    /// Create a handle and initialize it immediately.
    pub fn open(config: IndexConfig) -> Result<Self> {
        let index = Self::new(config);
        index.initialize()?;
        Ok(index)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Bring the backing file and schema into existence.
    ///
    /// Blocks while another caller is initializing; returns the stored
    /// outcome once initialization has run.
    pub fn initialize(&self) -> Result<()> {
        self.backend().map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state.read().get(), Some(Ok(_)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Retry a failed initialization.
    ///
    /// No-op on a ready index. After a failure, discards the stored error and
    /// runs initialization again, at most `max_reinit_attempts` times over
    /// the life of the handle.
    pub fn reinitialize(&self) -> Result<()> {
        if self.is_closed() {
            return Err(IndexError::Closed);
        }

        let cell = {
            let mut state = self.state.write();
            match state.get() {
                Some(Ok(_)) => return Ok(()),
                None => Arc::clone(&*state),
                Some(Err(_)) => {
                    let attempt = self.reinit_attempts.fetch_add(1, Ordering::AcqRel) + 1;
                    if attempt > self.config.max_reinit_attempts {
                        return Err(IndexError::ReinitLimit {
                            attempts: self.config.max_reinit_attempts,
                        });
                    }
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_reinit_attempts,
                        path = %self.config.path.display(),
                        "Re-initializing layer index after failed initialization"
                    );
                    *state = Arc::new(OnceLock::new());
                    Arc::clone(&*state)
                }
            }
        };

        Self::resolve(cell.get_or_init(|| self.run_init())).map(|_| ())
    }

    /// Release the writer and idle reader connections.
    ///
    /// Idempotent. Performs no I/O on a handle that was never initialized.
    /// Every later operation fails with [`IndexError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let cell = Arc::clone(&*self.state.read());
        let Some(Ok(backend)) = cell.get() else {
            tracing::debug!(path = %self.config.path.display(), "Closed uninitialized layer index");
            return Ok(());
        };

        backend.readers.close();
        // Waits for an in-flight insert to finish
        let writer = backend.writer.lock().take();
        if let Some(conn) = writer {
            conn.close()
                .map_err(|(_, e)| IndexError::Internal(format!("failed to close writer: {}", e)))?;
        }

        tracing::info!(path = %self.config.path.display(), "Layer index closed");
        Ok(())
    }

    /// Index one layer and its files as a single atomic unit.
    pub fn insert(&self, digest: &str, toc: &Toc, image: Option<&ImageContext>) -> Result<LayerId> {
        self.insert_with(digest, toc, image, InsertOptions::default())
    }

    /// [`insert`](Self::insert) with a deadline and/or explicit timestamp.
    pub fn insert_with(
        &self,
        digest: &str,
        toc: &Toc,
        image: Option<&ImageContext>,
        options: InsertOptions,
    ) -> Result<LayerId> {
        validate(digest, toc)?;
        let backend = self.backend()?;

        let start = Instant::now();
        let result = self.write_layer(&backend, digest, toc, image, &options);
        observe::record_insert(start.elapsed(), toc.files.len(), result.is_ok());

        match &result {
            Ok(layer_id) => {
                self.inserts_committed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    digest,
                    layer_id = %layer_id,
                    files = toc.files.len(),
                    "Layer indexed"
                );
            }
            Err(e) => {
                self.inserts_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(digest, error = %e, "Layer insert rolled back");
            }
        }
        result
    }

    /// Run [`insert`](Self::insert) on the blocking thread pool.
    pub async fn insert_async(
        self: &Arc<Self>,
        digest: String,
        toc: Toc,
        image: Option<ImageContext>,
    ) -> Result<LayerId> {
        self.run_blocking(move |index| index.insert(&digest, &toc, image.as_ref()))
            .await
    }

    /// Run `f` against this index inside `spawn_blocking`.
    ///
    /// Safe to call from an async context without blocking the runtime.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&LayerIndex) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let index = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&index))
            .await
            .map_err(|e| IndexError::Internal(format!("Task join error: {}", e)))?
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let backend = self.backend()?;
        let conn = backend.readers.acquire()?;
        // One statement, so both counts come from the same snapshot
        let (layers, files): (i64, i64) = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM layers), (SELECT COUNT(*) FROM files)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(IndexStats {
            layers: layers as u64,
            files: files as u64,
            schema_version: backend.schema_version,
            initializations: self.init_runs.load(Ordering::Relaxed),
            inserts_committed: self.inserts_committed.load(Ordering::Relaxed),
            inserts_failed: self.inserts_failed.load(Ordering::Relaxed),
        })
    }

    /// The initialized backend, running initialization on first use.
    pub(crate) fn backend(&self) -> Result<Arc<Backend>> {
        if self.is_closed() {
            return Err(IndexError::Closed);
        }
        let cell = Arc::clone(&*self.state.read());
        Self::resolve(cell.get_or_init(|| self.run_init()))
    }

    fn resolve(outcome: &InitOutcome) -> Result<Arc<Backend>> {
        match outcome {
            Ok(backend) => Ok(Arc::clone(backend)),
            Err(e) => Err(IndexError::Initialization(e.clone())),
        }
    }

    fn run_init(&self) -> InitOutcome {
        self.init_runs.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let result = open_backend(&self.config);
        observe::record_init(start.elapsed(), result.is_ok());

        match &result {
            Ok(backend) => tracing::info!(
                path = %self.config.path.display(),
                schema_version = backend.schema_version,
                readers = backend.readers.pool_size(),
                "Layer index initialized"
            ),
            Err(e) => tracing::error!(error = %e, "Layer index initialization failed"),
        }
        result.map(Arc::new)
    }

    fn write_layer(
        &self,
        backend: &Backend,
        digest: &str,
        toc: &Toc,
        image: Option<&ImageContext>,
        options: &InsertOptions,
    ) -> Result<LayerId> {
        let deadline = &options.deadline;
        deadline.check(Phase::Insert)?;

        let lock_timeout = deadline.bound(self.config.write_lock_timeout());
        let wait = Instant::now();
        let Some(writer) = backend.writer.try_lock_for(lock_timeout) else {
            deadline.check(Phase::Insert)?;
            return Err(IndexError::LockTimeout {
                timeout_ms: lock_timeout.as_millis() as u64,
            });
        };
        observe::record_lock_wait(wait.elapsed());
        let conn = writer.as_ref().ok_or(IndexError::Closed)?;

        let mut txn = IndexWriteTxn::begin(conn)?;

        if matches!(self.config.duplicate_policy, DuplicatePolicy::SkipExisting) {
            if let Some(existing) = txn.existing_layer(digest)? {
                txn.rollback();
                tracing::debug!(digest, layer_id = %existing, "Digest already indexed, skipping");
                return Ok(existing);
            }
        }

        let layer_id = txn.insert_layer(digest, toc, image, options.indexed_at)?;
        for file in &toc.files {
            deadline.check(Phase::Insert)?;
            txn.insert_file(layer_id, file)?;
        }
        txn.commit()?;

        Ok(layer_id)
    }
}

impl Drop for LayerIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close layer index on drop");
        }
    }
}

fn validate(digest: &str, toc: &Toc) -> Result<()> {
    if digest.trim().is_empty() {
        return Err(IndexError::Validation(
            "layer digest must not be empty".into(),
        ));
    }
    if let Some(pos) = toc.files.iter().position(|f| f.name.is_empty()) {
        return Err(IndexError::Validation(format!(
            "file entry {} has an empty name",
            pos
        )));
    }
    Ok(())
}

fn open_backend(config: &IndexConfig) -> std::result::Result<Backend, InitError> {
    let path = config.path.as_path();
    if path.as_os_str().is_empty() || path == Path::new(":memory:") {
        return Err(InitError::new(
            path,
            InitStage::Open,
            "an on-disk database path is required",
        ));
    }

    create_parent_dir(path, config.dir_mode)
        .map_err(|e| InitError::new(path, InitStage::CreateDir, e))?;

    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| InitError::new(path, InitStage::Open, e))?;

    configure_connection(&conn, config)
        .map_err(|e| InitError::new(path, InitStage::Configure, e))?;

    let schema_version =
        schema::init_schema(&mut conn).map_err(|e| InitError::new(path, InitStage::Schema, e))?;

    let readers = SqliteReadPool::new(path, &config.read_pool, config.busy_timeout())
        .map_err(|e| InitError::new(path, InitStage::ReadPool, e))?;

    Ok(Backend {
        writer: Mutex::new(Some(conn)),
        readers,
        schema_version,
    })
}

fn create_parent_dir(path: &Path, mode: u32) -> io::Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(parent)
}

/// Configure SQLite connection
fn configure_connection(conn: &Connection, cfg: &IndexConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(cfg.busy_timeout())?;

    if cfg.wal_mode {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode = %mode, "WAL journal mode unavailable");
        }
    }

    conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", cfg.cache_size)?;

    Ok(())
}
