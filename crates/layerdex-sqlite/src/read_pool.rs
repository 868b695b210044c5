//! SQLite Read Connection Pool
//!
//! Provides a pool of read-only SQLite connections for concurrent reads.
//! Each query checks a connection out, so readers never queue behind the
//! writer connection and only ever observe committed data.

use layerdex_core::{
    error::{IndexError, Phase, Result},
    Deadline, ReadPoolConfig,
};
use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A pooled read-only connection
///
/// The connection goes back to the pool when this guard is dropped.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a SqliteReadPool,
}

impl<'a> PooledConnection<'a> {
    /// Execute a read-only query
    ///
    /// # Example
    /// ```ignore
    /// let conn = pool.acquire()?;
    /// let count: i64 = conn.query_row("SELECT COUNT(*) FROM layers", [], |row| row.get(0))?;
    /// ```
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.connection()
            .query_row(sql, params, f)
            .map_err(|e| IndexError::Query(e.to_string()))
    }

    /// Get direct access to the underlying connection
    pub fn connection(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// SQLite Read Connection Pool
///
/// Manages a fixed set of read-only SQLite connections. Each connection is
/// opened with the `SQLITE_OPEN_READ_ONLY` flag.
///
/// # Example
///
/// ```ignore
/// let pool = SqliteReadPool::new(&db_path, &ReadPoolConfig::enabled(4), Duration::from_secs(5))?;
///
/// let conn = pool.acquire()?;
/// let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
/// // Connection is returned to the pool when `conn` is dropped
/// ```
pub struct SqliteReadPool {
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
    closed: AtomicBool,
    acquire_timeout: Duration,
    pool_size: usize,
}

impl SqliteReadPool {
    /// Open `config.effective_size()` read-only connections to `db_path`.
    pub fn new(db_path: &Path, config: &ReadPoolConfig, busy_timeout: Duration) -> Result<Self> {
        let pool_size = config.effective_size();
        let mut connections = Vec::with_capacity(pool_size);

        for _ in 0..pool_size {
            let conn = Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| IndexError::Query(e.to_string()))?;
            conn.busy_timeout(busy_timeout)
                .map_err(|e| IndexError::Query(e.to_string()))?;

            connections.push(conn);
        }

        Ok(Self {
            idle: Mutex::new(connections),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            pool_size,
        })
    }

    /// Acquire a connection, waiting up to the configured timeout.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        self.acquire_until(&Deadline::none())
    }

    /// Acquire a connection, waiting no longer than the pool timeout or
    /// `deadline`, whichever comes first.
    pub fn acquire_until(&self, deadline: &Deadline) -> Result<PooledConnection<'_>> {
        deadline.check(Phase::Query)?;
        let timeout = deadline.bound(self.acquire_timeout);
        let give_up = Instant::now() + timeout;

        let mut idle = self.idle.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(IndexError::Closed);
            }
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: self,
                });
            }
            if Instant::now() >= give_up {
                deadline.check(Phase::Query)?;
                return Err(IndexError::PoolTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            self.available.wait_until(&mut idle, give_up);
        }
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(idle);
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "Failed to close returned read connection");
            }
            return;
        }
        idle.push(conn);
        drop(idle);
        self.available.notify_one();
    }

    /// Close idle connections and refuse further checkouts.
    ///
    /// Connections still checked out are closed when they are returned.
    pub fn close(&self) {
        let drained = {
            let mut idle = self.idle.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *idle)
        };
        self.available.notify_all();
        for conn in drained {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "Failed to close read connection");
            }
        }
    }

    /// Number of connections currently idle in the pool
    #[cfg(test)]
    fn available(&self) -> usize {
        self.idle.lock().len()
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the pool size
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_db() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let conn = Connection::open(&db_path).unwrap();
        conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, value TEXT)", [])
            .unwrap();
        conn.execute("INSERT INTO test (id, value) VALUES (1, 'hello')", [])
            .unwrap();
        conn.execute("INSERT INTO test (id, value) VALUES (2, 'world')", [])
            .unwrap();
        drop(conn);

        (temp_dir, db_path)
    }

    fn pool(db_path: &Path, config: ReadPoolConfig) -> SqliteReadPool {
        SqliteReadPool::new(db_path, &config, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_pool_acquire_release() {
        let (_temp_dir, db_path) = create_test_db();
        let pool = pool(&db_path, ReadPoolConfig::enabled(2));

        assert_eq!(pool.available(), 2);

        let conn1 = pool.acquire().unwrap();
        assert_eq!(pool.available(), 1);

        let conn2 = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);


        drop(conn1);
        assert_eq!(pool.available(), 1);

        drop(conn2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pool_query() {
        let (_temp_dir, db_path) = create_test_db();
        let pool = pool(&db_path, ReadPoolConfig::enabled(2));

        let conn = pool.acquire().unwrap();
        let value: String = conn
            .query_row("SELECT value FROM test WHERE id = ?1", [1], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(value, "hello");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM test", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_connections_are_read_only() {
        let (_temp_dir, db_path) = create_test_db();
        let pool = pool(&db_path, ReadPoolConfig::disabled());
        assert_eq!(pool.pool_size(), 1);

        let conn = pool.acquire().unwrap();
        assert!(conn
            .execute("INSERT INTO test (id, value) VALUES (3, 'nope')", [])
            .is_err());
    }

    #[test]
    fn test_acquire_times_out() {
        let (_temp_dir, db_path) = create_test_db();
        let pool = pool(&db_path, ReadPoolConfig::enabled(1).with_timeout(20));

        let _held = pool.acquire().unwrap();
        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, IndexError::PoolTimeout { .. }));

        let err = pool
            .acquire_until(&Deadline::after(Duration::from_millis(5)))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            IndexError::DeadlineExceeded {
                phase: Phase::Query
            } | IndexError::PoolTimeout { .. }
        ));
    }

    #[test]
    fn test_waiter_is_woken_on_release() {
        let (_temp_dir, db_path) = create_test_db();
        let pool = Arc::new(pool(&db_path, ReadPoolConfig::enabled(1).with_timeout(5000)));

        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let conn = pool.acquire().unwrap();
                conn.query_row("SELECT COUNT(*) FROM test", [], |row| row.get::<_, i64>(0))
                    .unwrap()
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap(), 2);
    }

    #[test]
    fn test_close_refuses_checkout() {
        let (_temp_dir, db_path) = create_test_db();
        let pool = pool(&db_path, ReadPoolConfig::enabled(2));

        let held = pool.acquire().unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.available(), 0);
        assert!(matches!(pool.acquire().err().unwrap(), IndexError::Closed));

        // Returned after close: dropped instead of pooled
        drop(held);
        assert_eq!(pool.available(), 0);
    }
}
