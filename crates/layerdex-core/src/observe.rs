//! Optional metrics instrumentation for layerdex.
//!
//! When the `observe` feature is enabled, key operations emit counters and
//! histograms via the [`metrics`] crate. A downstream application must install
//! a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a store initialization attempt.
///
/// - `layerdex.init.total` – counter with `outcome` label
/// - `layerdex.init.duration_seconds` – histogram
#[inline]
pub fn record_init(duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("layerdex.init.total", "outcome" => outcome).increment(1);
        metrics::histogram!("layerdex.init.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, success);
    }
}

/// Record a layer insert (counter + latency + files written).
///
/// - `layerdex.insert.total` – counter with `outcome` label
/// - `layerdex.insert.duration_seconds` – histogram
/// - `layerdex.insert.files_total` – counter of committed file rows
#[inline]
pub fn record_insert(duration: std::time::Duration, files: usize, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("layerdex.insert.total", "outcome" => outcome).increment(1);
        metrics::histogram!("layerdex.insert.duration_seconds").record(duration.as_secs_f64());
        if success {
            metrics::counter!("layerdex.insert.files_total").increment(files as u64);
        }
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, files, success);
    }
}

/// Record time spent waiting for the writer lock.
///
/// - `layerdex.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("layerdex.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a query (or one page of a paged query).
///
/// - `layerdex.query.total` – counter with `query` label
/// - `layerdex.query.duration_seconds` – histogram with `query` label
/// - `layerdex.query.rows_total` – counter with `query` label
#[inline]
pub fn record_query(query: &'static str, duration: std::time::Duration, rows: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("layerdex.query.total", "query" => query).increment(1);
        metrics::histogram!("layerdex.query.duration_seconds", "query" => query)
            .record(duration.as_secs_f64());
        metrics::counter!("layerdex.query.rows_total", "query" => query).increment(rows as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (query, duration, rows);
    }
}
