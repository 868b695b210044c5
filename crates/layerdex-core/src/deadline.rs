//! Caller-supplied bounds for inserts and queries.
//!
//! A [`Deadline`] combines an optional point in time with an optional shared
//! cancellation flag. Backends check it at safe points (before taking a lock,
//! between rows) and abort with [`IndexError::DeadlineExceeded`] or
//! [`IndexError::Cancelled`]. Work already committed is never undone.

use crate::error::{IndexError, Phase, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Deadline {
    /// No deadline and no cancellation.
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            cancel: None,
        }
    }

    /// Abort as soon as `flag` is set to `true`.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn is_unbounded(&self) -> bool {
        self.at.is_none() && self.cancel.is_none()
    }

    /// Time left, `None` when there is no time bound.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.at, Some(at) if Instant::now() >= at)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Fail if cancelled or expired.
    pub fn check(&self, phase: Phase) -> Result<()> {
        if self.is_cancelled() {
            return Err(IndexError::Cancelled { phase });
        }
        if self.is_expired() {
            return Err(IndexError::DeadlineExceeded { phase });
        }
        Ok(())
    }

    /// The shorter of `default` and the remaining time.
    pub fn bound(&self, default: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(default),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_expires() {
        let d = Deadline::none();
        assert!(d.is_unbounded());
        assert!(d.remaining().is_none());
        assert!(d.check(Phase::Query).is_ok());
        assert_eq!(d.bound(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn test_expired_deadline() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(d.is_expired());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
        assert!(matches!(
            d.check(Phase::Insert),
            Err(IndexError::DeadlineExceeded {
                phase: Phase::Insert
            })
        ));
    }

    #[test]
    fn test_bound_takes_minimum() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(d.bound(Duration::from_millis(10)) <= Duration::from_millis(10));
        assert!(d.bound(Duration::from_secs(3600)) <= Duration::from_secs(60));
    }

    #[test]
    fn test_cancel_flag_wins() {
        let flag = Arc::new(AtomicBool::new(false));
        let d = Deadline::after(Duration::from_secs(60)).with_cancel_flag(flag.clone());
        assert!(d.check(Phase::Query).is_ok());

        flag.store(true, Ordering::Release);
        assert!(matches!(
            d.check(Phase::Query),
            Err(IndexError::Cancelled {
                phase: Phase::Query
            })
        ));
    }
}
