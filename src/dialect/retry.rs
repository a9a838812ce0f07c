//! Bounded retry of connection acquisition.
//!
//! Only errors of kind `RetryableAcquisition` are retried: they are raised before any
//! statement reaches the backend, so a retry can never re-apply a partial write. Once the
//! budget is spent the last failure is re-raised as a transport error.

use crate::error::Result;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Snapshot of a retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub count: u32,
    pub period: Duration,
}

impl RetryPolicy {
    pub fn new(count: u32, period: Duration) -> Self {
        Self { count, period }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Run `acquire` until it succeeds, fails with a non-retryable error, or the budget runs
    /// out. Sleeps `period` between attempts (cooperatively inside a coroutine).
    pub fn acquire<T, F>(&self, target: &str, mut acquire: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_connection_span(target).entered();

        let mut retries = 0u32;
        loop {
            match acquire() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if retries >= self.count => {
                    return Err(err.into_exhausted(retries + 1));
                }
                Err(err) => {
                    retries += 1;
                    log::warn!(
                        "Connection acquisition for {} failed (retry {}/{}): {}",
                        target,
                        retries,
                        self.count,
                        err
                    );
                    #[cfg(feature = "metrics")]
                    crate::metrics::METRICS.record_acquisition_retry();
                    if !self.period.is_zero() {
                        may::coroutine::sleep(self.period);
                    }
                }
            }
        }
    }
}

/// Retry budget shared by a dialect and every client it opens.
#[derive(Debug, Default)]
pub struct RetryBudget {
    count: AtomicU32,
    period_millis: AtomicU64,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        let budget = Self::default();
        budget.configure(policy.count, policy.period);
        budget
    }

    pub fn configure(&self, count: u32, period: Duration) {
        self.count.store(count, Ordering::Relaxed);
        self.period_millis
            .store(period.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            count: self.count.load(Ordering::Relaxed),
            period: Duration::from_millis(self.period_millis.load(Ordering::Relaxed)),
        }
    }
}
