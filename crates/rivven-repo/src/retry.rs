//! Retry policy engine
//!
//! A [`RetryPolicy`] is a stateless value passed into each execution. It
//! re-runs the whole operation (connection acquisition included) on transient
//! faults, waiting `backoff(attempt)` between attempts:
//!
//! | attempt that failed | default delay |
//! |---------------------|---------------|
//! | 1                   | 1s            |
//! | 2                   | 2s            |
//! | 3                   | 4s            |
//!
//! Permanent faults and exhaustion surface the last error annotated with the
//! operation name and attempt count. Cancellation is never retried.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Backoff function: failed attempt number (1-based) to delay
#[derive(Clone)]
pub enum Backoff {
    /// `unit * base^(attempt-1)`, capped at `max`
    Exponential {
        /// Growth factor per attempt
        base: f64,
        /// Delay after the first failure
        unit: Duration,
        /// Upper bound for any single delay
        max: Duration,
    },
    /// Same delay after every failure
    Fixed(Duration),
    /// Caller-supplied schedule
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: 2.0,
            unit: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential { base, unit, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("unit", unit)
                .field("max", max)
                .finish(),
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    /// Delay after the given failed attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base, unit, max } => {
                // cap the exponent so powi cannot overflow into inf
                let exponent = attempt.saturating_sub(1).min(30) as i32;
                let millis = unit.as_millis() as f64 * base.powi(exponent);
                Duration::from_millis(millis.min(max.as_millis() as f64).max(0.0) as u64)
            }
            Self::Fixed(d) => *d,
            Self::Custom(f) => f(attempt),
        }
    }
}

/// Predicate deciding whether an error is worth another attempt
pub type Classifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Retry policy shared across calls
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: Backoff,
    /// Random spread applied to each delay, 0.0 (none) to 1.0 (±100%)
    pub jitter: f64,
    classifier: Classifier,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: 0.0,
            classifier: Arc::new(Error::is_transient),
        }
    }
}

impl RetryPolicy {
    /// Create the default policy: 3 attempts, exponential base 2 from 1s, no jitter
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set total attempts (at least 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the backoff schedule
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the transient-fault classifier
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Whether `err` should be retried under this policy
    pub fn is_retriable(&self, err: &Error) -> bool {
        !err.is_cancelled() && (self.classifier)(err)
    }

    /// Delay to wait after the given failed attempt, jitter included
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64((1.0 + spread).max(0.0))
    }

    /// Run `op` under this policy.
    ///
    /// `op` receives the 1-based attempt number and must perform the complete
    /// operation, including acquiring and releasing its connection. Waits
    /// between attempts end early when `cancel` fires.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if self.is_retriable(&e) && attempt < max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        category = %e.category(),
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.is_transient() || self.is_retriable(&e) {
                        error!(
                            operation,
                            attempts = attempt,
                            error = %e,
                            "Operation failed, retry attempts exhausted"
                        );
                    } else {
                        error!(
                            operation,
                            attempts = attempt,
                            category = %e.category(),
                            error = %e,
                            "Operation failed with a permanent error"
                        );
                    }
                    return Err(e.in_operation(operation, attempt));
                }
            }
        }
    }
}
