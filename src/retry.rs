//! Retry and timeout control around a single fallible async operation.
//!
//! Every attempt runs under `tokio::time::timeout`. An attempt that exceeds
//! it is dropped (its future is abandoned, not joined) and counts as a
//! failure. A policy with `retries = n` makes at most `n + 1` attempts.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay inserted between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    Fixed(Duration),
    /// `initial * 2^(retry - 1)`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        Self {
            retries,
            timeout,
            backoff: Backoff::None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Why the last attempt failed.
#[derive(Debug)]
pub enum AttemptError {
    Failed(anyhow::Error),
    TimedOut(Duration),
}

impl AttemptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::TimedOut(_))
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{:#}", e),
            AttemptError::TimedOut(d) => write!(f, "timed out after {}ms", d.as_millis()),
        }
    }
}

/// Result of running an operation under a policy.
#[derive(Debug)]
pub struct PolicyOutcome<T> {
    pub result: Result<T, AttemptError>,
    /// Attempts actually made, including the successful one.
    pub attempts: u32,
}

/// Run `attempt_fn` until it succeeds or the policy is exhausted.
///
/// `attempt_fn` receives the 1-based attempt number.
pub async fn with_policy<T, F, Fut>(policy: &RetryPolicy, mut attempt_fn: F) -> PolicyOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut last_error = AttemptError::TimedOut(policy.timeout);

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = policy.backoff.delay(attempt - 1);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        match tokio::time::timeout(policy.timeout, attempt_fn(attempt)).await {
            Ok(Ok(value)) => {
                return PolicyOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Ok(Err(e)) => {
                warn!(attempt, max_attempts, error = %format!("{:#}", e), "attempt failed");
                last_error = AttemptError::Failed(e);
            }
            Err(_) => {
                warn!(
                    attempt,
                    max_attempts,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "attempt timed out"
                );
                last_error = AttemptError::TimedOut(policy.timeout);
            }
        }
    }

    PolicyOutcome {
        result: Err(last_error),
        attempts: max_attempts,
    }
}
