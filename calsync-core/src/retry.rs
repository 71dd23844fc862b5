//! Classification-driven retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{CalSyncError, CalSyncResult, RemoteError};

/// Reason codes the calendar store uses for quota failures reported as 403.
const RATE_LIMIT_REASONS: &[&str] = &["ratelimitexceeded", "userratelimitexceeded"];

/// Default upper bound on the random jitter added to computed delays.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter in `0..=max_jitter` is added to computed delays.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::writes()
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    GiveUp,
    RetryAfter(Duration),
}

impl RetryPolicy {
    /// Policy for remote writes (create/update).
    pub fn writes() -> Self {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(10),
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Policy for remote reads (lookups and prefetch).
    pub fn reads() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Computed backoff for a zero-based attempt, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide whether the failure of `attempt` (zero-based) is retried, and
    /// after how long. An explicit wait hint from the store wins over the
    /// computed backoff.
    pub fn decide(&self, error: &CalSyncError, attempt: u32, jitter: Duration) -> RetryDecision {
        let CalSyncError::Remote(remote) = error else {
            return RetryDecision::GiveUp;
        };

        if !is_retriable(remote) || attempt + 1 >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        match remote.retry_after.filter(|wait| !wait.is_zero()) {
            Some(wait) => RetryDecision::RetryAfter(wait),
            None => RetryDecision::RetryAfter(self.backoff(attempt) + jitter),
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. The last error is returned on exhaustion.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> CalSyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CalSyncResult<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => match self.decide(&e, attempt, self.random_jitter()) {
                    RetryDecision::GiveUp => {
                        if attempt > 0 {
                            debug!(label, attempts = attempt + 1, "Giving up: {}", e);
                        }
                        return Err(e);
                    }
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            "{} failed (attempt {}/{}): {}, retrying in {:?}",
                            label,
                            attempt + 1,
                            self.max_attempts,
                            e,
                            delay
                        );
                        attempt += 1;
                        sleep(delay).await;
                    }
                },
            }
        }
    }

    fn random_jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Whether a remote failure is worth retrying: rate limits and transient
/// server errors are, everything else is not.
pub fn is_retriable(error: &RemoteError) -> bool {
    match error.status {
        Some(429 | 500 | 503) => true,
        Some(403) => error.reason.as_deref().is_some_and(|reason| {
            RATE_LIMIT_REASONS.contains(&reason.to_ascii_lowercase().as_str())
        }),
        _ => false,
    }
}
