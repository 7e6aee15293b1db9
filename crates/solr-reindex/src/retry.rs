//! Retry logic with exponential backoff for Solr calls.
//!
//! Every network operation in the pipeline (cluster status, schema lookups,
//! cursor pages, export opens, update batches) runs through [`retry_with`].
//! Delays double per attempt up to a cap and carry symmetric random jitter
//! so shard readers and batch writers do not retry in lockstep.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Retry behaviour shared by every stage of a reindex run.
///
/// Construct through [`RetryPolicy::new`] or [`RetryPolicy::default`]; both
/// guarantee `initial_backoff > 0`, `max_backoff >= initial_backoff` and a
/// jitter factor in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicySettings", into = "RetryPolicySettings")]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the backoff bounds or jitter factor
    /// are out of range.
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        jitter_factor: f64,
    ) -> Result<Self> {
        if initial_backoff < Duration::from_millis(1) {
            return Err(Error::Validation(
                "retry initial_backoff must be at least 1ms".to_string(),
            ));
        }
        if max_backoff < initial_backoff {
            return Err(Error::Validation(format!(
                "retry max_backoff ({max_backoff:?}) must be >= initial_backoff ({initial_backoff:?})"
            )));
        }
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err(Error::Validation(format!(
                "retry jitter_factor must be between 0.0 and 1.0, got {jitter_factor}"
            )));
        }
        Ok(Self {
            max_retries,
            initial_backoff,
            max_backoff,
            jitter_factor,
        })
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Upper bound on the un-jittered delay.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Relative jitter applied around each delay.
    #[must_use]
    pub const fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    /// Calculates the delay before retry number `attempt` (1-based).
    ///
    /// Attempts below 1 are treated as 1. The un-jittered delay is
    /// `initial_backoff * 2^(attempt-1)` capped at `max_backoff`; the result
    /// is drawn uniformly from `candidate * (1 ± jitter_factor)` in whole
    /// milliseconds and is never below 1ms once jitter is enabled.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let exponent = 1u64 << (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        let candidate = millis(self.initial_backoff)
            .saturating_mul(exponent)
            .min(millis(self.max_backoff));

        if self.jitter_factor == 0.0 {
            return Duration::from_millis(candidate);
        }

        let spread = candidate as f64;
        let min = ((spread * (1.0 - self.jitter_factor)) as u64).max(1);
        let max = ((spread * (1.0 + self.jitter_factor)) as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serialized shape of a [`RetryPolicy`]; durations are whole milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryPolicySettings {
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
    #[serde(default = "default_jitter_factor")]
    jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

impl TryFrom<RetryPolicySettings> for RetryPolicy {
    type Error = Error;

    fn try_from(settings: RetryPolicySettings) -> Result<Self> {
        Self::new(
            settings.max_retries,
            Duration::from_millis(settings.initial_backoff_ms),
            Duration::from_millis(settings.max_backoff_ms),
            settings.jitter_factor,
        )
    }
}

impl From<RetryPolicy> for RetryPolicySettings {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            initial_backoff_ms: millis(policy.initial_backoff),
            max_backoff_ms: millis(policy.max_backoff),
            jitter_factor: policy.jitter_factor,
        }
    }
}

/// Returns `true` for HTTP statuses worth retrying (429 and 5xx).
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Determines if an error is retryable.
///
/// Stage tags are looked through, so a timeout wrapped by any number of
/// stage failures still counts as transient. Transport failures (timeouts,
/// refused or reset connections, TLS and DNS failures), IO errors, HTTP 429
/// and HTTP 5xx are retryable; everything else is permanent.
#[must_use]
pub fn is_retryable_error(error: &Error) -> bool {
    match error.root_cause() {
        Error::Io(_) => true,
        Error::Json(e) => e.is_io(),
        Error::Http(e) => is_retryable_transport(e),
        Error::Remote { status, .. } => is_retryable_status(*status),
        Error::UpdateRejected { status } => {
            u16::try_from(*status).is_ok_and(is_retryable_status)
        }
        _ => false,
    }
}

fn is_retryable_transport(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    if let Some(status) = error.status() {
        return is_retryable_status(status.as_u16());
    }
    if error.is_builder() || error.is_redirect() || error.is_decode() {
        return false;
    }

    let mut cause = std::error::Error::source(error);
    while let Some(inner) = cause {
        if inner.is::<std::io::Error>() {
            return true;
        }
        cause = inner.source();
    }
    error.is_request() || error.is_body()
}

/// Executes an async operation, retrying failures the `retryable` predicate
/// accepts.
///
/// The operation runs at most `max_retries + 1` times. Before each retry
/// `on_retry` fires once, then the task sleeps for
/// [`RetryPolicy::backoff_for_attempt`]. The last failure is returned
/// unchanged once retries are exhausted or a failure is not retryable.
pub async fn retry_with<T, E, F, Fut, P, O>(
    policy: &RetryPolicy,
    operation_name: &str,
    retryable: P,
    mut on_retry: O,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    O: FnMut(),
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{}: Succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if attempt < policy.max_retries() && retryable(&e) => {
                attempt += 1;
                let delay = policy.backoff_for_attempt(attempt);
                warn!(
                    "{}: Retryable error (retry {}/{} in {:?}): {}",
                    operation_name,
                    attempt,
                    policy.max_retries(),
                    delay,
                    e
                );
                on_retry();
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Executes an async operation with the default classifier and no retry
/// observer.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with(policy, operation_name, is_retryable_error, || {}, operation).await
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
