//! Bounded retry with exponential backoff, and refresh-on-expiry execution.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors that know whether a retry can help under a given policy.
pub trait Retryable {
    fn is_retryable(&self, policy: &RetryPolicy) -> bool;
}

/// Backoff parameters applied uniformly to network calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
    /// HTTP statuses treated as transient.
    pub retry_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            retry_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns `true` if `status` is in the transient set.
    pub fn is_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }

    /// Delay before retry number `retry` (1-based), with ±25% jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_factor.powi(exp);
        let capped = base.min(self.max_delay_ms as f64);
        let jitter = capped * 0.25 * rand::thread_rng().gen_range(-1.0..1.0);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is spent. `op` receives the 1-based attempt number.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt <= policy.max_retries && e.is_retryable(policy) => {
                let delay = policy.delay_for_retry(attempt);
                warn!(
                    op = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs `action` against a pre-signed target, replacing the target through
/// `refresh` whenever the failure satisfies `is_expired`, at most
/// `max_refreshes` times.
///
/// `refresh` receives the target that was rejected so implementations can
/// detect that someone else already replaced it.
pub async fn execute_with_url_refresh<U, T, E, A, AF, R, RF, P>(
    initial: U,
    max_refreshes: u32,
    mut action: A,
    mut refresh: R,
    is_expired: P,
) -> Result<T, E>
where
    U: Clone,
    A: FnMut(U) -> AF,
    AF: Future<Output = Result<T, E>>,
    R: FnMut(U) -> RF,
    RF: Future<Output = Result<U, E>>,
    P: Fn(&E) -> bool,
{
    let mut target = initial;
    let mut refreshes = 0;
    loop {
        match action(target.clone()).await {
            Err(e) if refreshes < max_refreshes && is_expired(&e) => {
                refreshes += 1;
                debug!(refreshes, "pre-signed target rejected as expired, refreshing");
                target = refresh(target).await?;
            }
            result => return result,
        }
    }
}
