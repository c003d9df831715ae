//! Retry-with-backoff and three-state circuit breaker (spec §4.3).
//!
//! Grounded on `CircuitBreaker`/`RetryManager` in the original Python
//! implementation, re-architected per spec §9's "exceptions as control
//! flow inside retry" design note: retries are modeled as a loop over a
//! fallible async closure returning a `Result`, not exception handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::core::errors::{ErrorKind, Result};

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Per-provider three-state circuit breaker (spec §4.3).
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

/// Returned when the breaker is open and a call is rejected without
/// reaching the transport at all.
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct BreakerOpenError;

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a call may currently proceed. A `half_open` probe is
    /// permitted exactly once per recovery window; callers that observe
    /// `true` here and then call `record_*` keep the state machine honest.
    fn can_proceed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if matches!(inner.state, BreakerState::HalfOpen) || inner.failure_count >= self.failure_threshold
        {
            inner.state = BreakerState::Open;
        }
    }

    /// Run `f`, short-circuiting without invoking it if the breaker is
    /// open. `f` itself is expected to already encapsulate retries.
    pub async fn call<F, Fut, T>(&self, f: F) -> std::result::Result<T, BreakerCallError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.can_proceed() {
            return Err(BreakerCallError::Open(BreakerOpenError));
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerCallError::Inner(err))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerCallError {
    #[error(transparent)]
    Open(#[from] BreakerOpenError),
    #[error(transparent)]
    Inner(#[from] crate::core::errors::CleanupError),
}

impl BreakerCallError {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerCallError::Open(_))
    }
}

/// Exponential backoff with jitter (spec §4.3): `delay = min(base *
/// 2^attempt, max_delay)`, perturbed by up to ±10%.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter_fraction = rand::thread_rng().gen_range(-0.1..=0.1);
        let jittered = (capped * (1.0 + jitter_fraction)).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    /// Execute `operation` up to `max_retries` additional times after an
    /// initial attempt, sleeping with backoff between attempts. Returns
    /// the last error (with its classification) if every attempt fails.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries {
                        warn!(
                            attempts = attempt + 1,
                            error = %err,
                            "exhausted retries"
                        );
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(attempt, ?delay, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Convenience wrapper pairing a breaker with a retry policy, matching
/// how the orchestrator composes them per sub-batch in spec §4.1 step 4:
/// `circuit_breaker.call(retry_manager.execute_with_retry(...))`.
pub struct Resilience {
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
}

impl Resilience {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    pub async fn run<F, Fut, T>(&self, operation: F) -> std::result::Result<T, BreakerCallError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let retry = self.retry;
        self.breaker
            .call(|| async move { retry.execute_with_retry(&operation).await })
            .await
    }
}

/// Classify and record a transport failure against `ErrorKind`'s table,
/// reused by the orchestrator when surfacing the most severe sub-batch
/// failure (spec §4.1's error classification).
pub fn classify_failure(message: &str) -> ErrorKind {
    ErrorKind::classify(message)
}
