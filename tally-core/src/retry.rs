use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior with exponential backoff and jitter.
///
/// Injected into the remote-call wrapper of the repository. Only
/// network-class failures are retried (see `Error::is_retryable`); once the
/// attempts are exhausted the caller falls back to the durable queue.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,

    /// Fraction of the backoff randomized in both directions (0.0 - 1.0)
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy without jitter
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
            jitter: 0.0,
        }
    }

    /// Single attempt; failures surface immediately
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Short backoff, for tests and local remotes
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Returns the policy used for remote calls by default.
    pub fn standard() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Set the jitter fraction
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff before retry number `attempt` (0-based), before jitter
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Backoff for the attempt with jitter applied, never above `max_backoff_ms`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_duration(attempt).as_millis() as f64;
        if self.jitter <= 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let ms = (base * factor).min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Run `operation`, retrying errors for which `Error::is_retryable` holds.
/// Sleeps with jittered exponential backoff between attempts.
pub async fn retry_async<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = match operation().await {
        Ok(result) => return Ok(result),
        Err(e) if !e.is_retryable() => return Err(e),
        Err(e) => e,
    };

    for attempt in 0..policy.max_attempts {
        let backoff = policy.jittered_backoff(attempt);
        tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying remote call");
        tokio::time::sleep(backoff).await;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}
