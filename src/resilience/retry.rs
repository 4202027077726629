//! Retry manager (C7): wraps provider calls with exponential backoff,
//! retrying only transient errors (§4.5). Backoff-with-jitter mirrors the
//! teacher's `throttled_get`, generalized from a fixed power-of-two wait to
//! a configurable base/cap/jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::correlation::Operation;
use crate::error::VortexError;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    fn backoff_for(self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        let wait = if self.jitter {
            rand::rng().random_range((capped / 2.0)..=capped)
        } else {
            capped
        };
        Duration::from_secs_f64(wait)
    }
}

/// Runs `f` up to `config.max_attempts` times, retrying only when the
/// previous error's kind is transient (`ErrorKind::is_retryable`).
/// `CircuitOpen` and everything non-transient surfaces on the first
/// attempt — the breaker owns its own recovery, and retrying a permanent
/// error just wastes attempts (§4.5).
pub async fn retry_call<T, F, Fut>(
    op: &Operation,
    config: RetryConfig,
    mut f: F,
) -> crate::error::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let mut attempt = 0;
    loop {
        let started = std::time::Instant::now();
        match f().await {
            Ok(value) => {
                tracing::debug!(
                    correlation_id = %op.id(),
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "attempt succeeded"
                );
                return Ok(value);
            }
            Err(err) if err.kind().is_retryable() && attempt + 1 < config.max_attempts => {
                let wait = config.backoff_for(attempt);
                tracing::warn!(
                    correlation_id = %op.id(),
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(
                    correlation_id = %op.id(),
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "attempt failed, not retrying"
                );
                return Err(err);
            }
        }
    }
}
