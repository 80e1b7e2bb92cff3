//! Retry/backoff/timeout layer wrapping every provider call (spec §4.C2).
//!
//! A generic wrapper around a fallible async closure, not duplicated per
//! client, classifying failures per spec §4.C2: retry on transient transport
//! failure / timeout / explicit rate-limit signal, never retry on
//! authoritative not-found or malformed-response.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::PipelineError;

/// Tells the retry loop whether a failure is worth retrying.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ProviderUnavailable { .. } | PipelineError::ProviderMalformed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl From<&crate::config::ProviderPolicy> for RetryPolicy {
    fn from(p: &crate::config::ProviderPolicy) -> Self {
        RetryPolicy {
            max_attempts: p.max_attempts,
            initial_delay: p.initial_delay,
            multiplier: p.backoff_multiplier,
            max_delay: p.max_delay,
            request_timeout: p.request_timeout,
        }
    }
}

impl RetryPolicy {
    /// sleep = min(max_delay, initial_delay * multiplier^(attempt-1)) with up
    /// to ±20% jitter (spec §4.C2). `attempt` is 1-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}

/// Runs `call` under retry/backoff/timeout/deadline. `call` is invoked once
/// per attempt; `deadline` bounds the whole sequence of attempts regardless
/// of how many retries remain.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Instant,
    mut call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 1;
    loop {
        if Instant::now() >= deadline {
            return Err(PipelineError::provider_unavailable(
                "retry",
                "overall deadline exceeded before attempt",
            ));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let per_attempt_timeout = policy.request_timeout.min(remaining);

        let outcome = tokio::time::timeout(per_attempt_timeout, call()).await;

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => PipelineError::provider_unavailable("retry", "request timed out"),
        };

        if attempt >= policy.max_attempts || !err.is_retryable() {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        let sleep_until = Instant::now() + delay;
        if sleep_until >= deadline {
            return Err(err);
        }
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(20),
            request_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let deadline = Instant::now() + Duration::from_secs(1);
        let calls_clone = calls.clone();
        let result: Result<u32, PipelineError> = with_retry(&policy(), deadline, move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(PipelineError::provider_unavailable("x", "transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_invalid_input() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<u32, PipelineError> = with_retry(&policy(), deadline, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::InvalidInput("bad".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let p = policy();
        let d1 = p.delay_for_attempt(1).as_secs_f64();
        let d3 = p.delay_for_attempt(5).as_secs_f64();
        assert!(d1 <= p.max_delay.as_secs_f64() * 1.21);
        assert!(d3 <= p.max_delay.as_secs_f64() * 1.21);
    }
}
