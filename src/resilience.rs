//! Ties the retry/rate-limit layer (`retry.rs`, `rate_limit.rs`) and the
//! cache (`cache/mod.rs`) into a single per-provider call path (spec
//! §4.C2/§4.C3), plus the shared graceful-degradation-vs-strict-mode
//! decision every best-effort stage needs (`Config::require_all_providers`,
//! SPEC_FULL.md §5).

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::{fingerprint, Cache};
use crate::config::Config;
use crate::error::{PipelineError, StageName};
use crate::rate_limit::RateLimiterRegistry;
use crate::retry::{with_retry, RetryPolicy};

/// Cache lookup, rate limit, and retry/backoff bundled around one named
/// provider. Stages hold one of these per provider instead of a bare
/// `Arc<dyn Trait>` so every call is cached, rate-limited, retried, and
/// bounded by the run's deadline the same way.
#[derive(Clone)]
pub struct ProviderCaller {
    cache: Arc<Cache>,
    limiter: Arc<crate::rate_limit::RateLimiter>,
    retry_policy: RetryPolicy,
    ttl: Duration,
    namespace: &'static str,
}

impl ProviderCaller {
    pub fn new(cache: Arc<Cache>, limiters: &RateLimiterRegistry, config: &Config, namespace: &'static str) -> Self {
        let policy = config.policy_for(namespace);
        ProviderCaller {
            cache,
            limiter: limiters.for_provider(namespace, &policy),
            retry_policy: RetryPolicy::from(&policy),
            ttl: config.cache.ttl_for(namespace),
            namespace,
        }
    }

    /// Runs `call` through cache → rate limit → retry/backoff, keyed by
    /// `cache_key` within this provider's namespace, bounded by `deadline`.
    pub async fn call<T, F, Fut>(
        &self,
        deadline: Instant,
        cache_key: &serde_json::Value,
        call: F,
    ) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let key = fingerprint(self.namespace, cache_key);
        self.cache
            .get_or_insert_with(&key, self.ttl, || async {
                with_retry(&self.retry_policy, deadline, || async {
                    let _permit = self.limiter.acquire().await;
                    call().await
                })
                .await
            })
            .await
    }
}

/// Degrades a contained provider error to a warning (spec §7 default), or
/// propagates it as fatal when `require_all_providers` is set
/// (`Config::require_all_providers`, SPEC_FULL.md §5). Stages hold the flag
/// value rather than a `&Config` so they stay agnostic of the rest of the
/// config surface.
pub fn degrade_or_require<T: Default>(
    require_all_providers: bool,
    warnings: &mut Vec<String>,
    context: &str,
    result: Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if require_all_providers => Err(err),
        Err(err) => {
            warnings.push(format!("{context}: {err}"));
            Ok(T::default())
        }
    }
}

/// Checks a run's deadline between fan-out iterations, producing `Cancelled`
/// on expiry rather than letting the stage silently keep going past it
/// (spec §5).
pub fn check_deadline(analysis_id: uuid::Uuid, stage: StageName, deadline: Instant) -> Result<(), PipelineError> {
    if Instant::now() >= deadline {
        Err(PipelineError::Cancelled { analysis_id, stage })
    } else {
        Ok(())
    }
}
