//! Per-provider rate limiting and concurrency capping (spec §4.C2).
//!
//! A token bucket per provider, constructed per `ProviderPolicy` rather than
//! kept behind a process-wide singleton (§9 redesign flag, same rationale as
//! the cache and config snapshot).

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::ProviderPolicy;

type TokenBucket = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket rate limit plus a bounded concurrency cap for one provider.
/// A permit must be held for the duration of the in-flight request; the
/// token bucket governs request *admission rate*, the semaphore governs
/// request *concurrency*, and both apply independently per spec §4.C2.
pub struct RateLimiter {
    bucket: TokenBucket,
    concurrency: Semaphore,
}

impl RateLimiter {
    pub fn new(policy: &ProviderPolicy) -> Self {
        let rate = NonZeroU32::new(policy.rate_per_second.max(1)).unwrap();
        let burst = NonZeroU32::new(policy.burst.max(1)).unwrap();
        let quota = Quota::per_second(rate).allow_burst(burst);
        RateLimiter {
            bucket: GovernorLimiter::direct(quota),
            concurrency: Semaphore::new(policy.max_concurrency.max(1) as usize),
        }
    }

    /// Waits for both a rate-limit token and a concurrency slot, then
    /// returns a guard that releases the slot on drop. Does not itself
    /// enforce a deadline; callers wrap this with `retry::with_retry`'s
    /// timeout/deadline handling.
    pub async fn acquire(&self) -> RateLimitPermit<'_> {
        self.bucket.until_ready().await;
        let permit = self
            .concurrency
            .acquire()
            .await
            .expect("semaphore is never closed");
        RateLimitPermit { _permit: permit }
    }
}

pub struct RateLimitPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

/// One `RateLimiter` per named provider, shared behind `Arc` so stages can
/// hold a limiter across `.await` points without lifetime entanglement with
/// the orchestrator.
#[derive(Clone, Default)]
pub struct RateLimiterRegistry {
    limiters: Arc<std::sync::Mutex<std::collections::HashMap<String, Arc<RateLimiter>>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_provider(&self, name: &str, policy: &ProviderPolicy) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap();
        limiters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(policy)))
            .clone()
    }
}
