//! Per-host token bucket shared by every outbound request.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use tracing::debug;

use crate::cancel::{Cancellation, Cancelled};

type KeyedLimiter = governor::RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Sustained rate and burst allowance applied to each remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Rolling window over which `quota_limit` requests are allowed.
    pub quota_window: Duration,
    pub quota_limit: u32,
    /// Bucket capacity: requests that may be granted back to back.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
            burst: 5,
        }
    }
}

impl RateLimitConfig {
    /// Time to replenish one token.
    pub fn replenish_interval(&self) -> Duration {
        let seconds_per_cell =
            (self.quota_window.as_secs_f64() / f64::from(self.quota_limit.max(1))).max(0.001);
        Duration::from_secs_f64(seconds_per_cell)
    }

    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(self.replenish_interval())
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

/// Token-bucket limiter keyed by host.
///
/// Waiting for one host never delays callers of another. Clones share the
/// same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<KeyedLimiter>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(governor::RateLimiter::keyed(config.quota())),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Suspend until a token for `host` is available and consume it.
    ///
    /// Cancellation releases the waiter without consuming a token.
    pub async fn acquire(&self, host: &str, cancel: &Cancellation) -> Result<(), Cancelled> {
        let key = host.to_owned();
        if self.limiter.check_key(&key).is_ok() {
            return Ok(());
        }

        debug!(host, "rate limit reached, waiting for a slot");
        cancel.run(self.limiter.until_key_ready(&key)).await
    }

    /// Consume a token for `host` only if one is available right now.
    pub fn try_acquire(&self, host: &str) -> bool {
        self.limiter.check_key(&host.to_owned()).is_ok()
    }

    /// Drop buckets that have fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
