//! Per-call-site rate limiter.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::counter::RateLimitCounter;
use super::identity::IdentityHash;
use super::window::WindowKey;
use crate::config::{FailurePolicy, LimitConfig};
use crate::error::{FormguardError, Result};

/// Outcome of [`RateLimiter::permit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action may proceed.
    Allowed,
    /// The action must be refused.
    Rejected,
}

impl Decision {
    /// Whether the action may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// A [`RateLimitCounter`] bound to one call site's window, limit and failure policy.
///
/// The optional local cache only remembers identities already at their limit
/// in the current window. A count never drops within a window, so a cached
/// rejection is always correct; acceptance always goes through the store.
pub struct RateLimiter {
    name: String,
    counter: Arc<RateLimitCounter>,
    window: Duration,
    limit: u32,
    policy: FailurePolicy,
    at_limit: Option<DashMap<(IdentityHash, WindowKey), ()>>,
}

impl RateLimiter {
    /// Create a limiter for a call site.
    pub fn new(
        name: impl Into<String>,
        counter: Arc<RateLimitCounter>,
        window: Duration,
        limit: u32,
    ) -> Result<Self> {
        if window.as_secs() == 0 {
            return Err(FormguardError::InvalidArgument(
                "window length must be at least one second".to_string(),
            ));
        }
        if limit == 0 {
            return Err(FormguardError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            counter,
            window,
            limit,
            policy: FailurePolicy::default(),
            at_limit: None,
        })
    }

    /// Create a limiter from its configuration block.
    pub fn from_config(
        name: impl Into<String>,
        counter: Arc<RateLimitCounter>,
        config: &LimitConfig,
    ) -> Result<Self> {
        Self::new(name, counter, config.window(), config.limit)
    }

    /// Set the store failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable the local at-limit cache.
    pub fn with_local_cache(mut self, enabled: bool) -> Self {
        self.at_limit = enabled.then(DashMap::new);
        self
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum accepted actions per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time until the current window closes, for `Retry-After`.
    pub fn retry_after(&self) -> Duration {
        self.counter
            .window_remaining(self.window)
            .unwrap_or(self.window)
    }

    /// The underlying counter.
    pub fn counter(&self) -> &Arc<RateLimitCounter> {
        &self.counter
    }

    /// Check and record an action for `identity`, surfacing store errors.
    pub async fn check(&self, identity: &str) -> Result<bool> {
        let cache_key = match &self.at_limit {
            Some(cache) => {
                let key = (
                    self.counter.identity_hash(identity),
                    self.counter.current_window(self.window)?,
                );
                if cache.contains_key(&key) {
                    debug!(limiter = %self.name, identity_hash = %key.0, "Rejected from local cache");
                    return Ok(false);
                }
                Some(key)
            }
            None => None,
        };

        let allowed = self
            .counter
            .check_and_increment(identity, self.window, self.limit)
            .await?;

        if let (false, Some(cache), Some(key)) = (allowed, &self.at_limit, cache_key) {
            let current = key.1;
            cache.retain(|(_, window), _| *window >= current);
            cache.insert(key, ());
        }

        Ok(allowed)
    }

    /// Check and record an action, applying the failure policy to store errors.
    pub async fn permit(&self, identity: &str) -> Decision {
        match self.check(identity).await {
            Ok(true) => Decision::Allowed,
            Ok(false) => Decision::Rejected,
            Err(e) => match self.policy {
                FailurePolicy::FailClosed => {
                    error!(limiter = %self.name, error = %e, "Rate limit check failed, rejecting");
                    Decision::Rejected
                }
                FailurePolicy::FailOpen => {
                    warn!(limiter = %self.name, error = %e, "Rate limit check failed, allowing");
                    Decision::Allowed
                }
            },
        }
    }

    /// Number of identities cached as at their limit.
    pub fn cached_rejections(&self) -> usize {
        self.at_limit.as_ref().map_or(0, DashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::identity::IdentityHasher;
    use crate::ratelimit::sqlite::{connect, SqliteCounterStore};

    async fn setup() -> (Arc<RateLimitCounter>, Arc<ManualClock>, Arc<SqliteCounterStore>) {
        let config = StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        };
        let pool = connect(&config).await.unwrap();
        let store = Arc::new(SqliteCounterStore::new(pool, "limits").await.unwrap());
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let counter = Arc::new(
            RateLimitCounter::new(store.clone(), IdentityHasher::default())
                .with_clock(clock.clone()),
        );
        (counter, clock, store)
    }

    #[tokio::test]
    async fn test_limiter_creation_validates() {
        let (counter, _, _) = setup().await;
        assert!(RateLimiter::new("t", counter.clone(), Duration::ZERO, 3).is_err());
        assert!(RateLimiter::new("t", counter.clone(), Duration::from_secs(60), 0).is_err());
        assert!(RateLimiter::from_config("contact", counter, &LimitConfig::contact()).is_ok());
    }

    #[tokio::test]
    async fn test_permit_enforces_limit() {
        let (counter, _, _) = setup().await;
        let limiter = RateLimiter::from_config("contact", counter, &LimitConfig::contact()).unwrap();

        for _ in 0..3 {
            assert_eq!(limiter.permit("1.2.3.4").await, Decision::Allowed);
        }
        assert_eq!(limiter.permit("1.2.3.4").await, Decision::Rejected);
        // 1_700_000_000 is 400s into its ten-minute window
        assert_eq!(limiter.retry_after(), Duration::from_secs(200));
    }

    #[tokio::test]
    async fn test_local_cache_only_holds_rejections() {
        let (counter, clock, _) = setup().await;
        let limiter = RateLimiter::new("t", counter.clone(), Duration::from_secs(60), 2)
            .unwrap()
            .with_local_cache(true);

        assert!(limiter.check("1.2.3.4").await.unwrap());
        assert!(limiter.check("1.2.3.4").await.unwrap());
        assert_eq!(limiter.cached_rejections(), 0);

        assert!(!limiter.check("1.2.3.4").await.unwrap());
        assert_eq!(limiter.cached_rejections(), 1);
        assert!(!limiter.check("1.2.3.4").await.unwrap());
        assert_eq!(counter.current_count("1.2.3.4", Duration::from_secs(60)).await.unwrap(), 2);

        // Next window: the cached entry no longer matches and is pruned on the next rejection
        clock.advance(Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4").await.unwrap());
        assert!(limiter.check("1.2.3.4").await.unwrap());
        assert!(!limiter.check("1.2.3.4").await.unwrap());
        assert_eq!(limiter.cached_rejections(), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_by_default() {
        let (counter, _, store) = setup().await;
        let limiter = RateLimiter::new("t", counter, Duration::from_secs(60), 3).unwrap();
        store.pool().close().await;

        assert!(limiter.check("1.2.3.4").await.unwrap_err().is_store_unavailable());
        assert_eq!(limiter.permit("1.2.3.4").await, Decision::Rejected);
    }

    #[tokio::test]
    async fn test_fail_open_allows() {
        let (counter, _, store) = setup().await;
        let limiter = RateLimiter::new("t", counter, Duration::from_secs(60), 3)
            .unwrap()
            .with_policy(FailurePolicy::FailOpen);
        store.pool().close().await;

        assert!(limiter.permit("1.2.3.4").await.is_allowed());
    }
}
