//! Rate limit counter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::identity::{IdentityHash, IdentityHasher};
use super::store::{CounterKey, CounterStore, StoreError};
use super::window::{TimeWindow, WindowKey};
use crate::error::{FormguardError, Result};

/// Default retention period for counter rows.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 86_400);

/// A durable counter enforcing "at most `limit` accepted actions per identity per window".
///
/// The counter holds no state of its own beyond configuration. Every decision
/// is made by a conditional write against the shared [`CounterStore`], so any
/// number of processes can use the same store concurrently.
pub struct RateLimitCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    hasher: IdentityHasher,
    retention: Duration,
}

impl RateLimitCounter {
    /// Create a counter over `store` using the system clock and default retention.
    pub fn new(store: Arc<dyn CounterStore>, hasher: IdentityHasher) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            hasher,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the retention period.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Hash an identity the way this counter stores it.
    pub fn identity_hash(&self, identity: &str) -> IdentityHash {
        self.hasher.hash(identity)
    }

    /// The window key for `window_length` at the current time.
    pub fn current_window(&self, window_length: Duration) -> Result<WindowKey> {
        Ok(TimeWindow::new(window_length)?.key_at(self.clock.now()))
    }

    /// Time left before the current window of `window_length` closes.
    pub fn window_remaining(&self, window_length: Duration) -> Result<Duration> {
        Ok(TimeWindow::new(window_length)?.remaining_at(self.clock.now()))
    }

    /// Decide whether `identity` may perform another action, recording it if so.
    ///
    /// Returns `true` when the action is allowed and already durably counted,
    /// `false` when the identity has used up `limit` in the current window.
    /// A rejected call writes nothing.
    pub async fn check_and_increment(
        &self,
        identity: &str,
        window_length: Duration,
        limit: u32,
    ) -> Result<bool> {
        let window = TimeWindow::new(window_length)?;
        if limit == 0 {
            return Err(FormguardError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }

        let now = self.clock.now();
        let key = CounterKey::new(self.hasher.hash(identity), window.key_at(now));
        let updated_at = now.timestamp();

        trace!(
            identity_hash = %key.identity_hash,
            window_key = %key.window_key,
            limit = limit,
            "Checking rate limit"
        );

        let allowed = if self.store.increment_below(&key, limit, updated_at).await? {
            true
        } else {
            match self.store.create(&key, updated_at).await {
                Ok(()) => {
                    debug!(
                        identity_hash = %key.identity_hash,
                        window_key = %key.window_key,
                        "Created rate limit counter"
                    );
                    true
                }
                Err(StoreError::CreateConflict) => {
                    // The row exists: either a concurrent creator won or it is already at the limit.
                    self.store.increment_below(&key, limit, updated_at).await?
                }
                Err(e) => return Err(e.into()),
            }
        };

        if allowed {
            self.sweep(&window, key.window_key).await;
        } else {
            debug!(
                identity_hash = %key.identity_hash,
                window_key = %key.window_key,
                limit = limit,
                "Rate limit exceeded"
            );
        }

        Ok(allowed)
    }

    /// Stored count for `identity` in the current window, zero if none.
    pub async fn current_count(&self, identity: &str, window_length: Duration) -> Result<u32> {
        let key = CounterKey::new(self.hasher.hash(identity), self.current_window(window_length)?);
        Ok(self.store.count(&key).await?.unwrap_or(0))
    }

    /// Round-trip to the underlying store.
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.store.health_check().await?)
    }

    /// Remove rows that fell out of the retention horizon. Failures are only logged.
    async fn sweep(&self, window: &TimeWindow, current: WindowKey) {
        let floor = window.retention_floor(current, self.retention);
        match self.store.purge_before(floor).await {
            Ok(0) => {}
            Ok(removed) => {
                debug!(removed = removed, floor = %floor, "Purged expired rate limit counters")
            }
            Err(e) => warn!(error = %e, floor = %floor, "Rate limit retention sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::sqlite::{connect, SqliteCounterStore};

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    async fn counter_at(unix: i64) -> (RateLimitCounter, Arc<ManualClock>, Arc<SqliteCounterStore>) {
        let config = StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        };
        let pool = connect(&config).await.unwrap();
        let store = Arc::new(SqliteCounterStore::new(pool, "limits").await.unwrap());
        let clock = Arc::new(ManualClock::at_unix(unix));
        let counter = RateLimitCounter::new(store.clone(), IdentityHasher::default())
            .with_clock(clock.clone());
        (counter, clock, store)
    }

    #[tokio::test]
    async fn test_three_then_reject() {
        let (counter, _, _) = counter_at(1_700_000_000).await;

        for expected in 1..=3 {
            assert!(counter.check_and_increment("1.2.3.4", TEN_MINUTES, 3).await.unwrap());
            assert_eq!(counter.current_count("1.2.3.4", TEN_MINUTES).await.unwrap(), expected);
        }

        assert!(!counter.check_and_increment("1.2.3.4", TEN_MINUTES, 3).await.unwrap());
        assert_eq!(counter.current_count("1.2.3.4", TEN_MINUTES).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rejections_do_not_count() {
        let (counter, _, _) = counter_at(1_700_000_000).await;

        assert!(counter.check_and_increment("9.9.9.9", TEN_MINUTES, 1).await.unwrap());
        for _ in 0..5 {
            assert!(!counter.check_and_increment("9.9.9.9", TEN_MINUTES, 1).await.unwrap());
        }
        assert_eq!(counter.current_count("9.9.9.9", TEN_MINUTES).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_window_resets() {
        let (counter, clock, _) = counter_at(1_700_000_000).await;

        for _ in 0..3 {
            assert!(counter.check_and_increment("5.6.7.8", TEN_MINUTES, 3).await.unwrap());
        }
        assert!(!counter.check_and_increment("5.6.7.8", TEN_MINUTES, 3).await.unwrap());

        clock.advance(TEN_MINUTES);
        assert!(counter.check_and_increment("5.6.7.8", TEN_MINUTES, 3).await.unwrap());
        assert_eq!(counter.current_count("5.6.7.8", TEN_MINUTES).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let (counter, _, _) = counter_at(1_700_000_000).await;

        for _ in 0..2 {
            assert!(counter.check_and_increment("10.0.0.1", TEN_MINUTES, 2).await.unwrap());
        }
        assert!(!counter.check_and_increment("10.0.0.1", TEN_MINUTES, 2).await.unwrap());
        assert!(counter.check_and_increment("10.0.0.2", TEN_MINUTES, 2).await.unwrap());
        assert_eq!(counter.current_count("10.0.0.2", TEN_MINUTES).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (counter, _, _) = counter_at(1_700_000_000).await;

        assert!(matches!(
            counter.check_and_increment("1.2.3.4", Duration::ZERO, 3).await,
            Err(FormguardError::InvalidArgument(_))
        ));
        assert!(matches!(
            counter.check_and_increment("1.2.3.4", TEN_MINUTES, 0).await,
            Err(FormguardError::InvalidArgument(_))
        ));
        assert_eq!(counter.current_count("1.2.3.4", TEN_MINUTES).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_counted() {
        let (counter, _, _) = counter_at(1_700_000_000).await;

        assert!(counter.check_and_increment("", TEN_MINUTES, 1).await.unwrap());
        assert!(!counter.check_and_increment("unknown", TEN_MINUTES, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_accepted_write_sweeps_expired_rows() {
        let (counter, clock, store) = counter_at(1_700_000_000).await;
        let counter = counter.with_retention(Duration::from_secs(3_600));
        let window = TimeWindow::new(TEN_MINUTES).unwrap();

        assert!(counter.check_and_increment("old", TEN_MINUTES, 3).await.unwrap());
        let old_key = CounterKey::new(counter.identity_hash("old"), window.key_at(clock.now()));

        // Still inside the six-window horizon
        clock.advance(Duration::from_secs(3_600));
        assert!(counter.check_and_increment("recent", TEN_MINUTES, 3).await.unwrap());
        assert_eq!(store.count(&old_key).await.unwrap(), Some(1));

        clock.advance(TEN_MINUTES);
        assert!(counter.check_and_increment("recent", TEN_MINUTES, 3).await.unwrap());
        assert_eq!(store.count(&old_key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let (counter, _, store) = counter_at(1_700_000_000).await;
        store.pool().close().await;

        let err = counter
            .check_and_increment("1.2.3.4", TEN_MINUTES, 3)
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
