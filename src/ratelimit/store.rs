//! Counter store trait for abstracting the shared consistency point.

use async_trait::async_trait;
use thiserror::Error;

use super::identity::IdentityHash;
use super::window::WindowKey;

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another caller created the row for this key first.
    #[error("counter row already exists")]
    CreateConflict,
    /// The store could not be reached or rejected the statement.
    #[error("counter store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key identifying one counter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Digest of the client identity.
    pub identity_hash: IdentityHash,
    /// The time window.
    pub window_key: WindowKey,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(identity_hash: IdentityHash, window_key: WindowKey) -> Self {
        Self {
            identity_hash,
            window_key,
        }
    }
}

/// Durable counter storage shared by every process.
///
/// Each method is a single statement against the store; none of them may be
/// combined with a prior read to make an accept/reject decision.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to the row for `key` if its count is below `limit`.
    ///
    /// Returns `true` when a row was updated.
    async fn increment_below(
        &self,
        key: &CounterKey,
        limit: u32,
        updated_at: i64,
    ) -> StoreResult<bool>;

    /// Create the row for `key` with a count of one.
    ///
    /// Fails with [`StoreError::CreateConflict`] when the row already exists.
    async fn create(&self, key: &CounterKey, updated_at: i64) -> StoreResult<()>;

    /// Delete every row whose window is older than `floor`. Returns the number removed.
    async fn purge_before(&self, floor: WindowKey) -> StoreResult<u64>;

    /// Read the stored count for `key`, if a row exists. Diagnostics only.
    async fn count(&self, key: &CounterKey) -> StoreResult<Option<u32>>;

    /// Round-trip to the store.
    async fn health_check(&self) -> StoreResult<()>;
}
