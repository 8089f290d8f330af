//! Newsletter subscriber persistence.

use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::ratelimit::{IdentityHash, StoreError};

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS newsletter_subscribers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    ip_hash TEXT NOT NULL DEFAULT '',
    token TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    subscribed_at INTEGER NOT NULL
);";

/// What a subscribe call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscriber row was written.
    Created,
    /// A previously unsubscribed address was switched back on.
    Reactivated,
    /// The address was already subscribed; nothing changed.
    AlreadyActive,
}

/// A stored subscriber.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscriber {
    pub email: String,
    pub ip_hash: String,
    pub token: String,
    pub is_active: bool,
    pub subscribed_at: i64,
}

/// Subscriber table access.
#[derive(Clone)]
pub struct SubscriberStore {
    pool: SqlitePool,
}

impl SubscriberStore {
    /// Create the store, creating its table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(Self { pool })
    }

    /// Subscribe `email`, reactivating it if it was unsubscribed.
    ///
    /// `email` must already be normalised (trimmed, lowercase).
    pub async fn subscribe(
        &self,
        email: &str,
        ip_hash: &IdentityHash,
        now: i64,
    ) -> Result<SubscribeOutcome> {
        let reactivated = sqlx::query(
            "UPDATE newsletter_subscribers SET is_active = 1, ip_hash = ? WHERE email = ? AND is_active = 0",
        )
        .bind(ip_hash.as_str())
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Unavailable)?;
        if reactivated.rows_affected() > 0 {
            info!(ip_hash = %ip_hash, "Newsletter subscriber reactivated");
            return Ok(SubscribeOutcome::Reactivated);
        }

        let token = Uuid::new_v4().to_string();
        let created = sqlx::query(
            "INSERT INTO newsletter_subscribers (email, ip_hash, token, is_active, subscribed_at) \
             VALUES (?, ?, ?, 1, ?) ON CONFLICT(email) DO NOTHING",
        )
        .bind(email)
        .bind(ip_hash.as_str())
        .bind(&token)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Unavailable)?;

        if created.rows_affected() > 0 {
            info!(ip_hash = %ip_hash, "Newsletter subscriber created");
            Ok(SubscribeOutcome::Created)
        } else {
            debug!(ip_hash = %ip_hash, "Newsletter address already subscribed");
            Ok(SubscribeOutcome::AlreadyActive)
        }
    }

    /// Deactivate the subscriber owning `token`. Returns `false` for unknown tokens.
    pub async fn unsubscribe(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE newsletter_subscribers SET is_active = 0 WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    /// Look up a subscriber by email.
    pub async fn find(&self, email: &str) -> Result<Option<Subscriber>> {
        let subscriber = sqlx::query_as::<_, Subscriber>(
            "SELECT email, ip_hash, token, is_active, subscribed_at FROM newsletter_subscribers WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Unavailable)?;
        Ok(subscriber)
    }
}

/// Trim and lowercase an email address.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ratelimit::{connect, IdentityHasher};

    async fn store() -> SubscriberStore {
        let config = StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        };
        SubscriberStore::new(connect(&config).await.unwrap()).await.unwrap()
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("jane@example.com"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("jane"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("jane@localhost"));
        assert!(!is_valid_email("jane@@example.com"));
        assert!(!is_valid_email("jane doe@example.com"));
        assert!(!is_valid_email("jane@example."));
    }

    #[tokio::test]
    async fn test_subscribe_lifecycle() {
        let store = store().await;
        let ip_hash = IdentityHasher::default().hash("1.2.3.4");

        assert_eq!(
            store.subscribe("jane@example.com", &ip_hash, 100).await.unwrap(),
            SubscribeOutcome::Created
        );
        assert_eq!(
            store.subscribe("jane@example.com", &ip_hash, 101).await.unwrap(),
            SubscribeOutcome::AlreadyActive
        );

        let subscriber = store.find("jane@example.com").await.unwrap().unwrap();
        assert!(subscriber.is_active);
        assert_eq!(subscriber.ip_hash, ip_hash.as_str());
        assert_eq!(subscriber.subscribed_at, 100);

        assert!(store.unsubscribe(&subscriber.token).await.unwrap());
        assert!(!store.find("jane@example.com").await.unwrap().unwrap().is_active);

        let other_hash = IdentityHasher::default().hash("5.6.7.8");
        assert_eq!(
            store.subscribe("jane@example.com", &other_hash, 200).await.unwrap(),
            SubscribeOutcome::Reactivated
        );
        let subscriber = store.find("jane@example.com").await.unwrap().unwrap();
        assert!(subscriber.is_active);
        assert_eq!(subscriber.ip_hash, other_hash.as_str());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_token() {
        let store = store().await;
        assert!(!store.unsubscribe("no-such-token").await.unwrap());
    }
}
