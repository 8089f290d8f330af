//! SQLite-backed counter store.
//!
//! Every process opens its own pool against the same database file; the
//! `UNIQUE (identity_hash, window_key)` constraint and single-statement
//! conditional updates are the only coordination between them.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

use super::store::{CounterKey, CounterStore, StoreError, StoreResult};
use super::window::WindowKey;
use crate::config::{is_sql_identifier, StoreConfig};
use crate::error::{FormguardError, Result};

/// Open a connection pool for the configured database.
pub async fn connect(config: &StoreConfig) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| FormguardError::Config(format!("invalid database_url: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.busy_timeout());

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(opts)
        .await
        .map_err(StoreError::Unavailable)?;

    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Connected to counter database"
    );
    Ok(pool)
}

/// Counter store over one table of a SQLite database.
#[derive(Clone)]
pub struct SqliteCounterStore {
    pool: SqlitePool,
    increment_sql: String,
    create_sql: String,
    purge_sql: String,
    count_sql: String,
}

impl SqliteCounterStore {
    /// Bind a store to `table`, creating the table and its indexes if needed.
    pub async fn new(pool: SqlitePool, table: &str) -> Result<Self> {
        if !is_sql_identifier(table) {
            return Err(FormguardError::Config(format!(
                "table '{}' is not a plain SQL identifier",
                table
            )));
        }

        let store = Self {
            pool,
            increment_sql: format!(
                "UPDATE {table} SET count = count + 1, updated_at = ? \
                 WHERE identity_hash = ? AND window_key = ? AND count < ?"
            ),
            create_sql: format!(
                "INSERT INTO {table} (identity_hash, window_key, count, updated_at) VALUES (?, ?, 1, ?)"
            ),
            purge_sql: format!("DELETE FROM {table} WHERE window_key < ?"),
            count_sql: format!(
                "SELECT count FROM {table} WHERE identity_hash = ? AND window_key = ?"
            ),
        };
        store.migrate(table).await?;
        Ok(store)
    }

    async fn migrate(&self, table: &str) -> Result<()> {
        let schema = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_hash TEXT NOT NULL,
                window_key INTEGER NOT NULL,
                count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
                updated_at INTEGER NOT NULL,
                UNIQUE (identity_hash, window_key)
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_window_key ON {table} (window_key);"
        );
        sqlx::query(&schema)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        debug!(table = %table, "Counter table ready");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn increment_below(
        &self,
        key: &CounterKey,
        limit: u32,
        updated_at: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(&self.increment_sql)
            .bind(updated_at)
            .bind(key.identity_hash.as_str())
            .bind(key.window_key.value())
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create(&self, key: &CounterKey, updated_at: i64) -> StoreResult<()> {
        match sqlx::query(&self.create_sql)
            .bind(key.identity_hash.as_str())
            .bind(key.window_key.value())
            .bind(updated_at)
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::CreateConflict)
            }
            Err(e) => Err(StoreError::Unavailable(e)),
        }
    }

    async fn purge_before(&self, floor: WindowKey) -> StoreResult<u64> {
        let result = sqlx::query(&self.purge_sql)
            .bind(floor.value())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, key: &CounterKey) -> StoreResult<Option<u32>> {
        let count: Option<i64> = sqlx::query_scalar(&self.count_sql)
            .bind(key.identity_hash.as_str())
            .bind(key.window_key.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(count.map(|c| u32::try_from(c).unwrap_or(u32::MAX)))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(())
    }
}
