//! Configuration management for Formguard.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{FormguardError, Result};

/// Prefix for environment variable overrides, e.g. `FORMGUARD__SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "FORMGUARD";

/// Main configuration for the Formguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormguardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Client identity hashing
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Connection settings for the SQLite database holding the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// sqlx connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Maximum pooled connections per process
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://formguard.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl StoreConfig {
    /// Get the busy timeout as a duration.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Client identity hashing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Mixed into every identity digest. Empty means a plain SHA-256 of the identity.
    #[serde(default)]
    pub salt: String,
}

/// What a limiter does when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject the protected action
    #[default]
    FailClosed,
    /// Let the protected action through unrecorded
    FailOpen,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// How long counter rows are kept, in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Behaviour when the store is unavailable
    #[serde(default)]
    pub on_store_error: FailurePolicy,

    /// Remember identities already at their limit to skip the store on repeat rejections
    #[serde(default = "default_local_cache")]
    pub local_cache: bool,

    /// Contact form limit
    #[serde(default = "LimitConfig::contact")]
    pub contact: LimitConfig,

    /// Newsletter signup limit
    #[serde(default = "LimitConfig::newsletter")]
    pub newsletter: LimitConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            on_store_error: FailurePolicy::default(),
            local_cache: default_local_cache(),
            contact: LimitConfig::contact(),
            newsletter: LimitConfig::newsletter(),
        }
    }
}

fn default_retention_days() -> u64 {
    7
}

fn default_local_cache() -> bool {
    true
}

impl RateLimitingConfig {
    /// Get the retention period as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 86_400)
    }
}

/// Limit for a single protected call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Counter table owned by this call site
    pub table: String,
    /// Window length in seconds
    pub window_secs: u64,
    /// Maximum accepted attempts per identity per window
    pub limit: u32,
}

impl LimitConfig {
    /// Three contact submissions per ten minutes.
    pub fn contact() -> Self {
        Self {
            table: "contact_rate_limits".to_string(),
            window_secs: 600,
            limit: 3,
        }
    }

    /// Five signup attempts per hour.
    pub fn newsletter() -> Self {
        Self {
            table: "newsletter_rate_limits".to_string(),
            window_secs: 3600,
            limit: 5,
        }
    }

    /// Get the window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.window_secs == 0 {
            return Err(FormguardError::Config(format!(
                "{}: window_secs must be greater than zero",
                name
            )));
        }
        if self.limit == 0 {
            return Err(FormguardError::Config(format!(
                "{}: limit must be at least 1",
                name
            )));
        }
        if !is_sql_identifier(&self.table) {
            return Err(FormguardError::Config(format!(
                "{}: table '{}' is not a plain SQL identifier",
                name, self.table
            )));
        }
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FormguardConfig {
    /// Load configuration from an optional YAML file, then apply `FORMGUARD__*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        let config: FormguardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FormguardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FormguardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.contact.validate("contact")?;
        self.rate_limiting.newsletter.validate("newsletter")?;
        if self.rate_limiting.contact.table == self.rate_limiting.newsletter.table {
            return Err(FormguardError::Config(
                "contact and newsletter limits must use separate tables".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(FormguardError::Config(
                "store.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
