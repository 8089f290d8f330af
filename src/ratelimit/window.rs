//! Fixed-width time windows.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::error::{FormguardError, Result};

/// Index of a fixed-width time bucket: `floor(unix_seconds / window_length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey(pub i64);

impl WindowKey {
    /// The raw bucket index as stored in the database.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time window for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    length_secs: i64,
}

impl TimeWindow {
    /// Create a window of the given length. Sub-second parts are ignored.
    pub fn new(length: Duration) -> Result<Self> {
        let secs = length.as_secs();
        if secs == 0 {
            return Err(FormguardError::InvalidArgument(
                "window length must be at least one second".to_string(),
            ));
        }
        let length_secs = i64::try_from(secs).map_err(|_| {
            FormguardError::InvalidArgument(format!("window length {}s is too large", secs))
        })?;
        Ok(Self { length_secs })
    }

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.length_secs as u64)
    }

    /// The bucket containing `now`.
    pub fn key_at(&self, now: DateTime<Utc>) -> WindowKey {
        WindowKey(now.timestamp().div_euclid(self.length_secs))
    }

    /// Seconds from `now` until the bucket containing it closes.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = now.timestamp().rem_euclid(self.length_secs);
        Duration::from_secs((self.length_secs - elapsed) as u64)
    }

    /// Number of whole windows kept for `retention`, never less than one.
    pub fn horizon_windows(&self, retention: Duration) -> i64 {
        let retention_secs = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        (retention_secs / self.length_secs).max(1)
    }

    /// Oldest window key still inside the retention horizon when the current key is `current`.
    pub fn retention_floor(&self, current: WindowKey, retention: Duration) -> WindowKey {
        WindowKey(current.0.saturating_sub(self.horizon_windows(retention)))
    }
}
