//! Rate limiting logic backed by a shared counter store.

mod clock;
mod counter;
mod identity;
mod limiter;
mod sqlite;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{RateLimitCounter, DEFAULT_RETENTION};
pub use identity::{IdentityHash, IdentityHasher, UNKNOWN_IDENTITY};
pub use limiter::{Decision, RateLimiter};
pub use sqlite::{connect, SqliteCounterStore};
pub use store::{CounterKey, CounterStore, StoreError, StoreResult};
pub use window::{TimeWindow, WindowKey};
