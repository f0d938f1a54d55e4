//! Time source for expiry decisions
//!
//! Token lifetimes, admission approval windows, certificate validity and
//! server certificate renewal all read the time through a [`Clock`].
//! [`SystemClock`] is the wall clock; `FixedClock` (behind the `testing`
//! feature) lets tests jump over expiry windows without sleeping.
//!
//! ```
//! use keyserver::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! let millis = clock.now_millis();
//! assert!(clock.now_secs() as u64 >= millis / 1000);
//! ```

use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds since the Unix epoch, plus derived views of the same instant.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> i64 {
        (self.now_millis() / 1000) as i64
    }

    /// The instant `lifespan` from now, in milliseconds since the epoch.
    fn deadline(&self, lifespan: Duration) -> u64 {
        self.now_millis()
            .saturating_add(u64::try_from(lifespan.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Render a millisecond Unix timestamp as RFC 3339, for logs.
pub fn format_millis_rfc3339(millis: u64) -> String {
    use chrono::{TimeZone, Utc};
    let secs = (millis / 1000) as i64;
    let nanos = ((millis % 1000) * 1_000_000) as u32;
    match Utc.timestamp_opt(secs, nanos).single() {
        Some(at) => at.to_rfc3339(),
        None => format!("{millis}ms"),
    }
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests.
///
/// Every read returns the current value and then ticks one millisecond, so
/// two events are never recorded at the same instant. `advance` jumps ahead.
///
/// ```
/// use keyserver::{Clock, FixedClock};
///
/// let clock = FixedClock::new(1_000);
/// let approved = clock.now_millis();
/// clock.advance(5 * 60 * 1000);
/// assert!(clock.now_millis() - approved > 5 * 60 * 1000);
/// ```
#[cfg(any(test, feature = "testing"))]
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_by(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }

    /// Jump to an absolute time in milliseconds.
    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }

    /// Peek at the current time without ticking.
    pub fn get(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for FixedClock {
    /// 2024-01-01T00:00:00Z
    fn default() -> Self {
        Self::new(1_704_067_200_000)
    }
}
