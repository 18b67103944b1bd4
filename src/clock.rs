//! Budget clock: the injectable time source all window math derives from.
//!
//! Every window anchor, refill computation, and backoff deadline in the
//! limiter is expressed in wall-clock milliseconds taken from a [`Clock`].
//! Production code uses [`SystemClock`]; tests inject a [`ManualClock`] and
//! advance it explicitly so window resets and refill accrual are
//! deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Days, Local, TimeZone};

/// Milliseconds in one minute window.
pub const MINUTE_MS: u64 = 60_000;

/// Milliseconds in one day window.
pub const DAY_MS: u64 = 86_400_000;

/// Wall-clock time source in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Default clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests.
///
/// # Example
///
/// ```
/// use tokengate::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// assert_eq!(clock.now_ms(), 1_000);
/// clock.advance(61_000);
/// assert_eq!(clock.now_ms(), 62_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Advance the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Milliseconds from `now_ms` until the next local midnight.
///
/// Used as the retry hint for daily-budget denials. Falls back to the
/// remainder of a UTC day when the timestamp cannot be mapped to a local
/// calendar date (out-of-range or a DST gap at midnight).
pub fn ms_until_local_midnight(now_ms: u64) -> u64 {
    let fallback = DAY_MS - (now_ms % DAY_MS);

    let Some(now) = Local.timestamp_millis_opt(now_ms as i64).single() else {
        return fallback;
    };

    let next_midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest());

    match next_midnight {
        Some(midnight) => {
            let delta = midnight.timestamp_millis() - now.timestamp_millis();
            if delta > 0 {
                delta as u64
            } else {
                fallback
            }
        }
        None => fallback,
    }
}
