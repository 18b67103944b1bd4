//! Per-provider buckets and global counters
//!
//! The numeric core: continuous token-bucket refill plus fixed, re-anchored
//! minute and day windows.

use crate::clock::{DAY_MS, MINUTE_MS};
use crate::config::ProviderLimits;

/// Mutable budget state for one provider, created lazily on first use.
#[derive(Debug, Clone)]
pub struct ProviderBucket {
    /// Currently available token budget. Capped at `tokens_per_minute`;
    /// unbounded below zero, since reconciliation overshoot is absorbed
    /// arithmetically and self-heals on the next refill.
    pub tokens: f64,
    pub last_refill_at_ms: u64,
    pub minute_window_start_ms: u64,
    pub day_window_start_ms: u64,
    pub tokens_used_today: f64,
    pub requests_this_minute: u32,
    pub in_flight: u32,
    /// 0 = no backoff.
    pub backoff_level: u32,
    /// 0 = not backing off.
    pub backoff_until_ms: u64,
}

impl ProviderBucket {
    /// A fresh bucket starts full.
    pub fn new(limits: &ProviderLimits, now_ms: u64) -> Self {
        Self {
            tokens: limits.tokens_per_minute,
            last_refill_at_ms: now_ms,
            minute_window_start_ms: now_ms,
            day_window_start_ms: now_ms,
            tokens_used_today: 0.0,
            requests_this_minute: 0,
            in_flight: 0,
            backoff_level: 0,
            backoff_until_ms: 0,
        }
    }

    /// Lazy refill, performed before every admission evaluation.
    ///
    /// Tokens accrue continuously at `tokens_per_minute / 60_000` per
    /// millisecond, capped at `tokens_per_minute`. The minute and day windows
    /// are fixed but re-anchored: a counter resets only once a full window
    /// has elapsed since its last reset, at which point the anchor jumps to
    /// `now`. This permits a burst of up to 2x the nominal rate across a
    /// window boundary; callers rely on that throughput, so it is kept.
    pub fn refill(&mut self, limits: &ProviderLimits, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_refill_at_ms);
        if elapsed > 0 {
            let rate_per_ms = limits.tokens_per_minute / MINUTE_MS as f64;
            self.tokens = (self.tokens + elapsed as f64 * rate_per_ms).min(limits.tokens_per_minute);
            self.last_refill_at_ms = now_ms;
        }

        if now_ms.saturating_sub(self.minute_window_start_ms) >= MINUTE_MS {
            self.requests_this_minute = 0;
            self.minute_window_start_ms = now_ms;
        }

        if now_ms.saturating_sub(self.day_window_start_ms) >= DAY_MS {
            self.tokens_used_today = 0.0;
            self.day_window_start_ms = now_ms;
        }
    }

    /// Whether the provider is inside a backoff cooldown at `now_ms`.
    pub fn in_backoff(&self, now_ms: u64) -> bool {
        now_ms < self.backoff_until_ms
    }
}

/// Cross-provider aggregate counters, mirrored window anchors included.
#[derive(Debug, Clone)]
pub struct GlobalCounters {
    pub tokens_this_minute: f64,
    pub tokens_today: f64,
    pub total_in_flight: u32,
    pub minute_window_start_ms: u64,
    pub day_window_start_ms: u64,
}

impl GlobalCounters {
    pub fn new(now_ms: u64) -> Self {
        Self {
            tokens_this_minute: 0.0,
            tokens_today: 0.0,
            total_in_flight: 0,
            minute_window_start_ms: now_ms,
            day_window_start_ms: now_ms,
        }
    }

    /// Re-anchor the aggregate windows, same rules as the provider bucket.
    pub fn roll_windows(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.minute_window_start_ms) >= MINUTE_MS {
            self.tokens_this_minute = 0.0;
            self.minute_window_start_ms = now_ms;
        }
        if now_ms.saturating_sub(self.day_window_start_ms) >= DAY_MS {
            self.tokens_today = 0.0;
            self.day_window_start_ms = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(tpm: f64) -> ProviderLimits {
        ProviderLimits {
            tokens_per_minute: tpm,
            ..Default::default()
        }
    }

    #[test]
    fn new_bucket_starts_full() {
        let l = limits(1_000.0);
        let bucket = ProviderBucket::new(&l, 0);
        assert_eq!(bucket.tokens, 1_000.0);
        assert_eq!(bucket.requests_this_minute, 0);
    }

    #[test]
    fn refill_accrues_continuously_and_caps() {
        let l = limits(60_000.0); // 1 token per ms
        let mut bucket = ProviderBucket::new(&l, 0);
        bucket.tokens = 0.0;

        bucket.refill(&l, 500);
        assert!((bucket.tokens - 500.0).abs() < 1e-6);

        // Long idle period caps at capacity, never over.
        bucket.refill(&l, 10 * MINUTE_MS);
        assert_eq!(bucket.tokens, 60_000.0);
    }

    #[test]
    fn negative_balance_self_heals() {
        let l = limits(60_000.0);
        let mut bucket = ProviderBucket::new(&l, 0);
        bucket.tokens = -300.0;

        bucket.refill(&l, 100);
        assert!((bucket.tokens - (-200.0)).abs() < 1e-6);

        bucket.refill(&l, 400);
        assert!((bucket.tokens - 100.0).abs() < 1e-6);
    }

    #[test]
    fn minute_window_resets_only_after_full_minute() {
        let l = limits(1_000.0);
        let mut bucket = ProviderBucket::new(&l, 0);
        bucket.requests_this_minute = 7;

        bucket.refill(&l, MINUTE_MS - 1);
        assert_eq!(bucket.requests_this_minute, 7);

        bucket.refill(&l, MINUTE_MS);
        assert_eq!(bucket.requests_this_minute, 0);
        assert_eq!(bucket.minute_window_start_ms, MINUTE_MS);
    }

    #[test]
    fn window_anchor_jumps_to_now_not_calendar_boundary() {
        let l = limits(1_000.0);
        let mut bucket = ProviderBucket::new(&l, 0);
        bucket.requests_this_minute = 3;

        // Reset happens 90s in; the new window runs from 90s, not 60s.
        bucket.refill(&l, 90_000);
        assert_eq!(bucket.requests_this_minute, 0);
        assert_eq!(bucket.minute_window_start_ms, 90_000);
    }

    #[test]
    fn day_window_resets_daily_usage() {
        let l = limits(1_000.0);
        let mut bucket = ProviderBucket::new(&l, 0);
        bucket.tokens_used_today = 12_345.0;

        bucket.refill(&l, DAY_MS - 1);
        assert_eq!(bucket.tokens_used_today, 12_345.0);

        bucket.refill(&l, DAY_MS);
        assert_eq!(bucket.tokens_used_today, 0.0);
    }

    #[test]
    fn global_counters_roll_independently() {
        let mut global = GlobalCounters::new(0);
        global.tokens_this_minute = 500.0;
        global.tokens_today = 9_000.0;

        global.roll_windows(MINUTE_MS);
        assert_eq!(global.tokens_this_minute, 0.0);
        assert_eq!(global.tokens_today, 9_000.0);

        global.roll_windows(DAY_MS);
        assert_eq!(global.tokens_today, 0.0);
    }
}
