//! Snapshot types for dashboards and telemetry collectors

use std::collections::HashMap;

use serde::Serialize;

/// Point-in-time view of one provider's bucket.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub enabled: bool,
    pub tokens_available: f64,
    pub tokens_used_today: f64,
    pub requests_this_minute: u32,
    pub in_flight: u32,
    pub backoff_level: u32,
    /// 0 when the provider is not backing off.
    pub backoff_until_ms: u64,
    /// `tokens_used_today / tokens_per_day * 100`; 0 when no daily budget.
    pub daily_usage_percent: f64,
}

/// Point-in-time view of the aggregate counters.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub tokens_this_minute: f64,
    pub tokens_today: f64,
    pub total_in_flight: u32,
    pub queue_depth: usize,
}

/// Full limiter snapshot returned by [`RateLimiter::stats`](crate::RateLimiter::stats).
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    /// Every provider that has been used at least once.
    pub providers: HashMap<String, ProviderStats>,
    pub global: GlobalStats,
}
