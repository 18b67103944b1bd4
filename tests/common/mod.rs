//! Shared builders for limiter integration tests

#![allow(dead_code)]

use std::sync::Arc;

use tokengate::{GlobalLimits, LimiterConfig, ManualClock, ProviderLimits, RateLimiter};

/// A permissive single-provider profile tests tighten field by field.
pub fn loose_limits() -> ProviderLimits {
    ProviderLimits {
        requests_per_minute: 1_000,
        tokens_per_minute: 10_000.0,
        tokens_per_day: 1_000_000_000.0,
        max_concurrent: 100,
        backoff_base_ms: 1_000,
        backoff_max_ms: 60_000,
        enabled: true,
    }
}

/// Global limits that never bind unless a test overrides them.
pub fn loose_global() -> GlobalLimits {
    GlobalLimits {
        tokens_per_minute: 1_000_000_000.0,
        tokens_per_day: 1_000_000_000.0,
        max_concurrent_total: 10_000,
        request_queue_max_size: 100,
        request_timeout_ms: 300_000,
        drain_interval_ms: 1_000,
    }
}

pub fn single_provider_config(provider: &str, limits: ProviderLimits) -> LimiterConfig {
    let mut config = LimiterConfig::default();
    config.providers.clear();
    config.providers.insert(provider.to_string(), limits);
    config.global = loose_global();
    config
}

pub fn manual_limiter(config: LimiterConfig) -> (Arc<RateLimiter>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let limiter = Arc::new(RateLimiter::with_clock(config, clock.clone()));
    (limiter, clock)
}
