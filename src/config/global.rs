//! Cross-provider aggregate limits and wait-queue sizing

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Aggregate budgets shared by every provider, plus wait-queue sizing.
///
/// # Example
///
/// ```toml
/// [global]
/// tokens_per_minute = 200000
/// max_concurrent_total = 20
/// request_queue_max_size = 100
/// request_timeout_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimits {
    /// Aggregate tokens admitted per minute window across all providers.
    pub tokens_per_minute: f64,

    /// Aggregate daily token budget across all providers.
    pub tokens_per_day: f64,

    /// Maximum in-flight calls across all providers.
    pub max_concurrent_total: u32,

    /// Maximum number of waiters in the queue. When full, `wait_for_capacity`
    /// returns `queue_full` immediately instead of blocking.
    pub request_queue_max_size: usize,

    /// Maximum time a waiter may sit in the queue before resolving with
    /// `queue_timeout`.
    pub request_timeout_ms: u64,

    /// Interval of the periodic drain pass started by `RateLimiter::start`.
    pub drain_interval_ms: u64,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            tokens_per_minute: 200_000.0,
            tokens_per_day: 20_000_000.0,
            max_concurrent_total: 20,
            request_queue_max_size: 100,
            request_timeout_ms: 30_000,
            drain_interval_ms: 1_000,
        }
    }
}

impl GlobalLimits {
    /// Validate configuration at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens_per_minute < 0.0 {
            return Err(ConfigError::Validation {
                field: "global.tokens_per_minute".to_string(),
                message: "must be >= 0".to_string(),
            });
        }
        if self.tokens_per_day < 0.0 {
            return Err(ConfigError::Validation {
                field: "global.tokens_per_day".to_string(),
                message: "must be >= 0".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: "global.request_timeout_ms".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        if self.drain_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "global.drain_interval_ms".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Apply a partial override on top of these limits.
    pub fn apply(&mut self, patch: &GlobalLimitsPatch) {
        if let Some(v) = patch.tokens_per_minute {
            self.tokens_per_minute = v;
        }
        if let Some(v) = patch.tokens_per_day {
            self.tokens_per_day = v;
        }
        if let Some(v) = patch.max_concurrent_total {
            self.max_concurrent_total = v;
        }
        if let Some(v) = patch.request_queue_max_size {
            self.request_queue_max_size = v;
        }
        if let Some(v) = patch.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        if let Some(v) = patch.drain_interval_ms {
            self.drain_interval_ms = v;
        }
    }
}

/// Partial override for [`GlobalLimits`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimitsPatch {
    pub tokens_per_minute: Option<f64>,
    pub tokens_per_day: Option<f64>,
    pub max_concurrent_total: Option<u32>,
    pub request_queue_max_size: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    pub drain_interval_ms: Option<u64>,
}
