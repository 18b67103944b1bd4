//! Per-provider rate limit configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Static rate limits for a single provider.
///
/// One instance exists per known provider identifier. Providers without a
/// limits entry are treated as always-allowed by the admission check.
///
/// # Example
///
/// ```toml
/// [providers.anthropic]
/// requests_per_minute = 50
/// tokens_per_minute = 30000
/// tokens_per_day = 5000000
/// max_concurrent = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderLimits {
    /// Maximum requests admitted per minute window.
    pub requests_per_minute: u32,

    /// Token bucket capacity; also the continuous refill amount per minute.
    pub tokens_per_minute: f64,

    /// Daily token budget, reset when a full day window has elapsed.
    pub tokens_per_day: f64,

    /// Maximum in-flight calls to this provider.
    pub max_concurrent: u32,

    /// Initial backoff delay after a provider-reported rate-limit error.
    pub backoff_base_ms: u64,

    /// Ceiling for the exponential backoff delay.
    pub backoff_max_ms: u64,

    /// When false, every admission check is denied with `provider_disabled`.
    pub enabled: bool,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        // Generic fallback used for providers added at runtime without an
        // explicit profile.
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 60_000.0,
            tokens_per_day: 10_000_000.0,
            max_concurrent: 8,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            enabled: true,
        }
    }
}

impl ProviderLimits {
    /// Validate configuration at startup.
    pub fn validate(&self, provider: &str) -> Result<(), ConfigError> {
        if self.tokens_per_minute < 0.0 {
            return Err(ConfigError::Validation {
                field: format!("providers.{provider}.tokens_per_minute"),
                message: "must be >= 0".to_string(),
            });
        }
        if self.tokens_per_day < 0.0 {
            return Err(ConfigError::Validation {
                field: format!("providers.{provider}.tokens_per_day"),
                message: "must be >= 0".to_string(),
            });
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::Validation {
                field: format!("providers.{provider}.backoff_base_ms"),
                message: "must be > 0".to_string(),
            });
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Validation {
                field: format!("providers.{provider}.backoff_max_ms"),
                message: "must be >= backoff_base_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Apply a partial override on top of these limits.
    pub fn apply(&mut self, patch: &ProviderLimitsPatch) {
        if let Some(v) = patch.requests_per_minute {
            self.requests_per_minute = v;
        }
        if let Some(v) = patch.tokens_per_minute {
            self.tokens_per_minute = v;
        }
        if let Some(v) = patch.tokens_per_day {
            self.tokens_per_day = v;
        }
        if let Some(v) = patch.max_concurrent {
            self.max_concurrent = v;
        }
        if let Some(v) = patch.backoff_base_ms {
            self.backoff_base_ms = v;
        }
        if let Some(v) = patch.backoff_max_ms {
            self.backoff_max_ms = v;
        }
        if let Some(v) = patch.enabled {
            self.enabled = v;
        }
    }
}

/// Partial override for [`ProviderLimits`].
///
/// Used both for runtime reconfiguration (`update_provider_limits`) and for
/// TOML files, where operators typically override one or two fields and keep
/// the built-in defaults for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderLimitsPatch {
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<f64>,
    pub tokens_per_day: Option<f64>,
    pub max_concurrent: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub enabled: Option<bool>,
}

/// Built-in conservative defaults for the providers the gateway ships with.
///
/// Cloud vendors get limits well under their published tier-1 quotas so a
/// single gateway instance never trips the upstream limiter on its own;
/// locally hosted backends get far higher budgets since the only contended
/// resource is the machine itself.
pub fn builtin_provider_limits() -> HashMap<String, ProviderLimits> {
    let mut providers = HashMap::new();

    providers.insert(
        "anthropic".to_string(),
        ProviderLimits {
            requests_per_minute: 50,
            tokens_per_minute: 30_000.0,
            tokens_per_day: 5_000_000.0,
            max_concurrent: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            enabled: true,
        },
    );

    providers.insert(
        "openai".to_string(),
        ProviderLimits {
            requests_per_minute: 60,
            tokens_per_minute: 90_000.0,
            tokens_per_day: 10_000_000.0,
            max_concurrent: 10,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            enabled: true,
        },
    );

    providers.insert(
        "google".to_string(),
        ProviderLimits {
            requests_per_minute: 60,
            tokens_per_minute: 60_000.0,
            tokens_per_day: 10_000_000.0,
            max_concurrent: 8,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            enabled: true,
        },
    );

    providers.insert(
        "openrouter".to_string(),
        ProviderLimits {
            requests_per_minute: 120,
            tokens_per_minute: 120_000.0,
            tokens_per_day: 20_000_000.0,
            max_concurrent: 10,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            enabled: true,
        },
    );

    // Locally hosted models: the box is the limit, not the vendor.
    providers.insert(
        "ollama".to_string(),
        ProviderLimits {
            requests_per_minute: 600,
            tokens_per_minute: 1_000_000.0,
            tokens_per_day: 100_000_000.0,
            max_concurrent: 32,
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
            enabled: true,
        },
    );

    providers
}
