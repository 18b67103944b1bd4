//! Configuration module for the admission controller
//!
//! Built-in conservative per-provider defaults, optionally overlaid with
//! partial overrides from a TOML file or from the embedding application.
//!
//! # Configuration Precedence
//!
//! 1. Runtime reconfiguration (`RateLimiter::update_provider_limits`)
//! 2. Constructor overrides / configuration file (TOML)
//! 3. Built-in defaults (lowest priority)
//!
//! # Example
//!
//! ```rust
//! use tokengate::config::LimiterConfig;
//!
//! // Built-in defaults
//! let config = LimiterConfig::default();
//! assert_eq!(config.providers["anthropic"].requests_per_minute, 50);
//!
//! // Partial overrides merge over the defaults
//! let toml = r#"
//! [global]
//! max_concurrent_total = 4
//!
//! [providers.anthropic]
//! requests_per_minute = 10
//! "#;
//! let config = LimiterConfig::from_toml(toml).unwrap();
//! assert_eq!(config.global.max_concurrent_total, 4);
//! assert_eq!(config.providers["anthropic"].requests_per_minute, 10);
//! assert_eq!(config.providers["anthropic"].tokens_per_minute, 30_000.0);
//! ```

pub mod error;
pub mod global;
pub mod provider;

pub use error::ConfigError;
pub use global::{GlobalLimits, GlobalLimitsPatch};
pub use provider::{builtin_provider_limits, ProviderLimits, ProviderLimitsPatch};

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Complete configuration for a [`RateLimiter`](crate::RateLimiter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "LimiterConfigFile")]
pub struct LimiterConfig {
    /// Static limits per provider identifier.
    pub providers: HashMap<String, ProviderLimits>,
    /// Cross-provider aggregate limits and queue sizing.
    pub global: GlobalLimits,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            providers: builtin_provider_limits(),
            global: GlobalLimits::default(),
        }
    }
}

/// On-disk shape: partial sections merged over the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LimiterConfigFile {
    providers: HashMap<String, ProviderLimitsPatch>,
    global: GlobalLimitsPatch,
}

impl From<LimiterConfigFile> for LimiterConfig {
    fn from(file: LimiterConfigFile) -> Self {
        let mut config = LimiterConfig::default();
        config.global.apply(&file.global);
        for (provider, patch) in file.providers {
            config
                .providers
                .entry(provider)
                .or_default()
                .apply(&patch);
        }
        config
    }
}

impl LimiterConfig {
    /// Load configuration from a TOML file.
    ///
    /// If path is None, returns the built-in defaults.
    /// If path doesn't exist, returns a NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse partial TOML overrides, merged over the built-in defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: LimiterConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config: Self = file.into();
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.global.validate()?;
        for (provider, limits) in &self.providers {
            limits.validate(provider)?;
        }
        Ok(())
    }
}
