//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path passed to [`Config::load`]
//! 2. `~/.heimdall/config.toml` (user)
//! 3. `/etc/heimdall/config.toml` (system)
//!
//! `HEIMDALL_REDIS_URL` overrides `cache.redis_url` after loading.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{HeimdallError, Result};

/// Environment variable overriding the distributed cache URL.
pub const REDIS_URL_ENV: &str = "HEIMDALL_REDIS_URL";

/// Core configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub quota: QuotaSettings,
    #[serde(default)]
    pub midjourney: MidjourneySettings,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Cache tiers.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Redis connection URL. When set, the distributed cache tier and the
    /// fast-path quota layer are enabled.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Byte budget of the in-process cache (default: 1 MiB).
    #[serde(default = "default_local_capacity")]
    pub local_capacity_bytes: u64,
    /// How long a coalesced lookup waits for its result (default: 1000ms).
    #[serde(default = "default_cache_timeout")]
    pub timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            local_capacity_bytes: default_local_capacity(),
            timeout_ms: default_cache_timeout(),
        }
    }
}

impl CacheSettings {
    /// Whether the distributed layer is configured.
    pub fn distributed_enabled(&self) -> bool {
        self.redis_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_local_capacity() -> u64 {
    1024 * 1024
}

fn default_cache_timeout() -> u64 {
    1000
}

/// Quota and user-lookup cache lifetimes.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaSettings {
    /// TTL of cached quota balances, tokens and user attributes (default: 60s).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Sliding TTL of realtime quota counters (default: 24h).
    #[serde(default = "default_realtime_ttl")]
    pub realtime_ttl_secs: u64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            realtime_ttl_secs: default_realtime_ttl(),
        }
    }
}

impl QuotaSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn realtime_ttl(&self) -> Duration {
        Duration::from_secs(self.realtime_ttl_secs)
    }
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_realtime_ttl() -> u64 {
    24 * 60 * 60
}

/// Midjourney adapter switches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MidjourneySettings {
    /// Forward `notifyHook` webhooks to the backend (default: false).
    #[serde(default)]
    pub notify_enabled: bool,
}

/// Legacy token migration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationSettings {
    /// Tokens with an id at or below this value are indexed as legacy tokens.
    /// 0 disables the migration.
    #[serde(default)]
    pub old_token_max_id: i64,
}

/// Durable-store retry budget.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Attempts including the first one (default: 4, i.e. three retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between attempts (default: 1ms).
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

impl RetrySettings {
    /// Build the policy described by these settings.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_attempts(self.max_attempts)
            .delay(Duration::from_millis(self.delay_ms))
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_retry_delay() -> u64 {
    1
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.heimdall/config.toml`
    /// 3. `/etc/heimdall/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let mut config = Self::load_from_file(&path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a single configuration file without env overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(REDIS_URL_ENV) {
            if !url.is_empty() {
                self.cache.redis_url = Some(url);
            }
        }
    }

    /// Reject settings the cache layer cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.quota.cache_ttl_secs == 0 {
            return Err(HeimdallError::Configuration(
                "quota.cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.quota.realtime_ttl_secs == 0 {
            return Err(HeimdallError::Configuration(
                "quota.realtime_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache.timeout_ms == 0 {
            return Err(HeimdallError::Configuration(
                "cache.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HeimdallError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HeimdallError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".heimdall").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/heimdall/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(HeimdallError::Configuration(
            "No config file found. Create ~/.heimdall/config.toml or /etc/heimdall/config.toml"
                .to_string(),
        ))
    }
}
