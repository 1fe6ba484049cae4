//! Service configuration

use alerting::{parse_timezone, DEFAULT_TIME_FORMAT};
use chrono_tz::Tz;
use dispatch::Target;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Prefix for environment overrides, e.g. `HOOK_RELAY__SERVER__ADDR`
pub const ENV_PREFIX: &str = "HOOK_RELAY";

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    /// IANA name for message timestamps
    pub timezone: String,
    pub log: LogSettings,
    pub database: DatabaseSettings,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
    /// Prefix for every route; empty or `/` mounts at the root
    pub base_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            base_path: "/webhook".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://hook-relay.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Message template file; built-in template when unset
    pub template: Option<PathBuf>,
    pub time_format: String,
    /// Canonical label role to external label name
    pub labels: HashMap<String, String>,
    /// Canonical annotation role to external annotation name
    pub annotations: HashMap<String, String>,
    /// Level to downstream target
    pub targets: HashMap<String, Target>,
    pub cache_sync_secs: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub timeout_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            template: None,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            targets: HashMap::new(),
            cache_sync_secs: 60,
            workers: 5,
            queue_capacity: 100,
            timeout_ms: 3000,
        }
    }
}

impl WebhookSettings {
    pub fn cache_sync_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sync_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Load from `path` (optional) with environment overrides on top
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Display timezone; unknown names fall back to UTC
    pub fn time_zone(&self) -> Tz {
        parse_timezone(&self.timezone).unwrap_or_else(|| {
            info!("Unknown timezone '{}', using UTC", self.timezone);
            Tz::UTC
        })
    }
}
