//! Mute rule records and key defaulting

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StorageError;

/// Matches any value in a key field
pub const WILDCARD: &str = "*";

/// Validity window in hours applied when a rule gives no end time
pub const DEFAULT_MUTE_WINDOW_HOURS: i64 = 24;

/// Fill key fields with wildcards from the first unspecified field onward.
///
/// Fields are ordered (instance, alert name, job, status). A blank or `*`
/// field ends the specified prefix, so a wildcard never precedes a concrete
/// value.
pub fn default_key_fields(fields: [&str; 4]) -> [String; 4] {
    let mut out = [WILDCARD; 4].map(String::from);
    for (slot, field) in out.iter_mut().zip(fields) {
        let field = field.trim();
        if field.is_empty() || field == WILDCARD {
            break;
        }
        *slot = field.to_string();
    }
    out
}

/// Normalized mute tuple used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MuteKey {
    pub instance: String,
    pub alert_name: String,
    pub job: String,
    pub status: String,
}

impl MuteKey {
    /// Build a key with defaulting applied. Fields compare ASCII
    /// case-insensitively, matching SQLite `NOCASE`.
    pub fn new(instance: &str, alert_name: &str, job: &str, status: &str) -> Self {
        let [instance, alert_name, job, status] =
            default_key_fields([instance, alert_name, job, status]).map(|f| f.to_ascii_lowercase());
        Self {
            instance,
            alert_name,
            job,
            status,
        }
    }

    /// Key matching every alert
    pub fn global() -> Self {
        Self::new("", "", "", "")
    }
}

/// Complete mute rule as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteRule {
    pub instance: String,
    pub alert_name: String,
    pub job: String,
    pub status: String,
    pub forever: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MuteRule {
    pub fn key(&self) -> MuteKey {
        MuteKey::new(&self.instance, &self.alert_name, &self.job, &self.status)
    }

    /// Permanent, or `now` within `[starts_at, ends_at]` at second precision
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.forever {
            return true;
        }
        let now = now.timestamp();
        self.starts_at.timestamp() <= now && now <= self.ends_at.timestamp()
    }
}

/// Partially specified mute rule as submitted by callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MuteRuleSpec {
    #[serde(default)]
    pub instance: String,
    #[serde(default, alias = "alertname")]
    pub alert_name: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub forever: bool,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl MuteRuleSpec {
    /// Key this spec addresses after defaulting
    pub fn key(&self) -> MuteKey {
        MuteKey::new(&self.instance, &self.alert_name, &self.job, &self.status)
    }

    /// Apply key and time defaulting
    pub fn resolve(self, now: DateTime<Utc>) -> MuteRule {
        let [instance, alert_name, job, status] = default_key_fields([
            self.instance.as_str(),
            self.alert_name.as_str(),
            self.job.as_str(),
            self.status.as_str(),
        ]);
        let starts_at = self.starts_at.unwrap_or(now);
        let ends_at = self.ends_at.unwrap_or(starts_at + Duration::hours(DEFAULT_MUTE_WINDOW_HOURS));
        debug!(
            "Mute rule defaults: [{}][{}][{}][{}] {} ~ {}",
            instance, alert_name, job, status, starts_at, ends_at
        );

        MuteRule {
            instance,
            alert_name,
            job,
            status,
            forever: self.forever,
            starts_at,
            ends_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable mute rule table
#[async_trait]
pub trait MuteRuleStore: Send + Sync {
    /// Every stored rule
    async fn load_all(&self) -> Result<Vec<MuteRule>, StorageError>;

    /// Insert or replace the rule with the same key
    async fn upsert_rule(&self, rule: &MuteRule) -> Result<(), StorageError>;

    /// Delete the rule with this key, returning affected rows
    async fn delete_rule(&self, key: &MuteKey) -> Result<u64, StorageError>;
}
