//! Hook history records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Persisted record of one alert occurrence, keyed by fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub hook_id: String,
    pub alert_name: String,
    pub instance: String,
    pub job: String,
    pub level: String,
    pub ignored: bool,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Delivery attempts, oldest first
    #[serde(default)]
    pub hook_details: Vec<HookDetail>,
}

/// One delivery attempt for a hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDetail {
    /// Assigned by the store; zero until persisted
    pub id: i64,
    pub hook_id: String,
    pub status: String,
    pub req_json: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Updatable hook columns for conflict resolution.
///
/// `updated_at` is always refreshed on conflict and is not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookColumn {
    HookId,
    AlertName,
    Instance,
    Job,
    Level,
    Ignored,
    Status,
    StartsAt,
    EndsAt,
}

impl HookColumn {
    /// Every updatable column
    pub const ALL: [HookColumn; 9] = [
        HookColumn::HookId,
        HookColumn::AlertName,
        HookColumn::Instance,
        HookColumn::Job,
        HookColumn::Level,
        HookColumn::Ignored,
        HookColumn::Status,
        HookColumn::StartsAt,
        HookColumn::EndsAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookColumn::HookId => "hook_id",
            HookColumn::AlertName => "alert_name",
            HookColumn::Instance => "instance",
            HookColumn::Job => "job",
            HookColumn::Level => "level",
            HookColumn::Ignored => "ignored",
            HookColumn::Status => "status",
            HookColumn::StartsAt => "starts_at",
            HookColumn::EndsAt => "ends_at",
        }
    }

    /// Columns to update on conflict; an empty request means all of them
    pub fn resolve(columns: &[HookColumn]) -> &[HookColumn] {
        if columns.is_empty() {
            &HookColumn::ALL
        } else {
            columns
        }
    }
}

impl Hook {
    /// Copy the requested columns from `incoming` onto this row
    pub fn apply_columns(&mut self, incoming: &Hook, columns: &[HookColumn]) {
        for column in HookColumn::resolve(columns) {
            match column {
                HookColumn::HookId => self.hook_id = incoming.hook_id.clone(),
                HookColumn::AlertName => self.alert_name = incoming.alert_name.clone(),
                HookColumn::Instance => self.instance = incoming.instance.clone(),
                HookColumn::Job => self.job = incoming.job.clone(),
                HookColumn::Level => self.level = incoming.level.clone(),
                HookColumn::Ignored => self.ignored = incoming.ignored,
                HookColumn::Status => self.status = incoming.status.clone(),
                HookColumn::StartsAt => self.starts_at = incoming.starts_at,
                HookColumn::EndsAt => self.ends_at = incoming.ends_at,
            }
        }
        self.updated_at = incoming.updated_at;
    }
}

/// Hook history query
#[derive(Debug, Clone, Default)]
pub struct HookFilter {
    pub hook_id: Option<String>,
    pub alert_name: Option<String>,
    pub instance: Option<String>,
    pub job: Option<String>,
    pub status: Option<String>,
    pub level: Option<String>,
    /// Lower bound on `starts_at`, inclusive
    pub starts_at: Option<DateTime<Utc>>,
    /// Upper bound on `ends_at`, exclusive
    pub ends_at: Option<DateTime<Utc>>,
    /// Maximum rows returned; zero means unbounded
    pub limit: usize,
}

impl HookFilter {
    pub(crate) fn matches(&self, hook: &Hook) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w.is_empty() || w == have)
        }

        eq(&self.hook_id, &hook.hook_id)
            && eq(&self.alert_name, &hook.alert_name)
            && eq(&self.instance, &hook.instance)
            && eq(&self.job, &hook.job)
            && eq(&self.status, &hook.status)
            && eq(&self.level, &hook.level)
            && self.starts_at.map_or(true, |from| hook.starts_at >= from)
            && self
                .ends_at
                .map_or(true, |until| hook.ends_at.map_or(false, |end| end < until))
    }
}

/// Durable hook history
#[async_trait]
pub trait HookStore: Send + Sync {
    /// Insert the hook, or update `columns` (all when empty) on a key
    /// collision. Detail rows are always appended.
    async fn upsert_hook(&self, hook: &Hook, columns: &[HookColumn]) -> Result<(), StorageError>;

    /// Hooks matching the filter, newest start first, with their details
    async fn list_hooks(&self, filter: &HookFilter) -> Result<Vec<Hook>, StorageError>;
}
