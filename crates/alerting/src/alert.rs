//! Alert Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{FieldMapping, IntakeError};

/// Job label assigned to one-shot ad-hoc notifications
pub const NOTI_JOB: &str = "noti";

/// Alert status as reported by the source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertStatus {
    Firing,
    Resolved,
    /// Any status the pipeline does not act on
    Other(String),
}

impl AlertStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Other(status) => status,
        }
    }
}

impl From<String> for AlertStatus {
    fn from(status: String) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "firing" => AlertStatus::Firing,
            "resolved" => AlertStatus::Resolved,
            _ => AlertStatus::Other(status),
        }
    }
}

impl From<&str> for AlertStatus {
    fn from(status: &str) -> Self {
        AlertStatus::from(status.to_string())
    }
}

impl From<AlertStatus> for String {
    fn from(status: AlertStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical in-flight alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    /// End time, absent while the alert is open
    #[serde(default, deserialize_with = "deserialize_open_end")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL", skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Alertmanager sends the zero time for open alerts.
fn deserialize_open_end<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ends_at = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(ends_at.filter(|t| t.timestamp() > 0))
}

/// Identity labels of an alert, resolved through a [`FieldMapping`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertIdentity {
    pub alertname: String,
    pub instance: String,
    pub job: String,
    pub level: String,
}

impl Alert {
    /// Create a firing alert with no labels
    pub fn firing(starts_at: DateTime<Utc>) -> Self {
        Self {
            status: AlertStatus::Firing,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            starts_at,
            ends_at: None,
            generator_url: None,
            fingerprint: None,
        }
    }

    /// Builder-style label setter
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Builder-style annotation setter
    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }

    /// Label value, empty when absent
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map(String::as_str).unwrap_or("")
    }

    /// Annotation value, empty when absent
    pub fn annotation(&self, name: &str) -> &str {
        self.annotations.get(name).map(String::as_str).unwrap_or("")
    }

    /// Resolve identity labels
    pub fn identity(&self, mapping: &FieldMapping) -> AlertIdentity {
        AlertIdentity {
            alertname: self.label(&mapping.alertname).to_string(),
            instance: self.label(&mapping.instance).to_string(),
            job: self.label(&mapping.job).to_string(),
            level: self.label(&mapping.level).to_string(),
        }
    }
}

/// Alertmanager webhook envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub group_key: String,
}

/// Ad-hoc single notification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub alertname: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub message: String,
}

impl Notification {
    /// Validate required fields and fill defaults.
    ///
    /// Level is checked against the target registry by the caller.
    pub fn normalize(&mut self) -> Result<(), IntakeError> {
        if self.instance.trim().is_empty() {
            return Err(IntakeError::EmptyInstance);
        }
        if self.message.trim().is_empty() {
            return Err(IntakeError::EmptyMessage);
        }
        if self.alertname.trim().is_empty() {
            self.alertname = "unknown".to_string();
        }
        if self.summary.trim().is_empty() {
            self.summary = self.alertname.clone();
        }
        Ok(())
    }

    /// Convert into a canonical firing alert with the `noti` job
    pub fn into_alert(self, mapping: &FieldMapping, now: DateTime<Utc>) -> Alert {
        let mut alert = Alert::firing(now)
            .with_label(mapping.alertname.as_str(), self.alertname)
            .with_label(mapping.instance.as_str(), self.instance)
            .with_label(mapping.level.as_str(), self.level)
            .with_label(mapping.job.as_str(), NOTI_JOB)
            .with_annotation(mapping.summary.as_str(), self.summary)
            .with_annotation(mapping.description.as_str(), self.message);
        alert.ends_at = Some(now);
        alert
    }
}
