//! External field name mapping

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps canonical alert roles onto the label and annotation names used by
/// the alert source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Label carrying the alert name
    pub alertname: String,
    /// Label carrying the instance
    pub instance: String,
    /// Label carrying the job
    pub job: String,
    /// Label carrying the severity level
    pub level: String,
    /// Annotation carrying the summary
    pub summary: String,
    /// Annotation carrying the description
    pub description: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            alertname: "alertname".to_string(),
            instance: "instance".to_string(),
            job: "job".to_string(),
            level: "level".to_string(),
            summary: "summary".to_string(),
            description: "description".to_string(),
        }
    }
}

impl FieldMapping {
    /// Build a mapping from role → name tables, keeping the role name for
    /// any role that is missing or blank.
    pub fn from_maps(labels: &HashMap<String, String>, annotations: &HashMap<String, String>) -> Self {
        let pick = |table: &HashMap<String, String>, role: &str| {
            table
                .get(role)
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .unwrap_or(role)
                .to_string()
        };

        Self {
            alertname: pick(labels, "alertname"),
            instance: pick(labels, "instance"),
            job: pick(labels, "job"),
            level: pick(labels, "level"),
            summary: pick(annotations, "summary"),
            description: pick(annotations, "description"),
        }
    }

    /// Canonical role and external name pairs for labels
    pub fn label_roles(&self) -> [(&'static str, &str); 4] {
        [
            ("alertname", self.alertname.as_str()),
            ("instance", self.instance.as_str()),
            ("job", self.job.as_str()),
            ("level", self.level.as_str()),
        ]
    }

    /// Canonical role and external name pairs for annotations
    pub fn annotation_roles(&self) -> [(&'static str, &str); 2] {
        [("summary", self.summary.as_str()), ("description", self.description.as_str())]
    }
}
