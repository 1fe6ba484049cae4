//! Occurrence fingerprinting

use crate::{Alert, FieldMapping};

/// Deduplication key for an alert occurrence.
///
/// MD5 over the start time (unix seconds) followed by the alert name,
/// instance, job and level labels. Status and annotations do not take part,
/// so firing and resolved events of one occurrence share a key.
pub fn fingerprint(alert: &Alert, mapping: &FieldMapping) -> String {
    let mut key = alert.starts_at.timestamp().to_string();
    for name in [&mapping.alertname, &mapping.instance, &mapping.job, &mapping.level] {
        key.push_str(alert.label(name));
    }
    format!("{:x}", md5::compute(key))
}
