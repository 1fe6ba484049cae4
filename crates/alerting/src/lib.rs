//! Alerting Model
//!
//! Canonical alert shapes, label mapping, fingerprinting, and message rendering.

mod alert;
mod fingerprint;
mod mapping;
mod render;

pub use alert::{Alert, AlertIdentity, AlertStatus, Notification, WebhookMessage, NOTI_JOB};
pub use fingerprint::fingerprint;
pub use mapping::FieldMapping;
pub use render::{parse_timezone, Renderer, DEFAULT_TEMPLATE, DEFAULT_TIME_FORMAT};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating ad-hoc notifications
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("instance empty")]
    EmptyInstance,
    #[error("empty message")]
    EmptyMessage,
    #[error("level '{0}' not in target")]
    UnknownLevel(String),
}

/// Errors raised while loading or applying a message template
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template read failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Template compile failed: {0}")]
    Compile(#[from] Box<handlebars::TemplateError>),
}
