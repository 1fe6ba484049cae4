//! Alert Dispatch
//!
//! Bounded dispatch queue drained by a fixed worker pool. Each worker runs
//! the per-alert pipeline: render, mute check, persist, then forward to the
//! target configured for the alert's level.

mod pipeline;
mod pool;
mod target;
mod transport;

pub use pipeline::{Outcome, Pipeline};
pub use pool::{DispatchQueue, PoolConfig, WorkerPool};
pub use target::{ForwardRequest, Target, TargetRegistry, MESSAGE_PLACEHOLDER};
pub use transport::{HttpTransport, Transport};

use thiserror::Error;

/// Errors raised while forwarding a rendered message
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("Invalid target URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Target returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Dispatch queue errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch queue closed")]
    QueueClosed,
}
