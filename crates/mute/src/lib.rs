//! Mute Rule Cache
//!
//! Answers whether an alert is currently suppressed without touching the
//! durable store on the hot path. The cache is rebuilt from the store on an
//! interval and updated in place on every upsert and delete.

mod cache;

pub use cache::{MuteCache, MuteQuery, MuteTier};

use thiserror::Error;

/// Mute cache errors
#[derive(Debug, Error)]
pub enum MuteError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
}
