//! Storage Layer
//!
//! Hook history and mute rule persistence behind async store traits, with a
//! SQLite backend and an in-memory backend.

mod hook;
mod memory;
mod mute_rule;
mod sqlite;

pub use hook::{Hook, HookColumn, HookDetail, HookFilter, HookStore};
pub use memory::MemoryStore;
pub use mute_rule::{
    default_key_fields, MuteKey, MuteRule, MuteRuleSpec, MuteRuleStore, DEFAULT_MUTE_WINDOW_HOURS,
    WILDCARD,
};
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Store unavailable")]
    Unavailable,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}
