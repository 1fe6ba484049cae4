//! Mute Rule Routes

use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use storage::{MuteRule, MuteRuleSpec};

use crate::error::{success, ApiError, Envelope};
use crate::extract::JsonOrForm;
use crate::AppState;

/// Create or replace a mute rule
pub async fn upsert(
    State(state): State<Arc<AppState>>,
    JsonOrForm(spec): JsonOrForm<MuteRuleSpec>,
) -> Result<Json<Envelope<MuteRule>>, ApiError> {
    let rule = state.mute.upsert(spec).await?;
    Ok(success(rule))
}

/// Delete a mute rule; result is the number of rows removed
pub async fn delete(
    State(state): State<Arc<AppState>>,
    JsonOrForm(spec): JsonOrForm<MuteRuleSpec>,
) -> Result<Json<Envelope<u64>>, ApiError> {
    let removed = state.mute.delete(spec).await?;
    Ok(success(removed))
}

/// Stored mute rules
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Envelope<Vec<MuteRule>>>, ApiError> {
    let mut rules = state.mute_store.load_all().await?;
    rules.sort_by(|a, b| {
        (&a.instance, &a.alert_name, &a.job, &a.status).cmp(&(&b.instance, &b.alert_name, &b.job, &b.status))
    });
    Ok(success(rules))
}
