//! Hook Routes

use alerting::{IntakeError, Notification, WebhookMessage};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use storage::{Hook, HookFilter};
use tracing::{debug, info};

use crate::error::{success, ApiError, Envelope};
use crate::extract::{JsonBody, JsonOrForm, QueryParams};
use crate::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Query parameters for the hook history endpoint
#[derive(Debug, Default, Deserialize)]
pub struct HookQuery {
    pub hook_id: Option<String>,
    pub alert_name: Option<String>,
    pub instance: Option<String>,
    pub job: Option<String>,
    pub status: Option<String>,
    pub level: Option<String>,
    /// Hooks starting at or after this time
    pub starts_at: Option<DateTime<Utc>>,
    /// Hooks ended before this time
    pub ends_at: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl From<HookQuery> for HookFilter {
    fn from(query: HookQuery) -> Self {
        HookFilter {
            hook_id: query.hook_id,
            alert_name: query.alert_name,
            instance: query.instance,
            job: query.job,
            status: query.status,
            level: query.level,
            starts_at: query.starts_at,
            ends_at: query.ends_at,
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }
}

/// Accept an Alertmanager webhook envelope
pub async fn send(
    State(state): State<Arc<AppState>>,
    JsonBody(message): JsonBody<WebhookMessage>,
) -> Result<Json<Envelope<&'static str>>, ApiError> {
    info!(
        receiver = %message.receiver,
        status = %message.status,
        "Received {} alerts",
        message.alerts.len()
    );

    for alert in message.alerts {
        state.queue.enqueue(alert).await?;
    }

    Ok(success("ok"))
}

/// Accept a single ad-hoc notification
pub async fn noti(
    State(state): State<Arc<AppState>>,
    JsonOrForm(mut notification): JsonOrForm<Notification>,
) -> Result<Json<Envelope<&'static str>>, ApiError> {
    notification.normalize()?;
    if !state.targets.contains(&notification.level) {
        return Err(IntakeError::UnknownLevel(notification.level).into());
    }
    debug!(
        instance = %notification.instance,
        level = %notification.level,
        "Received notification {}",
        notification.alertname
    );

    let alert = notification.into_alert(&state.mapping, Utc::now());
    state.queue.enqueue(alert).await?;

    Ok(success("ok"))
}

/// Query hook history
pub async fn list(
    State(state): State<Arc<AppState>>,
    QueryParams(query): QueryParams<HookQuery>,
) -> Result<Json<Envelope<Vec<Hook>>>, ApiError> {
    let filter = HookFilter::from(query);
    let hooks = state.hooks.list_hooks(&filter).await?;
    Ok(success(hooks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_caps() {
        assert_eq!(HookFilter::from(HookQuery::default()).limit, DEFAULT_LIMIT);
        assert_eq!(
            HookFilter::from(HookQuery {
                limit: Some(10_000),
                ..Default::default()
            })
            .limit,
            MAX_LIMIT
        );
        assert_eq!(
            HookFilter::from(HookQuery {
                limit: Some(0),
                ..Default::default()
            })
            .limit,
            1
        );
    }
}
