//! Per-alert Pipeline

use alerting::{fingerprint, Alert, AlertIdentity, AlertStatus, FieldMapping, Renderer, NOTI_JOB};
use chrono::{DateTime, Utc};
use mute::{MuteCache, MuteQuery};
use std::sync::Arc;
use storage::{Hook, HookColumn, HookDetail, HookStore};
use tracing::{debug, error, info, warn};

use crate::{TargetRegistry, Transport};

/// Conflict columns for an open alert: keep the stored row, append details
const KEY_ONLY: &[HookColumn] = &[HookColumn::HookId];

const ALL_COLUMNS: &[HookColumn] = &HookColumn::ALL;

/// How a single alert left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    /// Persisted with `ignored` set, not forwarded
    Muted,
    /// Persisted, no target for the level
    NoRoute,
    /// Status not acted on; nothing persisted
    Skipped,
    ForwardFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Muted => "muted",
            Outcome::NoRoute => "no_route",
            Outcome::Skipped => "skipped",
            Outcome::ForwardFailed => "forward_failed",
        }
    }
}

/// Render, mute check, persist, forward
pub struct Pipeline {
    targets: TargetRegistry,
    renderer: Arc<Renderer>,
    mute: Arc<MuteCache>,
    hooks: Arc<dyn HookStore>,
    transport: Arc<dyn Transport>,
    mapping: FieldMapping,
}

impl Pipeline {
    pub fn new(
        targets: TargetRegistry,
        renderer: Arc<Renderer>,
        mute: Arc<MuteCache>,
        hooks: Arc<dyn HookStore>,
        transport: Arc<dyn Transport>,
        mapping: FieldMapping,
    ) -> Self {
        Self {
            targets,
            renderer,
            mute,
            hooks,
            transport,
            mapping,
        }
    }

    /// Run one alert to completion. Never fails; every error is logged here.
    pub async fn process(&self, alert: Alert) -> Outcome {
        let outcome = self.run(alert).await;
        metrics::counter!("hook_relay_alerts_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    async fn run(&self, alert: Alert) -> Outcome {
        let identity = alert.identity(&self.mapping);
        let target = self.targets.get(&identity.level);
        let hook_id = fingerprint(&alert, &self.mapping);
        let message = self.renderer.render(&alert, &hook_id);
        let now = Utc::now();

        let ignored = self.mute.is_muted(&MuteQuery {
            instance: &identity.instance,
            alert_name: &identity.alertname,
            job: &identity.job,
            status: alert.status.as_str(),
        });

        let mut hook = build_hook(&alert, &identity, hook_id, ignored, &message, now);
        let Some(columns) = finalize(&mut hook, &alert, &identity, now) else {
            warn!(hook_id = %hook.hook_id, status = %alert.status, "Unhandled alert status, skipping");
            return Outcome::Skipped;
        };

        if let Err(e) = self.hooks.upsert_hook(&hook, columns).await {
            error!(
                hook_id = %hook.hook_id,
                error = %e,
                hook = %to_json(&hook),
                "Failed to persist hook"
            );
        }

        if ignored {
            info!(
                hook_id = %hook.hook_id,
                "Muted [{}][{}][{}][{}]",
                identity.instance, identity.alertname, identity.job, alert.status
            );
            return Outcome::Muted;
        }

        let Some(target) = target else {
            warn!(hook_id = %hook.hook_id, level = %identity.level, "No target for level, not forwarding");
            return Outcome::NoRoute;
        };

        let request = match target.request(&message) {
            Ok(request) => request,
            Err(e) => {
                metrics::counter!("hook_relay_forward_failures_total").increment(1);
                error!(url = %target.api, error = %e, hook = %to_json(&hook), "Cannot build forward request");
                return Outcome::ForwardFailed;
            }
        };

        match self.transport.send(&request).await {
            Ok(()) => {
                debug!(hook_id = %hook.hook_id, url = %target.api, "Forwarded");
                Outcome::Forwarded
            }
            Err(e) => {
                metrics::counter!("hook_relay_forward_failures_total").increment(1);
                error!(url = %target.api, error = %e, hook = %to_json(&hook), "Forward failed");
                Outcome::ForwardFailed
            }
        }
    }
}

fn build_hook(
    alert: &Alert,
    identity: &AlertIdentity,
    hook_id: String,
    ignored: bool,
    message: &str,
    now: DateTime<Utc>,
) -> Hook {
    let req_json = serde_json::to_string(alert).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize alert");
        String::new()
    });

    Hook {
        hook_details: vec![HookDetail {
            id: 0,
            hook_id: hook_id.clone(),
            status: alert.status.as_str().to_string(),
            req_json,
            message: message.to_string(),
            created_at: now,
        }],
        hook_id,
        alert_name: identity.alertname.clone(),
        instance: identity.instance.clone(),
        job: identity.job.clone(),
        level: identity.level.clone(),
        ignored,
        status: alert.status.as_str().to_string(),
        starts_at: alert.starts_at,
        ends_at: alert.ends_at,
        updated_at: now,
    }
}

/// Apply the status rules to the hook and pick the conflict columns.
///
/// `None` means the status is not persisted or forwarded.
fn finalize(
    hook: &mut Hook,
    alert: &Alert,
    identity: &AlertIdentity,
    now: DateTime<Utc>,
) -> Option<&'static [HookColumn]> {
    match &alert.status {
        // One-shot notifications have no resolution phase.
        AlertStatus::Firing if identity.job == NOTI_JOB => {
            hook.status = AlertStatus::Resolved.as_str().to_string();
            hook.ends_at = alert.ends_at.or(Some(now));
            Some(ALL_COLUMNS)
        }
        AlertStatus::Firing => {
            hook.ends_at = None;
            Some(KEY_ONLY)
        }
        AlertStatus::Resolved => {
            hook.ends_at = alert.ends_at.or(Some(now));
            Some(ALL_COLUMNS)
        }
        AlertStatus::Other(_) => None,
    }
}

fn to_json(hook: &Hook) -> String {
    serde_json::to_string(hook).unwrap_or_else(|e| format!("<unserializable hook: {}>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ForwardError, ForwardRequest, Target};
    use alerting::{parse_timezone, Notification, DEFAULT_TIME_FORMAT};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use storage::{MemoryStore, MuteRuleSpec};

    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<ForwardRequest>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn requests(&self) -> Vec<ForwardRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: &ForwardRequest) -> Result<(), ForwardError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ForwardError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        mute: Arc<MuteCache>,
        transport: Arc<RecordingTransport>,
        pipeline: Pipeline,
    }

    fn fixture_with(targets: TargetRegistry, transport: RecordingTransport) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mute = Arc::new(MuteCache::new(store.clone()));
        let transport = Arc::new(transport);
        let renderer = Arc::new(
            Renderer::new(FieldMapping::default(), parse_timezone("").unwrap(), DEFAULT_TIME_FORMAT).unwrap(),
        );
        let pipeline = Pipeline::new(
            targets,
            renderer,
            mute.clone(),
            store.clone(),
            transport.clone(),
            FieldMapping::default(),
        );
        Fixture {
            store,
            mute,
            transport,
            pipeline,
        }
    }

    fn critical_targets(method: &str) -> TargetRegistry {
        [(
            "critical".to_string(),
            Target::new("http://chat.local/send", method, "text=[[message]]"),
        )]
        .into_iter()
        .collect()
    }

    fn fixture() -> Fixture {
        fixture_with(critical_targets("POST"), RecordingTransport::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 2, 13, 13, 43, 41).unwrap()
    }

    fn cpu_alert() -> Alert {
        Alert::firing(t0())
            .with_label("alertname", "node_cpu_usage")
            .with_label("instance", "pmm-server")
            .with_label("job", "linux")
            .with_label("level", "critical")
            .with_annotation("summary", "CPU usage high")
            .with_annotation("description", "cpu > 90%")
    }

    #[tokio::test]
    async fn test_firing_alert_forwarded_and_stored_open() {
        let f = fixture();
        let mut alert = cpu_alert();
        alert.ends_at = Some(t0() + Duration::hours(1));

        assert_eq!(f.pipeline.process(alert.clone()).await, Outcome::Forwarded);

        let hook_id = fingerprint(&alert, &FieldMapping::default());
        let hook = f.store.hook(&hook_id).unwrap();
        assert!(!hook.ignored);
        assert_eq!(hook.status, "firing");
        assert_eq!(hook.ends_at, None);
        assert_eq!(hook.hook_details.len(), 1);
        assert!(hook.hook_details[0].message.starts_with("[firing] CPU usage high"));

        let requests = f.transport.requests();
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ForwardRequest::Post { url, form } => {
                assert_eq!(url, "http://chat.local/send");
                assert!(form.starts_with("text=%5Bfiring%5D+CPU+usage+high"));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_instance_mute_persists_ignored_without_forward() {
        let f = fixture();
        f.mute
            .upsert(MuteRuleSpec {
                instance: "pmm-server".to_string(),
                alert_name: "*".to_string(),
                job: "*".to_string(),
                status: "*".to_string(),
                forever: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(f.pipeline.process(cpu_alert()).await, Outcome::Muted);

        let hook = f.store.hook(&fingerprint(&cpu_alert(), &FieldMapping::default())).unwrap();
        assert!(hook.ignored);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_global_mute_suppresses_everything() {
        let f = fixture();
        f.mute
            .upsert(MuteRuleSpec {
                forever: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let other = cpu_alert().with_label("instance", "db-7");
        assert_eq!(f.pipeline.process(other).await, Outcome::Muted);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_firing_accumulates_details() {
        let f = fixture();
        f.pipeline.process(cpu_alert()).await;
        f.pipeline.process(cpu_alert()).await;

        assert_eq!(f.store.hook_count(), 1);
        assert_eq!(f.store.detail_count(), 2);
        assert_eq!(f.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_resolved_closes_same_row() {
        let f = fixture();
        f.pipeline.process(cpu_alert()).await;

        let mut resolved = cpu_alert();
        resolved.status = AlertStatus::Resolved;
        resolved.ends_at = Some(t0() + Duration::minutes(2));
        assert_eq!(f.pipeline.process(resolved.clone()).await, Outcome::Forwarded);

        let hook = f.store.hook(&fingerprint(&resolved, &FieldMapping::default())).unwrap();
        assert_eq!(f.store.hook_count(), 1);
        assert_eq!(hook.status, "resolved");
        assert_eq!(hook.ends_at, resolved.ends_at);
        let statuses: Vec<&str> = hook.hook_details.iter().map(|d| d.status.as_str()).collect();
        assert_eq!(statuses, vec!["firing", "resolved"]);
    }

    #[tokio::test]
    async fn test_resolved_without_end_uses_now() {
        let f = fixture();
        let mut resolved = cpu_alert();
        resolved.status = AlertStatus::Resolved;

        f.pipeline.process(resolved.clone()).await;
        let hook = f.store.hook(&fingerprint(&resolved, &FieldMapping::default())).unwrap();
        assert!(hook.ends_at.is_some());
    }

    #[tokio::test]
    async fn test_noti_is_stored_resolved() {
        let f = fixture();
        let now = t0();
        let mut noti = Notification {
            instance: "pmm-server".to_string(),
            level: "critical".to_string(),
            message: "deploy finished".to_string(),
            ..Default::default()
        };
        noti.normalize().unwrap();
        let alert = noti.into_alert(&FieldMapping::default(), now);

        assert_eq!(f.pipeline.process(alert.clone()).await, Outcome::Forwarded);

        let hook = f.store.hook(&fingerprint(&alert, &FieldMapping::default())).unwrap();
        assert_eq!(hook.status, "resolved");
        assert_eq!(hook.job, NOTI_JOB);
        assert_eq!(hook.ends_at, Some(now));
    }

    #[tokio::test]
    async fn test_unknown_status_skipped() {
        let f = fixture();
        let mut alert = cpu_alert();
        alert.status = AlertStatus::from("pending");

        assert_eq!(f.pipeline.process(alert).await, Outcome::Skipped);
        assert_eq!(f.store.hook_count(), 0);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_method_still_persists() {
        let f = fixture_with(critical_targets("PUT"), RecordingTransport::default());

        assert_eq!(f.pipeline.process(cpu_alert()).await, Outcome::ForwardFailed);
        assert_eq!(f.store.hook_count(), 1);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_no_route_still_persists() {
        let f = fixture();
        let alert = cpu_alert().with_label("level", "info");

        assert_eq!(f.pipeline.process(alert).await, Outcome::NoRoute);
        assert_eq!(f.store.hook_count(), 1);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_reported() {
        let f = fixture_with(
            critical_targets("POST"),
            RecordingTransport {
                fail: true,
                ..Default::default()
            },
        );

        assert_eq!(f.pipeline.process(cpu_alert()).await, Outcome::ForwardFailed);
        assert_eq!(f.store.hook_count(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_forward() {
        let f = fixture();
        f.store.set_unavailable(true);

        assert_eq!(f.pipeline.process(cpu_alert()).await, Outcome::Forwarded);
        assert_eq!(f.transport.requests().len(), 1);
    }
}
