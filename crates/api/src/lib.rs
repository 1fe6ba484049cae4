//! Hook Relay API Server
//!
//! HTTP intake for alerts and notifications, mute rule administration, and
//! the wiring that connects configuration, storage, the mute cache, and the
//! dispatch worker pool.

use alerting::{FieldMapping, Renderer};
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use dispatch::{DispatchQueue, HttpTransport, Pipeline, PoolConfig, TargetRegistry, WorkerPool};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use mute::MuteCache;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{HookStore, MuteRuleStore, SqliteStore};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod error;
pub mod extract;
pub mod routes;
pub mod settings;

pub use error::ApiError;
pub use settings::Settings;

/// Application state shared across handlers
pub struct AppState {
    /// Producer side of the dispatch queue
    pub queue: DispatchQueue,
    pub renderer: Arc<Renderer>,
    pub mute: Arc<MuteCache>,
    pub hooks: Arc<dyn HookStore>,
    pub mute_store: Arc<dyn MuteRuleStore>,
    pub targets: TargetRegistry,
    pub mapping: FieldMapping,
    /// Template reloaded by the reload endpoint
    pub template_path: Option<PathBuf>,
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

/// Create the application router, mounted under `base_path`
pub fn create_router(state: Arc<AppState>, base_path: &str) -> Router {
    let routes = Router::new()
        .route("/hook", get(routes::hooks::list))
        .route("/hook/send", post(routes::hooks::send))
        .route("/hook/noti", post(routes::hooks::noti))
        .route(
            "/hook/ignore",
            get(routes::mute::list)
                .post(routes::mute::upsert)
                .delete(routes::mute::delete),
        )
        .route("/hook/template/reload", post(routes::system::reload_template))
        .route(
            "/hook/test",
            get(routes::system::loopback_get).post(routes::system::loopback_post),
        )
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics));

    let base_path = base_path.trim_end_matches('/');
    let router = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(base_path, routes)
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Initialize logging
pub fn init_logging(log: &settings::LogSettings) -> anyhow::Result<()> {
    let level = log.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if log.format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("Failed to set tracing subscriber")
}

/// Open storage, warm the mute cache, and start the worker pool
pub async fn build_state(
    settings: &Settings,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<(Arc<AppState>, WorkerPool)> {
    let webhook = &settings.webhook;
    let mapping = FieldMapping::from_maps(&webhook.labels, &webhook.annotations);

    let renderer = Arc::new(Renderer::new(
        mapping.clone(),
        settings.time_zone(),
        webhook.time_format.clone(),
    )?);
    if let Some(path) = &webhook.template {
        if let Err(e) = renderer.load_from_path(path) {
            error!("Cannot load template, using built-in default: {}", e);
        }
    }

    let store = Arc::new(
        SqliteStore::connect(&settings.database.url, settings.database.max_connections)
            .await
            .context("Failed to open database")?,
    );
    store.migrate().await.context("Failed to create schema")?;

    let mute = Arc::new(MuteCache::new(store.clone()));
    match mute.refresh().await {
        Ok(count) => info!("Loaded {} mute rules", count),
        Err(e) => warn!("Initial mute rule load failed: {}", e),
    }
    mute.spawn_refresh_loop(webhook.cache_sync_interval());

    let targets = TargetRegistry::new(webhook.targets.clone());
    if targets.is_empty() {
        warn!("No targets configured; alerts will be stored but not forwarded");
    }
    let transport = Arc::new(HttpTransport::new(webhook.timeout())?);

    let pipeline = Arc::new(Pipeline::new(
        targets.clone(),
        renderer.clone(),
        mute.clone(),
        store.clone(),
        transport,
        mapping.clone(),
    ));
    let (queue, pool) = WorkerPool::start(
        PoolConfig {
            workers: webhook.workers,
            queue_capacity: webhook.queue_capacity,
        },
        pipeline,
    );

    let state = Arc::new(AppState {
        queue,
        renderer,
        mute,
        hooks: store.clone(),
        mute_store: store,
        targets,
        mapping,
        template_path: webhook.template.clone(),
        metrics,
        version: env!("CARGO_PKG_VERSION").to_string(),
        start_time: std::time::Instant::now(),
    });

    Ok((state, pool))
}

/// Run the server
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    let (state, _pool) = build_state(&settings, Some(metrics)).await?;
    let app = create_router(state, &settings.server.base_path);

    info!(
        "Starting hook relay on {}{}",
        settings.server.addr, settings.server.base_path
    );

    let listener = tokio::net::TcpListener::bind(&settings.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::{parse_timezone, DEFAULT_TIME_FORMAT};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use dispatch::{ForwardError, ForwardRequest, Target, Transport};
    use serde_json::{json, Value};
    use std::time::Duration;
    use storage::{Hook, HookDetail, MemoryStore};
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingTransport {
        requests: std::sync::Mutex<Vec<ForwardRequest>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: &ForwardRequest) -> Result<(), ForwardError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        state: Arc<AppState>,
        router: Router,
    }

    fn harness_with_template(template_path: Option<PathBuf>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let mapping = FieldMapping::default();
        let renderer = Arc::new(
            Renderer::new(mapping.clone(), parse_timezone("").unwrap(), DEFAULT_TIME_FORMAT).unwrap(),
        );
        let mute = Arc::new(MuteCache::new(store.clone()));
        let targets: TargetRegistry = [(
            "critical".to_string(),
            Target::new("http://chat.local/send", "POST", "text=[[message]]"),
        )]
        .into_iter()
        .collect();

        let pipeline = Arc::new(Pipeline::new(
            targets.clone(),
            renderer.clone(),
            mute.clone(),
            store.clone(),
            transport.clone(),
            mapping.clone(),
        ));
        let (queue, _pool) = WorkerPool::start(PoolConfig::default(), pipeline);

        let state = Arc::new(AppState {
            queue,
            renderer,
            mute,
            hooks: store.clone(),
            mute_store: store.clone(),
            targets,
            mapping,
            template_path,
            metrics: None,
            version: "test".to_string(),
            start_time: std::time::Instant::now(),
        });
        let router = create_router(state.clone(), "/webhook");

        Harness {
            store,
            transport,
            state,
            router,
        }
    }

    fn harness() -> Harness {
        harness_with_template(None)
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn form_request(method: Method, uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_hooks(store: &MemoryStore, count: usize) {
        for _ in 0..200 {
            if store.hook_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} hooks, found {}", count, store.hook_count());
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = call(&h.router, get("/webhook/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["queue"]["capacity"], 100);
        assert_eq!(body["targets"], json!(["critical"]));
    }

    #[tokio::test]
    async fn test_routes_require_base_path() {
        let h = harness();
        let response = h.router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_enqueues_alerts() {
        let h = harness();
        let envelope = json!({
            "receiver": "relay",
            "status": "firing",
            "alerts": [{
                "status": "firing",
                "labels": {
                    "alertname": "node_cpu_usage",
                    "instance": "pmm-server",
                    "job": "linux",
                    "level": "critical"
                },
                "annotations": {"summary": "CPU usage high", "description": "cpu > 90%"},
                "startsAt": "2019-02-13T13:43:41.825Z",
                "endsAt": "0001-01-01T00:00:00Z"
            }]
        });

        let (status, body) = call(&h.router, json_request(Method::POST, "/webhook/hook/send", envelope)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success", "result": "ok"}));

        wait_for_hooks(&h.store, 1).await;
        let hooks = h.store.list_hooks(&Default::default()).await.unwrap();
        assert_eq!(hooks[0].status, "firing");
        assert_eq!(hooks[0].ends_at, None);
        assert!(!hooks[0].ignored);
    }

    #[tokio::test]
    async fn test_send_rejects_malformed_body() {
        let h = harness();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhook/hook/send")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = call(&h.router, request).await;
        assert_eq!(status, StatusCode::EXPECTATION_FAILED);
        assert_eq!(body["status"], "fail");
        assert!(body["result"].as_str().map_or(false, |msg| !msg.is_empty()));
    }

    #[tokio::test]
    async fn test_list_rejects_bad_query() {
        let h = harness();
        let (status, body) = call(&h.router, get("/webhook/hook?limit=abc")).await;

        assert_eq!(status, StatusCode::EXPECTATION_FAILED);
        assert_eq!(body["status"], "fail");
        assert!(body["result"].as_str().map_or(false, |msg| !msg.is_empty()));
    }

    #[tokio::test]
    async fn test_noti_level_matches_any_case() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            form_request(Method::POST, "/webhook/hook/noti", "instance=db-1&level=CRITICAL&message=hi"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        for _ in 0..200 {
            if !h.transport.requests.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.transport.requests.lock().unwrap().len(), 1);
        assert_eq!(h.store.hook_count(), 1);
    }

    #[tokio::test]
    async fn test_noti_form_is_stored_resolved() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            form_request(
                Method::POST,
                "/webhook/hook/noti",
                "instance=pmm-server&level=critical&message=deploy+finished",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        wait_for_hooks(&h.store, 1).await;
        let hooks = h.store.list_hooks(&Default::default()).await.unwrap();
        assert_eq!(hooks[0].status, "resolved");
        assert_eq!(hooks[0].alert_name, "unknown");
        assert_eq!(hooks[0].job, "noti");
    }

    #[tokio::test]
    async fn test_noti_validation() {
        let h = harness();

        let (status, body) = call(
            &h.router,
            json_request(Method::POST, "/webhook/hook/noti", json!({"level": "critical", "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::EXPECTATION_FAILED);
        assert_eq!(body, json!({"status": "fail", "result": "instance empty"}));

        let (status, body) = call(
            &h.router,
            json_request(
                Method::POST,
                "/webhook/hook/noti",
                json!({"instance": "db-1", "level": "debug", "message": "hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::EXPECTATION_FAILED);
        assert_eq!(body["result"], "level 'debug' not in target");
    }

    #[tokio::test]
    async fn test_ignore_lifecycle() {
        let h = harness();

        let (status, body) = call(
            &h.router,
            json_request(Method::POST, "/webhook/hook/ignore", json!({"instance": "pmm-server", "forever": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["alert_name"], "*");
        assert_eq!(h.state.mute.len(), 1);

        let (_, body) = call(&h.router, get("/webhook/hook/ignore")).await;
        assert_eq!(body["result"].as_array().map(Vec::len), Some(1));

        let (status, body) = call(
            &h.router,
            form_request(Method::DELETE, "/webhook/hook/ignore", "instance=pmm-server"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], 1);
        assert!(h.state.mute.is_empty());
    }

    #[tokio::test]
    async fn test_muted_alert_not_forwarded() {
        let h = harness();
        call(
            &h.router,
            json_request(Method::POST, "/webhook/hook/ignore", json!({"instance": "pmm-server", "forever": true})),
        )
        .await;

        call(
            &h.router,
            form_request(
                Method::POST,
                "/webhook/hook/noti",
                "instance=pmm-server&level=critical&message=quiet",
            ),
        )
        .await;

        wait_for_hooks(&h.store, 1).await;
        let hooks = h.store.list_hooks(&Default::default()).await.unwrap();
        assert!(hooks[0].ignored);
        assert!(h.transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_hooks_with_filters() {
        let h = harness();
        for (id, instance) in [("h1", "db-1"), ("h2", "db-2")] {
            let starts_at = Utc.with_ymd_and_hms(2019, 2, 13, 13, 43, 41).unwrap();
            let hook = Hook {
                hook_id: id.to_string(),
                alert_name: "node_cpu_usage".to_string(),
                instance: instance.to_string(),
                job: "linux".to_string(),
                level: "critical".to_string(),
                ignored: false,
                status: "firing".to_string(),
                starts_at,
                ends_at: None,
                updated_at: starts_at,
                hook_details: vec![HookDetail {
                    id: 0,
                    hook_id: id.to_string(),
                    status: "firing".to_string(),
                    req_json: "{}".to_string(),
                    message: "m".to_string(),
                    created_at: starts_at,
                }],
            };
            h.store.upsert_hook(&hook, &[]).await.unwrap();
        }

        let (status, body) = call(&h.router, get("/webhook/hook?instance=db-2")).await;
        assert_eq!(status, StatusCode::OK);
        let hooks = body["result"].as_array().unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0]["hook_id"], "h2");
        assert_eq!(hooks[0]["hook_details"].as_array().map(Vec::len), Some(1));

        let (_, body) = call(&h.router, get("/webhook/hook?limit=1")).await;
        assert_eq!(body["result"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_template_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message.hbs");
        std::fs::write(&path, "{{alertname}} on {{instance}}").unwrap();

        let h = harness_with_template(Some(path.clone()));
        let (status, _) = call(&h.router, form_request(Method::POST, "/webhook/hook/template/reload", "")).await;
        assert_eq!(status, StatusCode::OK);

        std::fs::write(&path, "{{#if}}broken").unwrap();
        let (status, body) = call(&h.router, form_request(Method::POST, "/webhook/hook/template/reload", "")).await;
        assert_eq!(status, StatusCode::EXPECTATION_FAILED);
        assert_eq!(body["status"], "fail");

        let alert = alerting::Alert::firing(Utc::now())
            .with_label("alertname", "cpu")
            .with_label("instance", "db-1");
        assert_eq!(h.state.renderer.render(&alert, "fp"), "cpu on db-1");
    }

    #[tokio::test]
    async fn test_loopback() {
        let h = harness();

        let (status, body) = call(&h.router, get("/webhook/hook/test?message=hello+there")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "hello there");

        let (_, body) = call(&h.router, form_request(Method::POST, "/webhook/hook/test", "message=%5Bfiring%5D")).await;
        assert_eq!(body["result"], "[firing]");
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let h = harness();
        let response = h.router.clone().oneshot(get("/webhook/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
