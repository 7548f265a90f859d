//! HTTP surface and process wiring.
//!
//! Routes:
//! - `GET /ws`: browser WebSocket (see [`crate::transport`])
//! - `GET /api/health`: liveness probe
//! - `GET /api/reflectors`: directory listing
//! - `GET /api/reflectors/modules?slug=`: modules for one reflector
//! - `GET /metrics`: Prometheus exposition

mod cors;

pub use cors::{origin_allowed, parse_origin_rules, OriginRule};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::GatewayMetrics;
use crate::reflector::{
    DirectoryReflectorFactory, DirectoryStore, ReflectorFactory, ReflectorInfo,
};
use crate::session::{SessionConfig, SessionManager};
use crate::transport::ws_handler;

/// Interval of the heartbeat tick re-anchoring the session gauge.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub directory: Arc<DirectoryStore>,
    pub factory: Arc<dyn ReflectorFactory>,
    pub metrics: Arc<GatewayMetrics>,
    pub server_name: String,
    pub origin_rules: Arc<Vec<OriginRule>>,
    pub allowed_methods: String,
    pub allowed_headers: String,
    pub ping_interval: Duration,
    pub pong_wait: Duration,
}

impl AppState {
    /// Assemble production state from configuration, starting the directory
    /// refresh and heartbeat tasks rooted on `cancel`.
    pub fn from_config(config: &Config, cancel: &CancellationToken) -> Result<Self> {
        let metrics = Arc::new(
            GatewayMetrics::new().map_err(|e| Error::Config(format!("metrics: {e}")))?,
        );

        let directory = Arc::new(DirectoryStore::new(config.reflector.host_file.clone()));
        let _ = Arc::clone(&directory)
            .spawn_refresh_task(config.reflector.refresh_interval, cancel.child_token());

        let lookup: Arc<dyn crate::reflector::DirectoryLookup> = Arc::clone(&directory) as Arc<dyn crate::reflector::DirectoryLookup>;
        let factory: Arc<dyn ReflectorFactory> = Arc::new(DirectoryReflectorFactory::new(lookup));

        let session_config = SessionConfig {
            max_sessions: config.server.max_sessions,
            ..SessionConfig::default()
        };
        let manager = Arc::new(SessionManager::new(session_config, Arc::clone(&metrics)));

        spawn_heartbeat(Arc::clone(&manager), Arc::clone(&metrics), cancel.child_token());

        Ok(Self {
            manager,
            directory,
            factory,
            metrics,
            server_name: config.server.server_name.clone(),
            origin_rules: Arc::new(parse_origin_rules(&config.server.allowed_origins)),
            allowed_methods: config.server.allowed_methods.join(", "),
            allowed_headers: config.server.allowed_headers.join(", "),
            ping_interval: config.websocket.ping_interval,
            pong_wait: config.websocket.pong_wait,
        })
    }
}

fn spawn_heartbeat(
    manager: Arc<SessionManager>,
    metrics: Arc<GatewayMetrics>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => metrics.record_heartbeat(manager.count()),
            }
        }
    });
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .route("/api/reflectors", get(list_reflectors))
        .route("/api/reflectors/modules", get(list_modules))
        .route("/metrics", get(export_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), cors_layer))
        .with_state(state)
}

/// Run the gateway until the process receives ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let cancel = CancellationToken::new();
    let state = AppState::from_config(&config, &cancel)?;
    let app = router(state);

    let listener = TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "M17 gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(err = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    cancel.cancel();
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_reflectors(State(state): State<AppState>) -> Json<Vec<ReflectorInfo>> {
    Json(state.directory.reflectors())
}

async fn list_modules(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match params.get("slug").filter(|s| !s.is_empty()) {
        Some(slug) => {
            use crate::reflector::DirectoryLookup;
            Json(state.directory.fetch_modules(slug)).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "missing slug").into_response(),
    }
}

async fn export_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(err = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// CORS layer mirroring the configured rules on every response.
async fn cors_layer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let preflight = req.method() == Method::OPTIONS;
    let mut res = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = res.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    if let Some(origin) = origin {
        if origin_allowed(&state.origin_rules, &origin) {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
    if let Ok(value) = HeaderValue::from_str(&state.allowed_methods) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&state.allowed_headers) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
    }

    res
}
