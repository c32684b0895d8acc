use std::sync::Arc;

use axum::http::HeaderValue;
use pma_events::Bus;
use pma_kernel::Kernel;
use pma_policy::Gate;
use serde_json::json;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    ingest,
    llm::CompletionClient,
    router::build_router,
    tasks::{TaskHandle, TaskManager},
    util,
};

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
    pub background_tasks: TaskManager,
}

pub(crate) async fn build() -> BootstrapOutput {
    let bus = Bus::new(256);
    let kernel = Kernel::open(&util::state_dir()).expect("init kernel");
    let gate = Arc::new(Gate::load_from_env());
    let llm = CompletionClient::from_env();
    if !llm.is_configured() {
        warn!("completion backend not configured; handlers will serve fallback payloads");
    }
    info!(
        enforce = util::env_truthy("PMA_POLICY_ENFORCE"),
        "permission gate loaded"
    );

    let (router, endpoints) = build_router();
    let state = AppState::new(bus, kernel, gate, llm, Arc::new(endpoints));

    state.bus().publish(
        pma_topics::TOPIC_SERVICE_START,
        &json!({
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    );

    let mut background_tasks = TaskManager::new();
    if let Some(addr) = util::env_nonempty("PMA_INGEST_BIND") {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(%addr, "telemetry stream listener active");
                let listener_state = state.clone();
                background_tasks.push(TaskHandle::new(
                    "telemetry.listener",
                    tokio::spawn(async move {
                        ingest::run_listener(listener_state, listener).await;
                    }),
                ));
            }
            Err(err) => {
                error!(%addr, error = %err, "telemetry stream listener failed to bind");
                state.bus().publish(
                    pma_topics::TOPIC_SERVICE_HEALTH,
                    &json!({
                        "status": "degraded",
                        "component": "telemetry.listener",
                        "reason": "bind_failed",
                        "error": err.to_string(),
                    }),
                );
            }
        }
    }

    BootstrapOutput {
        router,
        state,
        background_tasks,
    }
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

fn cors_layer() -> CorsLayer {
    match util::env_nonempty("PMA_CORS_ORIGINS") {
        None => CorsLayer::permissive(),
        Some(raw) if raw.trim() == "*" => CorsLayer::permissive(),
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|origin| {
                    let origin = origin.trim();
                    if origin.is_empty() {
                        return None;
                    }
                    match origin.parse::<HeaderValue>() {
                        Ok(value) => Some(value),
                        Err(_) => {
                            warn!(%origin, "ignoring unparsable CORS origin");
                            None
                        }
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid PMA_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid PMA_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid PMA_BIND: {0}")]
    InvalidBind(String),
}

#[derive(Debug)]
pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config_from_env() -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = std::env::var("PMA_HTTP_MAX_CONC")
        .ok()
        .map(|raw| {
            raw.parse()
                .map_err(|_| HttpConfigError::InvalidConcurrency(raw))
        })
        .transpose()? // Option<Result> -> Result<Option>
        .unwrap_or(1024);

    let bind = std::env::var("PMA_BIND").unwrap_or_else(|_| "127.0.0.1".into());
    let port_raw = std::env::var("PMA_PORT").unwrap_or_else(|_| "8091".into());
    let port: u16 = port_raw
        .parse()
        .map_err(|_| HttpConfigError::InvalidPort(port_raw))?;

    let addr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind.clone()))?;

    Ok(HttpConfig {
        addr,
        concurrency_limit,
    })
}

pub(crate) fn ensure_openapi_export() -> Result<Option<String>, std::io::Error> {
    if let Ok(path) = std::env::var("OPENAPI_OUT") {
        export_openapi(&path)?;
        return Ok(Some(path));
    }
    Ok(None)
}

fn export_openapi(path: &str) -> Result<(), std::io::Error> {
    use utoipa::OpenApi as _;

    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let doc = crate::openapi::ApiDoc::openapi()
        .to_pretty_json()
        .map_err(std::io::Error::other)?;
    std::fs::write(path, doc)
}
