use std::time::Duration;

use serde_json::json;
use tracing::{error, info};

mod agents;
mod api;
mod app_state;
mod audit;
mod bootstrap;
mod ingest;
mod llm;
mod openapi;
mod responses;
mod router;
mod tasks;
#[cfg(test)]
mod test_support;
mod util;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    match bootstrap::ensure_openapi_export() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: failed to write generated OPENAPI_OUT: {err}");
            std::process::exit(2);
        }
    }

    pma_otel::init();
    let bootstrap::BootstrapOutput {
        router,
        state,
        background_tasks,
    } = bootstrap::build().await;

    let http_cfg = match bootstrap::http_config_from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let app = bootstrap::attach_http_layers(
        router.with_state(state.clone()),
        http_cfg.concurrency_limit,
    );

    let listener = tokio::net::TcpListener::bind(http_cfg.addr)
        .await
        .expect("bind server socket");
    info!(addr = %http_cfg.addr, "http server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    state.bus().publish(
        pma_topics::TOPIC_SERVICE_STOP,
        &json!({ "service": env!("CARGO_PKG_NAME") }),
    );
    info!("shutting down background tasks");
    background_tasks
        .shutdown_with_grace(Duration::from_secs(5))
        .await;
}

async fn shutdown_signal() {
    info!("shutdown signal listener active");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod http_tests {
    use super::*;
    use crate::{
        router::{self, paths},
        test_support::{self, env},
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::util::ServiceExt;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn test_app() -> (Router, test_support::TestContext) {
        let ctx = test_support::test_state().await;
        let (router, _endpoints) = router::build_router();
        (router.with_state(ctx.state.clone()), ctx)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn response_json(resp: axum::response::Response) -> Value {
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let (app, _ctx) = test_app().await;
        let resp = app.oneshot(get_req(paths::HEALTH)).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn root_serves_welcome_banner() {
        let (app, _ctx) = test_app().await;
        let resp = app.oneshot(get_req(paths::ROOT)).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["message"], "Welcome to the Predictive Maintenance Platform");
    }

    #[tokio::test]
    async fn about_reports_surface_and_backends() {
        let mut guard = env::guard();
        guard.remove("PMA_WORKFLOW_URL");
        guard.remove("PMA_BIND");
        guard.remove("PMA_PORT");
        let tmp = tempfile::tempdir().expect("tempdir");
        let kernel = pma_kernel::Kernel::open(tmp.path()).expect("open kernel");
        let (router, endpoints) = router::build_router();
        let state = AppState::new(
            pma_events::Bus::new(64),
            kernel,
            Arc::new(pma_policy::Gate::with_config(Default::default())),
            crate::llm::CompletionClient::unconfigured(),
            Arc::new(endpoints),
        );
        let app = router.with_state(state);

        let resp = app.oneshot(get_req(paths::ABOUT)).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["service"], "pma-server");
        assert_eq!(body["llm_configured"], false);
        assert_eq!(body["workflow_url"], Value::Null);
        assert_eq!(body["http"]["port"], 8091);
        let listed: Vec<&str> = body["endpoints"]
            .as_array()
            .expect("endpoints array")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(listed.contains(&"POST /agent/chat"));
        assert!(listed.contains(&"GET /state/telemetry/{vehicle}"));
        assert!(body["policy"]["grants"]["data_analysis"].is_array());
    }

    #[tokio::test]
    async fn telemetry_ingest_roundtrip() {
        let (app, _ctx) = test_app().await;
        let payload =
            serde_json::to_value(test_support::sample_telemetry("VH-HTTP-1")).expect("payload");

        let resp = app
            .clone()
            .oneshot(post_json(paths::TELEMETRY, &payload))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = response_json(resp).await;
        assert_eq!(body["vehicle_id"], "VH-HTTP-1");
        assert!(body["id"].as_i64().is_some());

        let resp = app
            .clone()
            .oneshot(get_req("/state/telemetry/VH-HTTP-1"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["items"][0]["vehicle_id"], "VH-HTTP-1");

        let resp = app
            .oneshot(get_req("/state/telemetry/VH-OTHER"))
            .await
            .expect("response");
        let body = response_json(resp).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn state_listings_start_empty() {
        let (app, _ctx) = test_app().await;

        let resp = app
            .clone()
            .oneshot(get_req("/state/audit?limit=5"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["count"], 0);
        assert!(body["items"].as_array().expect("items").is_empty());

        let resp = app
            .oneshot(get_req(paths::STATE_BOOKINGS))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn chat_reports_unconfigured_backend() {
        let mut guard = env::guard();
        guard.remove("PMA_WORKFLOW_URL");
        let (app, _ctx) = test_app().await;

        let resp = app
            .oneshot(post_json(
                paths::AGENT_CHAT,
                &json!({"query": "how is my car doing"}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["error"], "completion backend not configured");
    }

    #[tokio::test]
    async fn chat_rejects_malformed_request() {
        let mut guard = env::guard();
        guard.remove("PMA_WORKFLOW_URL");
        let (app, _ctx) = test_app().await;

        let resp = app
            .oneshot(post_json(paths::AGENT_CHAT, &json!({"context": {"a": 1}})))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = response_json(resp).await;
        assert_eq!(body["title"], "Bad Request");
    }

    #[tokio::test]
    async fn chat_forwards_to_workflow_when_configured() {
        let mut guard = env::guard();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .and(body_json(json!({"query": "route me"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"handled": true, "source": "workflow"})),
            )
            .mount(&server)
            .await;
        guard.set("PMA_WORKFLOW_URL", format!("{}/process", server.uri()));
        let (app, _ctx) = test_app().await;

        let resp = app
            .oneshot(post_json(paths::AGENT_CHAT, &json!({"query": "route me"})))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["handled"], true);
        assert_eq!(body["source"], "workflow");
    }

    #[tokio::test]
    async fn chat_surfaces_workflow_error_status() {
        let mut guard = env::guard();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        guard.set("PMA_WORKFLOW_URL", format!("{}/process", server.uri()));
        let (app, _ctx) = test_app().await;

        let resp = app
            .oneshot(post_json(paths::AGENT_CHAT, &json!({"query": "route me"})))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["error"], "workflow service error");
        assert_eq!(body["status"], 500);
    }

    #[tokio::test]
    async fn chat_reports_unreachable_workflow() {
        let mut guard = env::guard();
        guard.set("PMA_WORKFLOW_URL", "http://127.0.0.1:9/process");
        let (app, _ctx) = test_app().await;

        let resp = app
            .oneshot(post_json(paths::AGENT_CHAT, &json!({"query": "route me"})))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = response_json(resp).await;
        assert_eq!(body["error"], "workflow service unreachable");
    }
}
