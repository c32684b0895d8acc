use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

/// Service banner.
#[utoipa::path(
    get,
    path = "/",
    tag = "Meta",
    operation_id = "root_doc",
    description = "Service banner.",
    responses(
        (status = 200, description = "Banner", body = serde_json::Value)
    )
)]
pub async fn root() -> impl IntoResponse {
    crate::responses::json_ok(json!({"message": "Welcome to the Predictive Maintenance Platform"}))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Meta",
    operation_id = "health_doc",
    description = "Service liveness probe.",
    responses(
        (status = 200, description = "Service healthy", body = crate::openapi::HealthOk)
    )
)]
pub async fn health() -> impl IntoResponse {
    crate::responses::json_ok(json!({"status": "healthy"}))
}

/// Service metadata and endpoints index.
#[utoipa::path(
    get,
    path = "/about",
    tag = "Meta",
    operation_id = "about_doc",
    description = "Service metadata and endpoints index.",
    responses(
        (status = 200, description = "Service metadata", body = crate::openapi::AboutResponse)
    )
)]
pub async fn about(State(state): State<crate::AppState>) -> impl IntoResponse {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    let bind = std::env::var("PMA_BIND").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("PMA_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8091);
    let workflow_url = crate::util::env_nonempty("PMA_WORKFLOW_URL");
    crate::responses::json_ok(json!({
        "service": name,
        "version": version,
        "http": {"bind": bind, "port": port},
        "llm_configured": state.llm().is_configured(),
        "workflow_url": workflow_url,
        "policy": state.gate().snapshot(),
        "endpoints": state.endpoints(),
    }))
}
