use std::time::Duration;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;
use utoipa::ToSchema;

use crate::{agents, AppState};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    #[schema(value_type = serde_json::Value)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Route a free-text request through the master router, or forward it to an
/// external workflow service when `PMA_WORKFLOW_URL` is set.
#[utoipa::path(
    post,
    path = "/agent/chat",
    tag = "Agent",
    operation_id = "agent_chat_doc",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Routing decision and handler result", body = serde_json::Value),
        (status = 400, description = "Malformed request", body = pma_protocol::ProblemDetails),
        (status = 500, description = "Storage failure", body = pma_protocol::ProblemDetails)
    )
)]
pub async fn chat(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    // Workflow mode forwards the body verbatim, before any local validation.
    if let Some(url) = crate::util::env_nonempty("PMA_WORKFLOW_URL") {
        return crate::responses::json_ok(forward_to_workflow(&url, &body).await);
    }
    let request: ChatRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(err) => return crate::responses::bad_request(format!("invalid chat request: {}", err)),
    };
    match agents::master::process_request(
        &state,
        &request.query,
        &request.context,
        request.session_id.as_deref(),
    )
    .await
    {
        Ok(result) => crate::responses::json_ok(result),
        Err(err) => crate::responses::storage_error(&err),
    }
}

/// Upstream JSON passes through unmodified; transport problems surface as the
/// documented `{error, …}` payloads at HTTP 200.
async fn forward_to_workflow(url: &str, body: &Value) -> Value {
    let timeout = crate::util::env_u64("PMA_HTTP_TIMEOUT_SECS", 20);
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            return json!({"error": "workflow service unreachable", "detail": err.to_string()})
        }
    };
    match client.post(url).json(body).send().await {
        Ok(resp) => {
            let status = resp.status();
            if !status.is_success() {
                warn!(%url, status = status.as_u16(), "workflow service returned an error");
                return json!({"error": "workflow service error", "status": status.as_u16()});
            }
            match resp.json::<Value>().await {
                Ok(upstream) => upstream,
                Err(err) => {
                    json!({"error": "workflow service unreachable", "detail": err.to_string()})
                }
            }
        }
        Err(err) => {
            warn!(%url, error = %err, "workflow service unreachable");
            json!({"error": "workflow service unreachable", "detail": err.to_string()})
        }
    }
}
