use utoipa::{OpenApi, ToSchema};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthOk {
    pub status: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HttpInfo {
    pub bind: String,
    pub port: u16,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct AboutResponse {
    pub service: String,
    pub version: String,
    pub http: HttpInfo,
    pub llm_configured: bool,
    #[schema(nullable, value_type = Option<String>)]
    pub workflow_url: Option<String>,
    #[schema(value_type = serde_json::Value)]
    pub policy: serde_json::Value,
    #[schema(example = json!(["GET /health", "POST /agent/chat"]))]
    pub endpoints: Vec<String>,
}

#[allow(dead_code)]
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::meta::root,
        crate::api::meta::health,
        crate::api::meta::about,
        crate::api::telemetry::ingest_telemetry,
        crate::api::chat::chat,
        crate::api::state::state_audit,
        crate::api::state::state_bookings,
        crate::api::state::state_telemetry,
    ),
    components(schemas(
        HealthOk,
        HttpInfo,
        AboutResponse,
        crate::api::chat::ChatRequest,
        pma_protocol::TelemetryIngest,
        pma_protocol::ProblemDetails,
    )),
    tags(
        (name = "Meta", description = "Service metadata and health"),
        (name = "Ingestion", description = "Telemetry intake"),
        (name = "Agent", description = "Master router and handlers"),
        (name = "State", description = "Read-models over the store")
    )
)]
pub struct ApiDoc;
