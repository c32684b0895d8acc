use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use pma_protocol::TelemetryIngest;

use crate::{ingest, AppState};

/// Ingest one telemetry reading; the stored row is echoed back.
#[utoipa::path(
    post,
    path = "/telemetry",
    tag = "Ingestion",
    operation_id = "telemetry_ingest_doc",
    request_body = TelemetryIngest,
    responses(
        (status = 201, description = "Reading stored", body = serde_json::Value),
        (status = 500, description = "Storage failure", body = pma_protocol::ProblemDetails)
    )
)]
pub async fn ingest_telemetry(
    State(state): State<AppState>,
    Json(reading): Json<TelemetryIngest>,
) -> Response {
    match ingest::persist(&state, &reading).await {
        Ok(row) => {
            let body = serde_json::to_value(&row).unwrap_or_else(|_| json!({}));
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(err) => crate::responses::storage_error(&err),
    }
}
