use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::AppState;

fn limit_from(q: &HashMap<String, String>, default: i64, max: i64) -> i64 {
    q.get("limit")
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(default)
        .clamp(1, max)
}

/// Recent audit ledger rows, newest first.
#[utoipa::path(
    get,
    path = "/state/audit",
    tag = "State",
    operation_id = "state_audit_doc",
    params(("limit" = Option<i64>, Query, description = "Max items (1-1000)")),
    responses(
        (status = 200, description = "Audit rows", body = serde_json::Value),
        (status = 500, description = "Storage failure", body = pma_protocol::ProblemDetails)
    )
)]
pub async fn state_audit(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let limit = limit_from(&q, 100, 1000);
    match state.kernel().list_audit_async(limit).await {
        Ok(items) => Json(json!({"count": items.len(), "items": items})).into_response(),
        Err(err) => crate::responses::storage_error(&err),
    }
}

/// Recent service bookings, newest first.
#[utoipa::path(
    get,
    path = "/state/bookings",
    tag = "State",
    operation_id = "state_bookings_doc",
    params(("limit" = Option<i64>, Query, description = "Max items (1-1000)")),
    responses(
        (status = 200, description = "Bookings", body = serde_json::Value),
        (status = 500, description = "Storage failure", body = pma_protocol::ProblemDetails)
    )
)]
pub async fn state_bookings(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let limit = limit_from(&q, 100, 1000);
    match state.kernel().list_bookings_async(limit).await {
        Ok(items) => Json(json!({"count": items.len(), "items": items})).into_response(),
        Err(err) => crate::responses::storage_error(&err),
    }
}

/// Recent telemetry for one vehicle, newest first.
#[utoipa::path(
    get,
    path = "/state/telemetry/{vehicle}",
    tag = "State",
    operation_id = "state_telemetry_doc",
    params(
        ("vehicle" = String, Path, description = "Vehicle id"),
        ("limit" = Option<i64>, Query, description = "Max items (1-1000)")
    ),
    responses(
        (status = 200, description = "Telemetry rows", body = serde_json::Value),
        (status = 500, description = "Storage failure", body = pma_protocol::ProblemDetails)
    )
)]
pub async fn state_telemetry(
    State(state): State<AppState>,
    Path(vehicle): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let limit = limit_from(&q, 100, 1000);
    match state.kernel().list_telemetry_for_async(&vehicle, limit).await {
        Ok(items) => Json(json!({"count": items.len(), "items": items})).into_response(),
        Err(err) => crate::responses::storage_error(&err),
    }
}
