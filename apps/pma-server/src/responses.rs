use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// RFC 7807 problem+json body in the shape shared by every error surface.
pub fn problem(
    status: StatusCode,
    title: &str,
    detail: Option<String>,
) -> axum::response::Response {
    let mut body = json!({
        "type": "about:blank",
        "title": title,
        "status": status.as_u16(),
    });
    if let Some(detail) = detail {
        body["detail"] = json!(detail);
    }
    (status, Json(body)).into_response()
}

pub fn storage_error(err: &anyhow::Error) -> axum::response::Response {
    problem(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Storage Error",
        Some(err.to_string()),
    )
}

pub fn bad_request(detail: impl Into<String>) -> axum::response::Response {
    problem(StatusCode::BAD_REQUEST, "Bad Request", Some(detail.into()))
}

pub fn json_ok(payload: serde_json::Value) -> axum::response::Response {
    (StatusCode::OK, Json(payload)).into_response()
}
