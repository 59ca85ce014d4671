use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Uniform error shape returned by REST handlers:
/// a status code plus a `{"success": false, "message": ...}` body.
pub type ApiError = (StatusCode, Json<Value>);

/// Build an API error response with the given status and message.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({
            "success": false,
            "message": message.into(),
        })),
    )
}

/// Log an unexpected error and map it to a generic 500 response.
/// The underlying error never reaches the client.
pub fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    tracing::error!(error = %err, "internal server error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
