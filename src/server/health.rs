//! Liveness endpoint.
//!
//! Answers 200 for as long as the HTTP server accepts connections. It says
//! nothing about whether controllers have synced or the store is reachable;
//! `/api/v1/state` reports that.

use axum::http::StatusCode;

/// Health check handler.
///
/// Returns 200 OK with the text "OK".
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
