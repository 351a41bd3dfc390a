//! Controller state endpoints.
//!
//! Read-only views of every registered controller: sync status, queue depth,
//! per-key requeue counters and the queues each controller currently owns.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::controller::ControllerStatus;

/// Errors from the state endpoints, rendered as plain-text responses.
#[derive(Debug, Error)]
pub enum StateError {
    /// No controller is registered under the requested name (404).
    #[error("controller not found: {0}")]
    NotFound(String),
}

impl IntoResponse for StateError {
    fn into_response(self) -> Response {
        let status = match &self {
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

/// Lists the status of every controller.
///
/// ```ignore
/// GET /api/v1/state HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// [{"name":"resource-quota-controller","synced":true,"workers":1,
///   "queue":{"queued":0,"processing":0,"requeues":{},"shutting_down":false},
///   "objects":[...]}]
/// ```
pub async fn state_handler(State(app_state): State<AppState>) -> Json<Vec<ControllerStatus>> {
    Json(app_state.registry().statuses().await)
}

/// Returns the status of one controller, or 404.
pub async fn controller_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ControllerStatus>, StateError> {
    let controller = app_state
        .registry()
        .get(&name)
        .ok_or_else(|| StateError::NotFound(name.clone()))?;
    Ok(Json(controller.status().await))
}
