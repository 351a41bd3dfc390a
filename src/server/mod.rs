//! HTTP surface for operators.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the server is running
//! - `GET /api/v1/state` - Status of every registered controller as JSON
//! - `GET /api/v1/controllers/{name}` - Status of one controller

use std::sync::Arc;

use crate::controller::ControllerRegistry;

pub mod health;
pub mod state;

pub use health::health_handler;
pub use state::{controller_handler, state_handler};

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<ControllerRegistry>,
}

impl AppState {
    /// Creates state serving the controllers of `registry`.
    pub fn new(registry: Arc<ControllerRegistry>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { registry }),
        }
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.inner.registry
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/state", get(state_handler))
        .route("/api/v1/controllers/{name}", get(controller_handler))
        .with_state(app_state)
}
