//! Controllers and the registry that runs them.
//!
//! A controller owns a change feed, a work queue and a pool of workers. The
//! binary builds a [`ControllerRegistry`] at startup, registers every
//! controller by name, and runs them all until shutdown.
//!
//! # Module Structure
//!
//! - [`quota`]: the quota to queue controller
//! - [`worker`]: the worker loop and failure handling
//! - [`registry`]: named registration and supervised run
//! - [`config`]: environment configuration

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::QueueResource;
use crate::workqueue::QueueStats;

pub mod config;
pub mod quota;
pub mod registry;
pub mod worker;


pub use config::{ConfigError, ControllerConfig};
pub use quota::{QUOTA_CONTROLLER_NAME, QuotaController};
pub use registry::ControllerRegistry;

/// Errors that stop a controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller {0} is already registered")]
    DuplicateController(String),

    /// The feed closed before the watch cache reported sync.
    #[error("controller {0}: cache never synced before the change feed closed")]
    CacheSyncFailed(String),

    /// `run` was called on a controller whose feed is already consumed.
    #[error("controller {0} was already started")]
    AlreadyStarted(String),

    #[error("controller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Point-in-time view of a controller, served by the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub name: String,

    /// Whether the watch cache has synced and workers are running.
    pub synced: bool,

    pub workers: usize,

    pub queue: QueueStats,

    /// Objects owned by this controller, as currently stored.
    pub objects: Vec<QueueResource>,

    /// Set when the objects could not be listed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_error: Option<String>,
}

/// A named, long-running reconcile loop.
#[async_trait]
pub trait Controller: Send + Sync {
    fn name(&self) -> &str;

    async fn status(&self) -> ControllerStatus;

    /// Runs until `shutdown` is cancelled or the controller fails.
    ///
    /// Can be called once per controller.
    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()>;
}
