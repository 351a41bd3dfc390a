//! Quota to queue reconciliation.
//!
//! # Module Structure
//!
//! - [`plan`]: pure decision of the store action for a request
//! - [`reconciler`]: executes plans against a [`crate::store::QueueStore`]
//! - [`error`]: reconcile failures and their retriability

pub mod error;
pub mod plan;
pub mod reconciler;

pub use error::{ReconcileError, Result};
pub use plan::{
    CapabilityMapping, DEFAULT_GPU_RESOURCE, FieldMapping, NoopReason, PlanContext, QueueAction,
    TIMESTAMP_FORMAT, UnchangedPolicy, UnknownPolicy, plan,
};
pub use reconciler::{Reconciler, SyncOutcome};
