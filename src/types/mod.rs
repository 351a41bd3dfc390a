//! Core domain types for the quota sync controller.
//!
//! This module contains the source (quota) and target (queue) resource models
//! plus the quantity type both are expressed in.

pub mod ids;
pub mod quantity;
pub mod queue;
pub mod quota;

// Re-export commonly used types at the module level
pub use ids::{InvalidName, QueueName};
pub use quantity::{Quantity, QuantityError};
pub use queue::{DEFAULT_WEIGHT, QueueResource, QueueSpec, UPDATE_AT_LABEL};
pub use quota::QuotaSnapshot;
