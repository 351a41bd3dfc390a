//! Work queue infrastructure for the reconcile loop.
//!
//! # Module Structure
//!
//! - [`queue`]: deduplicating keyed queue with delayed requeue and shutdown
//! - [`backoff`]: exponential per-key backoff
//! - [`bucket`]: overall token bucket shared by all keys
//! - [`policy`]: retry-or-drop decisions for failed items

pub mod backoff;
pub mod bucket;
pub mod policy;
pub mod queue;

pub use backoff::BackoffConfig;
pub use bucket::BucketConfig;
pub use policy::{Decision, MaxRequeuePolicy, Retriable, RetryPolicy};
pub use queue::{AddOutcome, InFlight, QueueStats, WorkQueue};
