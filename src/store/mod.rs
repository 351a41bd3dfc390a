//! Typed client for queue resources.
//!
//! The reconciler talks to storage only through [`QueueStore`], so a real
//! cluster client, the in-memory store and test doubles are interchangeable.

use std::future::Future;

use crate::types::{QueueName, QueueResource};

pub mod error;
pub mod memory;

pub use error::{StoreError, StoreErrorKind};
pub use memory::{InMemoryQueueStore, StoreCall, StoreOp};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Reads and writes queue resources by name.
pub trait QueueStore: Send + Sync {
    /// Fetches a queue. Absence is reported as [`StoreErrorKind::NotFound`].
    fn get(&self, name: &QueueName) -> impl Future<Output = Result<QueueResource>> + Send;

    /// Persists a new queue and returns it with its assigned resource version.
    fn create(&self, queue: QueueResource) -> impl Future<Output = Result<QueueResource>> + Send;

    /// Replaces a stored queue.
    ///
    /// The queue's `resource_version` must match the stored one, otherwise the
    /// call fails with [`StoreErrorKind::Conflict`].
    fn update(&self, queue: QueueResource) -> impl Future<Output = Result<QueueResource>> + Send;

    fn delete(&self, name: &QueueName) -> impl Future<Output = Result<()>> + Send;

    /// All stored queues, ordered by name.
    fn list(&self) -> impl Future<Output = Result<Vec<QueueResource>>> + Send;
}
