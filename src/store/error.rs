//! Queue store error types.
//!
//! The reconciler needs to tell "the object is not there" apart from every
//! other failure, and the retry policy needs to know which failures are worth
//! retrying:
//!
//! - **NotFound** drives the create-if-absent and idempotent-delete paths
//! - **AlreadyExists** and **Conflict** mean another writer got there first;
//!   a retry re-reads the object and converges
//! - **Transient** covers outages and timeouts

use std::fmt;
use thiserror::Error;

use crate::types::QueueName;

/// The kind of store error, categorized for reconcile and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    AlreadyExists,

    /// The update carried a stale resource version.
    Conflict,

    Transient,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::NotFound => "not found",
            StoreErrorKind::AlreadyExists => "already exists",
            StoreErrorKind::Conflict => "conflict",
            StoreErrorKind::Transient => "transient",
        }
    }
}

/// A failed store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct StoreError {
    pub kind: StoreErrorKind,

    /// The queue the call was about; `None` for whole-store calls.
    pub name: Option<QueueName>,

    /// A human-readable description of the error.
    pub message: String,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "queue {} {}: {}", name, self.kind.as_str(), self.message),
            None => write!(f, "queue store {}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, name: QueueName, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            name: Some(name),
            message: message.into(),
        }
    }

    /// An error not tied to a single queue, such as a failed listing.
    pub fn store_wide(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            name: None,
            message: message.into(),
        }
    }

    pub fn not_found(name: QueueName) -> Self {
        Self::new(StoreErrorKind::NotFound, name, "no such queue")
    }

    pub fn already_exists(name: QueueName) -> Self {
        Self::new(StoreErrorKind::AlreadyExists, name, "queue already exists")
    }

    pub fn conflict(name: QueueName, expected: u64, actual: u64) -> Self {
        Self::new(
            StoreErrorKind::Conflict,
            name,
            format!("resource version {} is stale, stored version is {}", expected, actual),
        )
    }

    pub fn transient(name: QueueName, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, name, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }
}
