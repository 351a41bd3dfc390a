//! Reconcile requests produced by the event filter.

use std::sync::Arc;

use crate::types::{QueueName, QuotaSnapshot};

use super::events::Verb;

/// A unit of reconcile work.
///
/// Requests are queued under [`Request::key`], the logical queue name. When
/// several notifications for the same name arrive before a worker picks the
/// key up, only the latest request survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub quota: Arc<QuotaSnapshot>,
    pub verb: Verb,
}

impl Request {
    pub fn new(quota: impl Into<Arc<QuotaSnapshot>>, verb: Verb) -> Self {
        Request {
            quota: quota.into(),
            verb,
        }
    }

    /// The deduplication key for this request.
    pub fn key(&self) -> QueueName {
        self.quota.queue_name()
    }
}
