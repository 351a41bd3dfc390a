//! The source resource: a namespace quota with hard limits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::QueueName;
use super::quantity::Quantity;

/// A read-only view of a resource quota as delivered by the change feed.
///
/// `hard` is keyed by quota resource names such as `limits.cpu`,
/// `limits.memory` or `requests.nvidia.com/gpu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub hard: BTreeMap<String, Quantity>,
}

impl QuotaSnapshot {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        QuotaSnapshot {
            name: name.into(),
            namespace: namespace.into(),
            hard: BTreeMap::new(),
        }
    }

    /// Adds a hard limit. Intended for building fixtures.
    pub fn with_hard(mut self, resource: impl Into<String>, quantity: Quantity) -> Self {
        self.hard.insert(resource.into(), quantity);
        self
    }

    /// Returns the hard limit for `resource`, or zero when it is not set.
    pub fn hard_limit(&self, resource: &str) -> Quantity {
        self.hard.get(resource).cloned().unwrap_or_default()
    }

    /// The queue this quota is mirrored into.
    pub fn queue_name(&self) -> QueueName {
        QueueName::new(self.name.clone())
    }
}
