//! The target resource: a scheduler queue owned by this controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::QueueName;
use super::quantity::Quantity;

/// Label stamped with the local time of the last sync.
pub const UPDATE_AT_LABEL: &str = "updateAt";

/// Weight given to every queue this controller creates.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Desired scheduling properties of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub weight: u32,

    /// Resource name (`cpu`, `memory`, `nvidia.com/gpu`) to quantity.
    #[serde(default)]
    pub capability: BTreeMap<String, Quantity>,

    /// Whether other queues may reclaim this queue's idle resources.
    ///
    /// `None` means the field was never set on the stored object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaimable: Option<bool>,
}

/// A queue resource as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueResource {
    pub name: QueueName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Optimistic concurrency token assigned by the store.
    ///
    /// Zero on objects that have not been persisted yet. An update carrying a
    /// version other than the stored one is rejected as a conflict.
    #[serde(default)]
    pub resource_version: u64,

    pub spec: QueueSpec,
}

impl QueueResource {
    /// Creates an unpersisted queue with no labels.
    pub fn new(name: QueueName, spec: QueueSpec) -> Self {
        QueueResource {
            name,
            labels: None,
            resource_version: 0,
            spec,
        }
    }

    /// Returns a label value if the label set exists and contains `key`.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.as_ref()?.get(key).map(String::as_str)
    }

    /// Sets a label, creating the label set if it is absent.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }

    /// Returns the capability for `resource`, or zero when it is not set.
    pub fn capability(&self, resource: &str) -> Quantity {
        self.spec
            .capability
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }
}
