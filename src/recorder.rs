//! Side-channel notifications about reconciled objects.
//!
//! When the controller gives up on a quota it tells a human through an
//! [`EventRecorder`] rather than failing the process. The binary records to
//! the log; tests capture events in memory.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Component name attached to every recorded event.
pub const COMPONENT: &str = "quota-queue-sync";

/// The object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRef {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn quota(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectRef {
            kind: "ResourceQuota",
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    pub object: ObjectRef,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub component: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Records events about objects.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &ObjectRef, event_type: EventType, reason: &str, message: &str);

    fn warning(&self, object: &ObjectRef, reason: &str, message: &str) {
        self.record(object, EventType::Warning, reason, message);
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, object: &ObjectRef, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => info!(object = %object, component = COMPONENT, reason, detail = message, "Event"),
            EventType::Warning => warn!(object = %object, component = COMPONENT, reason, detail = message, "Event"),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn warnings(&self) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == EventType::Warning)
            .collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &ObjectRef, event_type: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                object: object.clone(),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
                component: COMPONENT,
                timestamp: Utc::now(),
            });
    }
}
