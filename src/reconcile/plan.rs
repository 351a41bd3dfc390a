//! Pure reconcile planning.
//!
//! Given a request and the queue currently stored under its name (if any),
//! [`plan`] decides the single store action that converges the queue onto
//! the quota. No I/O happens here; [`super::Reconciler`] executes the plan.
//!
//! | Observed | Verb          | Action                         |
//! |----------|---------------|--------------------------------|
//! | absent   | Delete        | nothing (already absent)       |
//! | absent   | Add / Update  | create                         |
//! | present  | Delete        | delete                         |
//! | present  | Add / Update  | update (or nothing, see below) |
//!
//! Updates start from the observed object, so fields this controller does not
//! own (weight, unrelated labels, extra capabilities) survive.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::notify::{Request, Verb};
use crate::types::{DEFAULT_WEIGHT, QueueName, QueueResource, QueueSpec, UPDATE_AT_LABEL};

/// GPU resource mirrored by default.
pub const DEFAULT_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Format of the `updateAt` label value, in local time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Maps one quota hard limit onto one queue capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    /// Key in the quota's `hard` map.
    pub source: String,
    /// Key in the queue's `capability` map.
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        FieldMapping {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// The set of quota limits mirrored into queue capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityMapping {
    fields: Vec<FieldMapping>,
}

impl CapabilityMapping {
    /// CPU and memory limits plus the requested amount of `gpu_resource`.
    pub fn for_gpu(gpu_resource: &str) -> Self {
        CapabilityMapping {
            fields: vec![
                FieldMapping::new("limits.cpu", "cpu"),
                FieldMapping::new("limits.memory", "memory"),
                FieldMapping::new(format!("requests.{}", gpu_resource), gpu_resource),
            ],
        }
    }

    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }
}

impl Default for CapabilityMapping {
    fn default() -> Self {
        Self::for_gpu(DEFAULT_GPU_RESOURCE)
    }
}

/// What to do when an Add or Update finds nothing to change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnchangedPolicy {
    /// Write anyway so the `updateAt` label records the sync.
    #[default]
    Heartbeat,

    /// Leave the stored queue alone.
    Skip,
}

#[derive(Debug, Error)]
#[error("unknown unchanged policy {0:?}, expected \"heartbeat\" or \"skip\"")]
pub struct UnknownPolicy(pub String);

impl FromStr for UnchangedPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heartbeat" => Ok(UnchangedPolicy::Heartbeat),
            "skip" => Ok(UnchangedPolicy::Skip),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// Why a plan performs no store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopReason {
    /// Delete of a queue that does not exist.
    AlreadyAbsent,

    /// Nothing differs and [`UnchangedPolicy::Skip`] is in effect.
    Unchanged,
}

impl fmt::Display for NoopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoopReason::AlreadyAbsent => write!(f, "already absent"),
            NoopReason::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// The store action a reconcile performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    Create(QueueResource),

    /// Full replace of the observed queue.
    Update {
        queue: QueueResource,
        /// Capability keys whose value changed.
        changed: Vec<String>,
    },

    Delete(QueueName),

    Noop(NoopReason),
}

/// Inputs to [`plan`] besides the request and the observed queue.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub mapping: &'a CapabilityMapping,
    pub unchanged: UnchangedPolicy,
    /// Value for the `updateAt` label.
    pub stamp: &'a str,
}

/// Decides how to converge the stored queue onto the requested quota.
pub fn plan(request: &Request, observed: Option<&QueueResource>, ctx: PlanContext<'_>) -> QueueAction {
    match (observed, request.verb) {
        (None, Verb::Delete) => QueueAction::Noop(NoopReason::AlreadyAbsent),
        (None, Verb::Add | Verb::Update) => QueueAction::Create(desired_queue(request, ctx)),
        (Some(queue), Verb::Delete) => QueueAction::Delete(queue.name.clone()),
        (Some(queue), Verb::Add | Verb::Update) => plan_update(request, queue, ctx),
    }
}

fn desired_queue(request: &Request, ctx: PlanContext<'_>) -> QueueResource {
    let capability = ctx
        .mapping
        .fields()
        .iter()
        .map(|field| (field.target.clone(), request.quota.hard_limit(&field.source)))
        .collect();
    let mut queue = QueueResource::new(
        request.key(),
        QueueSpec {
            weight: DEFAULT_WEIGHT,
            capability,
            reclaimable: Some(false),
        },
    );
    queue.set_label(UPDATE_AT_LABEL, ctx.stamp);
    queue
}

fn plan_update(request: &Request, observed: &QueueResource, ctx: PlanContext<'_>) -> QueueAction {
    let mut queue = observed.clone();
    let mut changed = Vec::new();

    for field in ctx.mapping.fields() {
        let desired = request.quota.hard_limit(&field.source);
        // An absent capability reads as zero.
        if observed.capability(&field.target) != desired {
            queue.spec.capability.insert(field.target.clone(), desired);
            changed.push(field.target.clone());
        }
    }

    let reclaimable_ok = observed.spec.reclaimable == Some(false);
    if changed.is_empty() && reclaimable_ok && ctx.unchanged == UnchangedPolicy::Skip {
        return QueueAction::Noop(NoopReason::Unchanged);
    }

    queue.spec.reclaimable = Some(false);
    queue.set_label(UPDATE_AT_LABEL, ctx.stamp);
    QueueAction::Update { queue, changed }
}
