//! Executes reconcile plans against the queue store.

use chrono::Local;
use tracing::{debug, info, instrument};

use crate::notify::Request;
use crate::store::QueueStore;
use crate::types::QueueResource;

use super::error::{ReconcileError, Result};
use super::plan::{CapabilityMapping, NoopReason, PlanContext, QueueAction, TIMESTAMP_FORMAT, UnchangedPolicy, plan};

/// What a successful reconcile did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated { changed: Vec<String> },
    Deleted,
    Skipped(NoopReason),
}

/// Converges queue resources onto quota requests.
///
/// Every call re-reads the stored queue, so a request can be replayed any
/// number of times and the end state only depends on the latest quota.
#[derive(Debug)]
pub struct Reconciler<S> {
    store: S,
    mapping: CapabilityMapping,
    unchanged: UnchangedPolicy,
}

impl<S: QueueStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Reconciler {
            store,
            mapping: CapabilityMapping::default(),
            unchanged: UnchangedPolicy::default(),
        }
    }

    pub fn with_mapping(mut self, mapping: CapabilityMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_unchanged_policy(mut self, unchanged: UnchangedPolicy) -> Self {
        self.unchanged = unchanged;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Brings the queue named by the request in line with the request.
    ///
    /// Store errors other than a missing queue on lookup are returned
    /// unchanged so the caller can retry.
    #[instrument(skip_all, fields(name = %request.quota.name, verb = %request.verb))]
    pub async fn sync(&self, request: &Request) -> Result<SyncOutcome> {
        let name = request.key();
        name.validate()
            .map_err(|e| ReconcileError::MalformedRequest(format!("queue name {:?}: {}", name.as_str(), e)))?;

        let observed = match self.store.get(&name).await {
            Ok(queue) => Some(queue),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let action = plan(
            request,
            observed.as_ref(),
            PlanContext {
                mapping: &self.mapping,
                unchanged: self.unchanged,
                stamp: &stamp,
            },
        );
        self.execute(action).await
    }

    async fn execute(&self, action: QueueAction) -> Result<SyncOutcome> {
        match action {
            QueueAction::Create(queue) => {
                let created = self.store.create(queue).await?;
                info!(
                    capability = %describe_capability(&created),
                    "Created queue"
                );
                Ok(SyncOutcome::Created)
            }
            QueueAction::Update { queue, changed } => {
                let updated = self.store.update(queue).await?;
                info!(
                    changed = ?changed,
                    capability = %describe_capability(&updated),
                    "Updated queue"
                );
                Ok(SyncOutcome::Updated { changed })
            }
            QueueAction::Delete(name) => {
                self.store.delete(&name).await?;
                info!("Deleted queue");
                Ok(SyncOutcome::Deleted)
            }
            QueueAction::Noop(reason) => {
                debug!(%reason, "Nothing to do");
                Ok(SyncOutcome::Skipped(reason))
            }
        }
    }
}

fn describe_capability(queue: &QueueResource) -> String {
    queue
        .spec
        .capability
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, Timelike};

    use crate::notify::Verb;
    use crate::store::{InMemoryQueueStore, StoreErrorKind, StoreOp};
    use crate::types::{Quantity, QueueName, QueueSpec, QuotaSnapshot, UPDATE_AT_LABEL};

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn quota() -> QuotaSnapshot {
        QuotaSnapshot::new("team-a100", "ml")
            .with_hard("limits.cpu", q("4"))
            .with_hard("limits.memory", q("8Gi"))
            .with_hard("requests.nvidia.com/gpu", q("2"))
    }

    fn reconciler() -> Reconciler<InMemoryQueueStore> {
        Reconciler::new(InMemoryQueueStore::with_call_log())
    }

    fn name() -> QueueName {
        QueueName::new("team-a100")
    }

    #[tokio::test]
    async fn add_creates_missing_queue() {
        let reconciler = reconciler();
        let outcome = reconciler.sync(&Request::new(quota(), Verb::Add)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Created);

        let store = reconciler.store();
        assert_eq!(store.mutation_count(), 1);
        let queue = store.peek(&name()).unwrap();
        assert_eq!(queue.spec.weight, 1);
        assert_eq!(queue.spec.reclaimable, Some(false));
        assert_eq!(queue.capability("cpu"), q("4"));
        assert_eq!(queue.capability("memory"), q("8Gi"));
        assert_eq!(queue.capability("nvidia.com/gpu"), q("2"));
    }

    #[tokio::test]
    async fn delete_of_missing_queue_makes_no_mutation() {
        let reconciler = reconciler();
        let outcome = reconciler.sync(&Request::new(quota(), Verb::Delete)).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped(NoopReason::AlreadyAbsent));
        assert_eq!(reconciler.store().mutation_count(), 0);
    }

    #[tokio::test]
    async fn delete_removes_existing_queue() {
        let reconciler = reconciler();
        reconciler.sync(&Request::new(quota(), Verb::Add)).await.unwrap();
        let outcome = reconciler.sync(&Request::new(quota(), Verb::Delete)).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Deleted);
        assert!(reconciler.store().snapshot().is_empty());
    }

    #[tokio::test]
    async fn update_rewrites_only_changed_capability() {
        let reconciler = reconciler();
        reconciler.store().seed(QueueResource::new(
            name(),
            QueueSpec {
                weight: 3,
                capability: [("cpu", "4000m"), ("memory", "1Gi"), ("nvidia.com/gpu", "2")]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), q(v)))
                    .collect(),
                reclaimable: Some(true),
            },
        ));

        let outcome = reconciler.sync(&Request::new(quota(), Verb::Update)).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                changed: vec!["memory".to_string()]
            }
        );

        let queue = reconciler.store().peek(&name()).unwrap();
        assert_eq!(queue.spec.capability["cpu"].as_str(), "4000m");
        assert_eq!(queue.capability("memory"), q("8Gi"));
        assert_eq!(queue.spec.reclaimable, Some(false));
        assert_eq!(queue.spec.weight, 3);
    }

    #[tokio::test]
    async fn repeated_sync_converges() {
        let reconciler = reconciler();
        let request = Request::new(quota(), Verb::Update);
        reconciler.sync(&request).await.unwrap();
        let first = reconciler.store().peek(&name()).unwrap();

        let outcome = reconciler.sync(&request).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated { changed: vec![] });
        let second = reconciler.store().peek(&name()).unwrap();
        assert_eq!(first.spec, second.spec);
    }

    #[tokio::test]
    async fn skip_policy_leaves_unchanged_queue_alone() {
        let reconciler = reconciler().with_unchanged_policy(UnchangedPolicy::Skip);
        let request = Request::new(quota(), Verb::Update);
        reconciler.sync(&request).await.unwrap();

        let outcome = reconciler.sync(&request).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(NoopReason::Unchanged));
        assert_eq!(reconciler.store().mutation_count(), 1);
    }

    #[tokio::test]
    async fn stamp_is_not_earlier_than_sync_start() {
        let reconciler = reconciler();
        let start = Local::now().naive_local().with_nanosecond(0).unwrap();
        reconciler.sync(&Request::new(quota(), Verb::Add)).await.unwrap();

        let queue = reconciler.store().peek(&name()).unwrap();
        let label = queue.label(UPDATE_AT_LABEL).unwrap();
        let stamped = NaiveDateTime::parse_from_str(label, TIMESTAMP_FORMAT).unwrap();
        assert!(stamped >= start);
    }

    #[tokio::test]
    async fn lookup_errors_other_than_not_found_propagate() {
        let reconciler = reconciler();
        reconciler.store().fail_next(StoreOp::Get, StoreErrorKind::Transient);

        let err = reconciler.sync(&Request::new(quota(), Verb::Delete)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(ref e) if e.kind == StoreErrorKind::Transient));
        assert_eq!(reconciler.store().mutation_count(), 0);
    }

    #[tokio::test]
    async fn create_failure_propagates() {
        let reconciler = reconciler();
        reconciler.store().fail_next(StoreOp::Create, StoreErrorKind::AlreadyExists);

        let err = reconciler.sync(&Request::new(quota(), Verb::Add)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(ref e) if e.kind == StoreErrorKind::AlreadyExists));
    }

    #[tokio::test]
    async fn invalid_name_is_malformed() {
        let reconciler = reconciler();
        let request = Request::new(QuotaSnapshot::new("Bad_Name-a100", "ml"), Verb::Add);

        let err = reconciler.sync(&request).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedRequest(_)));
        assert!(reconciler.store().calls().is_empty());
    }
}
