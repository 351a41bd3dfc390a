//! In-memory queue store.
//!
//! Backs the binary when no cluster is attached and doubles as the test
//! store: failures can be injected per operation, and a store built with
//! [`InMemoryQueueStore::with_call_log`] records every call it serves. The
//! plain constructor keeps no log, so a long-running process does not grow.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::types::{QueueName, QueueResource};

use super::{QueueStore, Result, StoreError, StoreErrorKind};

/// A store operation, for call logs and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
    List,
}

impl StoreOp {
    pub fn is_mutation(&self) -> bool {
        matches!(self, StoreOp::Create | StoreOp::Update | StoreOp::Delete)
    }
}

/// One logged store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub name: Option<QueueName>,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<QueueName, QueueResource>,
    last_version: u64,
    /// `None` unless the log was requested.
    calls: Option<Vec<StoreCall>>,
    /// One-shot faults, consumed in order.
    next_faults: HashMap<StoreOp, VecDeque<StoreErrorKind>>,
    /// Faults returned until cleared.
    sticky_faults: HashMap<StoreOp, StoreErrorKind>,
}

impl StoreState {
    fn take_fault(&mut self, op: StoreOp) -> Option<StoreErrorKind> {
        if let Some(kind) = self.next_faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(kind);
        }
        self.sticky_faults.get(&op).copied()
    }

    /// Logs the call and returns the injected fault, if any.
    fn begin(&mut self, op: StoreOp, name: Option<&QueueName>) -> Option<StoreError> {
        if let Some(calls) = &mut self.calls {
            calls.push(StoreCall {
                op,
                name: name.cloned(),
            });
        }
        let kind = self.take_fault(op)?;
        let message = format!("injected {:?} fault", op);
        Some(match name {
            Some(name) => StoreError::new(kind, name.clone(), message),
            None => StoreError::store_wide(kind, message),
        })
    }

    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// A thread-safe map of queues with optimistic concurrency.
///
/// Cloning is cheap; clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store that records every call, for [`Self::calls`] and
    /// [`Self::mutation_count`].
    pub fn with_call_log() -> Self {
        let store = Self::default();
        store.lock().calls = Some(Vec::new());
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a queue directly, bypassing the call log. Returns the stored copy.
    pub fn seed(&self, mut queue: QueueResource) -> QueueResource {
        let mut state = self.lock();
        queue.resource_version = state.next_version();
        state.objects.insert(queue.name.clone(), queue.clone());
        queue
    }

    /// Makes the next call of `op` fail with `kind`. Calls queue up.
    pub fn fail_next(&self, op: StoreOp, kind: StoreErrorKind) {
        self.lock().next_faults.entry(op).or_default().push_back(kind);
    }

    /// Makes every call of `op` fail with `kind` until [`Self::clear_faults`].
    pub fn fail_always(&self, op: StoreOp, kind: StoreErrorKind) {
        self.lock().sticky_faults.insert(op, kind);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.next_faults.clear();
        state.sticky_faults.clear();
    }

    /// Every call made so far, in order. Empty unless the store was built
    /// with [`Self::with_call_log`].
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone().unwrap_or_default()
    }

    /// Number of create, update and delete calls attempted so far.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .flatten()
            .filter(|call| call.op.is_mutation())
            .count()
    }

    /// A copy of the stored queue, bypassing the call log.
    pub fn peek(&self, name: &QueueName) -> Option<QueueResource> {
        self.lock().objects.get(name).cloned()
    }

    /// A copy of every stored queue, bypassing the call log.
    pub fn snapshot(&self) -> BTreeMap<QueueName, QueueResource> {
        self.lock().objects.clone()
    }
}

impl QueueStore for InMemoryQueueStore {
    async fn get(&self, name: &QueueName) -> Result<QueueResource> {
        let mut state = self.lock();
        if let Some(err) = state.begin(StoreOp::Get, Some(name)) {
            return Err(err);
        }
        state
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(name.clone()))
    }

    async fn create(&self, mut queue: QueueResource) -> Result<QueueResource> {
        let mut state = self.lock();
        if let Some(err) = state.begin(StoreOp::Create, Some(&queue.name)) {
            return Err(err);
        }
        if state.objects.contains_key(&queue.name) {
            return Err(StoreError::already_exists(queue.name));
        }
        queue.resource_version = state.next_version();
        debug!(name = %queue.name, version = queue.resource_version, "Stored new queue");
        state.objects.insert(queue.name.clone(), queue.clone());
        Ok(queue)
    }

    async fn update(&self, mut queue: QueueResource) -> Result<QueueResource> {
        let mut state = self.lock();
        if let Some(err) = state.begin(StoreOp::Update, Some(&queue.name)) {
            return Err(err);
        }
        let stored_version = match state.objects.get(&queue.name) {
            Some(stored) => stored.resource_version,
            None => return Err(StoreError::not_found(queue.name)),
        };
        if stored_version != queue.resource_version {
            return Err(StoreError::conflict(
                queue.name,
                queue.resource_version,
                stored_version,
            ));
        }
        queue.resource_version = state.next_version();
        debug!(name = %queue.name, version = queue.resource_version, "Replaced queue");
        state.objects.insert(queue.name.clone(), queue.clone());
        Ok(queue)
    }

    async fn delete(&self, name: &QueueName) -> Result<()> {
        let mut state = self.lock();
        if let Some(err) = state.begin(StoreOp::Delete, Some(name)) {
            return Err(err);
        }
        match state.objects.remove(name) {
            Some(_) => {
                debug!(name = %name, "Removed queue");
                Ok(())
            }
            None => Err(StoreError::not_found(name.clone())),
        }
    }

    async fn list(&self) -> Result<Vec<QueueResource>> {
        let mut state = self.lock();
        if let Some(err) = state.begin(StoreOp::List, None) {
            return Err(err);
        }
        Ok(state.objects.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quantity, QueueSpec};

    fn queue(name: &str) -> QueueResource {
        QueueResource::new(
            QueueName::new(name),
            QueueSpec {
                weight: 1,
                capability: BTreeMap::from([("cpu".to_string(), Quantity::parse("4").unwrap())]),
                reclaimable: Some(false),
            },
        )
    }

    #[tokio::test]
    async fn create_assigns_version_and_rejects_duplicates() {
        let store = InMemoryQueueStore::new();
        let created = store.create(queue("q-a100")).await.unwrap();
        assert!(created.resource_version > 0);

        let err = store.create(queue("q-a100")).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryQueueStore::new();
        let err = store.get(&QueueName::new("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let store = InMemoryQueueStore::new();
        let mut stored = store.create(queue("q")).await.unwrap();
        let before = stored.resource_version;
        stored.spec.weight = 3;

        let updated = store.update(stored).await.unwrap();
        assert!(updated.resource_version > before);
        assert_eq!(store.peek(&QueueName::new("q")).unwrap().spec.weight, 3);
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let store = InMemoryQueueStore::new();
        let stored = store.create(queue("q")).await.unwrap();
        store.update(stored.clone()).await.unwrap();

        let err = store.update(stored).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_of_missing_queue_is_not_found() {
        let store = InMemoryQueueStore::new();
        let err = store.update(queue("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryQueueStore::new();
        store.seed(queue("q"));
        store.delete(&QueueName::new("q")).await.unwrap();

        let err = store.delete(&QueueName::new("q")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn list_is_ordered_by_name() {
        let store = InMemoryQueueStore::new();
        store.seed(queue("b-3090"));
        store.seed(queue("a-a100"));

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.name.to_string())
            .collect();
        assert_eq!(names, vec!["a-a100", "b-3090"]);
    }

    #[tokio::test]
    async fn one_shot_faults_are_consumed_in_order() {
        let store = InMemoryQueueStore::new();
        store.seed(queue("q"));
        store.fail_next(StoreOp::Get, StoreErrorKind::Transient);
        store.fail_next(StoreOp::Get, StoreErrorKind::Conflict);
        let name = QueueName::new("q");

        assert_eq!(store.get(&name).await.unwrap_err().kind, StoreErrorKind::Transient);
        assert_eq!(store.get(&name).await.unwrap_err().kind, StoreErrorKind::Conflict);
        assert!(store.get(&name).await.is_ok());
    }

    #[tokio::test]
    async fn sticky_faults_persist_until_cleared() {
        let store = InMemoryQueueStore::new();
        store.fail_always(StoreOp::List, StoreErrorKind::Transient);

        let err = store.list().await.unwrap_err();
        assert_eq!(err.name, None);
        assert!(store.list().await.is_err());

        store.clear_faults();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn call_log_counts_attempted_mutations() {
        let store = InMemoryQueueStore::with_call_log();
        let name = QueueName::new("q");
        let _ = store.get(&name).await;
        let _ = store.delete(&name).await;
        store.create(queue("q")).await.unwrap();

        assert_eq!(store.calls().len(), 3);
        assert_eq!(store.mutation_count(), 2);
        assert_eq!(
            store.calls()[0],
            StoreCall {
                op: StoreOp::Get,
                name: Some(name),
            }
        );
    }

    #[tokio::test]
    async fn plain_store_keeps_no_call_log() {
        let store = InMemoryQueueStore::new();
        let name = QueueName::new("q");
        store.create(queue("q")).await.unwrap();
        for _ in 0..100 {
            store.get(&name).await.unwrap();
            store.list().await.unwrap();
        }

        assert!(store.calls().is_empty());
        assert_eq!(store.mutation_count(), 0);
        assert!(store.lock().calls.is_none());
    }
}
