//! The worker loop and failure handling.
//!
//! Each worker repeatedly takes one key from the queue, reconciles it in a
//! child task and resolves the result against the retry policy. The key is
//! released through an [`crate::workqueue::InFlight`] guard, so it is marked
//! done even if the worker itself is torn down mid-item. A panicking reconcile
//! only fails its child task; the worker sees [`ReconcileError::Panicked`] and
//! carries on.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::notify::{ChangeFeed, Request};
use crate::reconcile::{ReconcileError, SyncOutcome};
use crate::recorder::ObjectRef;
use crate::store::QueueStore;
use crate::types::QueueName;
use crate::workqueue::Decision;

use super::quota::QuotaController;

impl<S, F> QuotaController<S, F>
where
    S: QueueStore + 'static,
    F: ChangeFeed + 'static,
{
    pub(super) async fn run_worker(self: Arc<Self>, id: usize) {
        debug!(controller = %self.name, worker = id, "Worker started");
        while self.process_next_work_item().await {}
        debug!(controller = %self.name, worker = id, "Worker stopped");
    }

    /// Handles one queued item. Returns false once the queue is closed.
    pub(crate) async fn process_next_work_item(&self) -> bool {
        let Some((key, request)) = self.queue.get().await else {
            return false;
        };
        let _in_flight = self.queue.in_flight(key.clone());

        let reconciler = Arc::clone(&self.reconciler);
        let task_request = request.clone();
        let result = tokio::spawn(async move { reconciler.sync(&task_request).await })
            .await
            .unwrap_or_else(|e| Err(ReconcileError::from_join(e)));

        self.handle_result(&key, request, result);
        true
    }

    /// Applies the outcome of one reconcile to the queue.
    ///
    /// Success forgets the key's requeue counter. Failures go through the
    /// retry policy: requeue with backoff, drop with a warning event once the
    /// budget is spent, or discard requests that can never succeed.
    pub(crate) fn handle_result(
        &self,
        key: &QueueName,
        request: Request,
        result: Result<SyncOutcome, ReconcileError>,
    ) {
        let err = match result {
            Ok(outcome) => {
                trace!(name = %key, ?outcome, "Reconciled");
                self.queue.forget(key);
                return;
            }
            Err(err) => err,
        };

        let attempt = self.queue.num_requeues(key);
        match self.policy.should_retry(key, attempt, &err) {
            Decision::Requeue => {
                let delay = self.queue.add_rate_limited(key.clone(), request);
                debug!(
                    name = %key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Reconcile failed, requeuing"
                );
            }
            Decision::Drop => {
                let reason = format!(
                    "{} queue for resource quota {}",
                    request.verb, request.quota.name
                );
                let message = format!("{} failed for {}", reason, err);
                let object = ObjectRef::quota(&request.quota.namespace, &request.quota.name);
                self.recorder.warning(&object, &reason, &message);
                warn!(
                    name = %key,
                    attempts = attempt,
                    error = %err,
                    "Retry budget exhausted, dropping quota from the queue"
                );
                self.queue.forget(key);
            }
            Decision::Discard => {
                error!(name = %key, error = %err, "Discarding request that cannot succeed");
                self.queue.forget(key);
            }
        }
    }
}

