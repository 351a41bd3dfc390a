//! The quota to queue controller.
//!
//! Notifications flow feed → filter → work queue → workers → reconciler.
//! Until the feed reports [`FeedEvent::Synced`] notifications are filtered and
//! queued but no worker runs, so nothing is reconciled against a partial view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::notify::{ChangeFeed, EventFilter, FeedEvent, Notification, Request};
use crate::reconcile::{CapabilityMapping, ReconcileError, Reconciler};
use crate::recorder::{EventRecorder, TracingRecorder};
use crate::store::QueueStore;
use crate::types::QueueName;
use crate::workqueue::{BackoffConfig, BucketConfig, MaxRequeuePolicy, RetryPolicy, WorkQueue};

use super::config::ControllerConfig;
use super::{Controller, ControllerError, ControllerStatus, Result};

/// Registry name of the quota controller.
pub const QUOTA_CONTROLLER_NAME: &str = "resource-quota-controller";

/// Mirrors tagged quotas into queues.
pub struct QuotaController<S, F> {
    pub(super) name: String,
    /// Taken by `run`.
    feed: Mutex<Option<F>>,
    pub(super) queue: WorkQueue<QueueName, Request>,
    filter: EventFilter,
    pub(super) reconciler: Arc<Reconciler<S>>,
    pub(super) policy: Arc<dyn RetryPolicy<QueueName, ReconcileError>>,
    pub(super) recorder: Arc<dyn EventRecorder>,
    workers: usize,
    synced: AtomicBool,
}

impl<S, F> QuotaController<S, F>
where
    S: QueueStore + 'static,
    F: ChangeFeed + 'static,
{
    /// Creates a controller with default filter, backoff and retry budget,
    /// one worker, and events written to the log.
    pub fn new(feed: F, reconciler: Reconciler<S>) -> Self {
        QuotaController {
            name: QUOTA_CONTROLLER_NAME.to_string(),
            feed: Mutex::new(Some(feed)),
            queue: WorkQueue::new(BackoffConfig::DEFAULT),
            filter: EventFilter::default(),
            reconciler: Arc::new(reconciler),
            policy: Arc::new(MaxRequeuePolicy::from_signed(super::config::DEFAULT_MAX_REQUEUE)),
            recorder: Arc::new(TracingRecorder),
            workers: 1,
            synced: AtomicBool::new(false),
        }
    }

    /// Creates a controller wired from configuration.
    pub fn from_config(config: &ControllerConfig, feed: F, store: S) -> Self {
        let reconciler = Reconciler::new(store)
            .with_mapping(CapabilityMapping::for_gpu(&config.gpu_resource))
            .with_unchanged_policy(config.unchanged);
        Self::new(feed, reconciler)
            .with_filter(EventFilter::new(config.suffixes.iter().cloned()))
            .with_backoff(config.backoff)
            .with_bucket(config.bucket)
            .with_retry_policy(config.retry_policy())
            .with_workers(config.workers)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.queue = WorkQueue::with_limits(backoff, self.queue.bucket());
        self
    }

    /// Sets the overall requeue rate shared by all quotas.
    pub fn with_bucket(mut self, bucket: BucketConfig) -> Self {
        self.queue = WorkQueue::with_limits(self.queue.backoff(), bucket);
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy<QueueName, ReconcileError> + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Sets the worker count; zero is raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &WorkQueue<QueueName, Request> {
        &self.queue
    }

    fn enqueue(&self, notification: Notification) {
        let Some(request) = self.filter.admit(notification) else {
            return;
        };
        let key = request.key();
        let outcome = self.queue.add(key.clone(), request);
        trace!(name = %key, ?outcome, "Queued request");
    }

    /// Pumps the feed until it reports sync.
    ///
    /// Returns `Ok(false)` if shutdown was requested first.
    async fn wait_for_sync(&self, feed: &mut F, shutdown: &CancellationToken) -> Result<bool> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                event = feed.next() => match event {
                    Some(FeedEvent::Notification(notification)) => self.enqueue(notification),
                    Some(FeedEvent::Synced) => return Ok(true),
                    None => return Err(ControllerError::CacheSyncFailed(self.name.clone())),
                },
            }
        }
    }
}

#[async_trait]
impl<S, F> Controller for QuotaController<S, F>
where
    S: QueueStore + 'static,
    F: ChangeFeed + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> ControllerStatus {
        let (objects, list_error) = match self.reconciler.store().list().await {
            Ok(objects) => (objects, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        ControllerStatus {
            name: self.name.clone(),
            synced: self.is_synced(),
            workers: self.workers,
            queue: self.queue.stats(),
            objects,
            list_error,
        }
    }

    #[instrument(skip_all, fields(controller = %self.name))]
    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let feed = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut feed) = feed else {
            return Err(ControllerError::AlreadyStarted(self.name.clone()));
        };

        info!("Starting controller, waiting for cache sync");
        match self.wait_for_sync(&mut feed, &shutdown).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Shutdown requested before cache sync");
                self.queue.shut_down();
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "Failed to sync cache");
                self.queue.shut_down();
                return Err(e);
            }
        }
        self.synced.store(true, Ordering::Release);
        info!(workers = self.workers, queued = self.queue.len(), "Cache synced, starting workers");

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(Arc::clone(&self).run_worker(id));
        }

        let mut feed_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping controller");
                    break;
                }
                event = feed.next(), if feed_open => match event {
                    Some(FeedEvent::Notification(notification)) => self.enqueue(notification),
                    Some(FeedEvent::Synced) => debug!("Ignoring repeated sync marker"),
                    None => {
                        info!("Change feed closed, waiting for shutdown");
                        feed_open = false;
                    }
                },
            }
        }

        // Workers drain what is already queued, then see the closed sentinel.
        self.queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Controller stopped");
        Ok(())
    }
}

impl<S, F> std::fmt::Debug for QuotaController<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaController")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("filter", &self.filter)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
