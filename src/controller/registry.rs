//! Named controller registration.
//!
//! Controllers are registered once at startup; names are unique. Running the
//! registry runs every controller concurrently. The first controller to fail
//! cancels the others so the process does not limp along half-alive.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Controller, ControllerError, ControllerStatus, Result};

/// The set of controllers a process runs.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<String, Arc<dyn Controller>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a controller. Names must be unique.
    pub fn register(&mut self, controller: Arc<dyn Controller>) -> Result<()> {
        let name = controller.name().to_string();
        if self.controllers.contains_key(&name) {
            return Err(ControllerError::DuplicateController(name));
        }
        self.controllers.insert(name, controller);
        Ok(())
    }

    /// Looks up a controller by its registered name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Controller>> {
        self.controllers.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.controllers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Status of every controller, sorted by name.
    pub async fn statuses(&self) -> Vec<ControllerStatus> {
        let mut statuses = Vec::with_capacity(self.controllers.len());
        for controller in self.controllers.values() {
            statuses.push(controller.status().await);
        }
        statuses
    }

    /// Runs every controller until `shutdown` is cancelled.
    ///
    /// Returns the first controller error, after all controllers have stopped.
    pub async fn run_all(&self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks = JoinSet::new();
        for (name, controller) in &self.controllers {
            info!(controller = %name, "Starting controller");
            tasks.spawn(Arc::clone(controller).run(shutdown.clone()));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(ControllerError::from).and_then(|r| r);
            if let Err(e) = result {
                error!(error = %e, "Controller failed, stopping all controllers");
                shutdown.cancel();
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("controllers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::workqueue::QueueStats;

    struct StubController {
        name: &'static str,
        fail: bool,
        stopped: AtomicBool,
    }

    impl StubController {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(StubController {
                name,
                fail,
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Controller for StubController {
        fn name(&self) -> &str {
            self.name
        }

        async fn status(&self) -> ControllerStatus {
            ControllerStatus {
                name: self.name.to_string(),
                synced: true,
                workers: 1,
                queue: QueueStats::default(),
                objects: Vec::new(),
                list_error: None,
            }
        }

        async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
            if self.fail {
                return Err(ControllerError::CacheSyncFailed(self.name.to_string()));
            }
            shutdown.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ControllerRegistry::new();
        registry.register(StubController::new("a", false)).unwrap();
        let err = registry.register(StubController::new("a", false)).unwrap_err();
        assert!(matches!(err, ControllerError::DuplicateController(ref n) if n == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn names_and_statuses_are_sorted() {
        let mut registry = ControllerRegistry::new();
        registry.register(StubController::new("zeta", false)).unwrap();
        registry.register(StubController::new("alpha", false)).unwrap();

        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        let statuses = registry.statuses().await;
        assert_eq!(statuses[0].name, "alpha");
        assert_eq!(statuses[1].name, "zeta");
    }

    #[tokio::test]
    async fn run_all_stops_on_shutdown() {
        let mut registry = ControllerRegistry::new();
        let controller = StubController::new("a", false);
        registry.register(controller.clone()).unwrap();

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        registry.run_all(shutdown).await.unwrap();
        assert!(controller.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_controller_stops_the_rest() {
        let mut registry = ControllerRegistry::new();
        let healthy = StubController::new("healthy", false);
        registry.register(healthy.clone()).unwrap();
        registry.register(StubController::new("broken", true)).unwrap();

        let err = registry.run_all(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::CacheSyncFailed(ref n) if n == "broken"));
        assert!(healthy.stopped.load(Ordering::SeqCst));
    }
}
