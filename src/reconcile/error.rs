//! Reconcile error types.

use thiserror::Error;
use tokio::task::JoinError;

use crate::store::StoreError;
use crate::workqueue::Retriable;

/// Why a reconcile attempt failed.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// A store call failed. Retried: conflicts and outages resolve on re-read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request can never succeed as given.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The reconcile task panicked.
    #[error("reconcile panicked: {0}")]
    Panicked(String),

    /// The reconcile task was cancelled before it finished.
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Converts a failed reconcile task into an error.
    pub fn from_join(err: JoinError) -> Self {
        if !err.is_panic() {
            return ReconcileError::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        ReconcileError::Panicked(message)
    }
}

impl Retriable for ReconcileError {
    fn is_retriable(&self) -> bool {
        !matches!(self, ReconcileError::MalformedRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueueName;

    #[test]
    fn store_errors_display_transparently() {
        let err = ReconcileError::from(StoreError::not_found(QueueName::new("q")));
        assert_eq!(err.to_string(), "queue q not found: no such queue");
        assert!(err.is_retriable());
    }

    #[test]
    fn malformed_requests_are_not_retriable() {
        assert!(!ReconcileError::MalformedRequest("bad".into()).is_retriable());
        assert!(ReconcileError::Panicked("boom".into()).is_retriable());
    }

    #[tokio::test]
    async fn join_error_keeps_panic_message() {
        let handle = tokio::spawn(async { panic!("store client exploded") });
        let err = ReconcileError::from_join(handle.await.unwrap_err());
        assert!(matches!(err, ReconcileError::Panicked(ref m) if m == "store client exploded"));
    }

    #[tokio::test]
    async fn aborted_task_is_cancelled() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let err = ReconcileError::from_join(handle.await.unwrap_err());
        assert!(matches!(err, ReconcileError::Cancelled));
    }
}
