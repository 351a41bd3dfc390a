//! Retry-or-drop decisions for failed work items.
//!
//! The worker loop asks a [`RetryPolicy`] what to do with each failure. The
//! policy only decides; the worker carries the decision out against the queue
//! and the event recorder. Keeping the decision pure makes it testable without
//! a live queue.

use std::fmt::Debug;

/// What to do with a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Requeue with backoff.
    Requeue,

    /// Stop retrying and tell a human: the retry budget is exhausted.
    Drop,

    /// Stop retrying silently: the failure is a programming or input error
    /// that no amount of retrying will fix.
    Discard,
}

/// Errors a retry policy can reason about.
pub trait Retriable {
    /// Returns false for errors that must never be retried.
    fn is_retriable(&self) -> bool;
}

/// Decides whether a failed item is retried.
pub trait RetryPolicy<K, E>: Send + Sync + Debug {
    /// `attempt` is the number of times the key has already been requeued.
    fn should_retry(&self, key: &K, attempt: u32, error: &E) -> Decision;
}

/// Retries up to a fixed number of requeues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxRequeuePolicy {
    /// `None` retries forever.
    max_requeues: Option<u32>,
}

impl MaxRequeuePolicy {
    pub const fn new(max_requeues: Option<u32>) -> Self {
        MaxRequeuePolicy { max_requeues }
    }

    pub const fn unlimited() -> Self {
        MaxRequeuePolicy { max_requeues: None }
    }

    /// Builds a policy from a signed setting where any negative value means
    /// unlimited.
    pub fn from_signed(max_requeues: i64) -> Self {
        MaxRequeuePolicy {
            max_requeues: u32::try_from(max_requeues)
                .ok()
                .or_else(|| (max_requeues > 0).then_some(u32::MAX)),
        }
    }

    pub fn max_requeues(&self) -> Option<u32> {
        self.max_requeues
    }
}

impl<K, E> RetryPolicy<K, E> for MaxRequeuePolicy
where
    E: Retriable,
{
    fn should_retry(&self, _key: &K, attempt: u32, error: &E) -> Decision {
        if !error.is_retriable() {
            return Decision::Discard;
        }
        match self.max_requeues {
            None => Decision::Requeue,
            Some(max) if attempt < max => Decision::Requeue,
            Some(_) => Decision::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Failure {
        retriable: bool,
    }

    impl Retriable for Failure {
        fn is_retriable(&self) -> bool {
            self.retriable
        }
    }

    const TRANSIENT: Failure = Failure { retriable: true };
    const FATAL: Failure = Failure { retriable: false };

    fn decide(policy: MaxRequeuePolicy, attempt: u32, error: &Failure) -> Decision {
        RetryPolicy::<&str, Failure>::should_retry(&policy, &"key", attempt, error)
    }

    #[test]
    fn requeues_until_budget_is_spent() {
        let policy = MaxRequeuePolicy::new(Some(2));
        assert_eq!(decide(policy, 0, &TRANSIENT), Decision::Requeue);
        assert_eq!(decide(policy, 1, &TRANSIENT), Decision::Requeue);
        assert_eq!(decide(policy, 2, &TRANSIENT), Decision::Drop);
    }

    #[test]
    fn zero_budget_drops_immediately() {
        let policy = MaxRequeuePolicy::new(Some(0));
        assert_eq!(decide(policy, 0, &TRANSIENT), Decision::Drop);
    }

    #[test]
    fn non_retriable_errors_are_discarded() {
        assert_eq!(
            decide(MaxRequeuePolicy::unlimited(), 0, &FATAL),
            Decision::Discard
        );
        assert_eq!(
            decide(MaxRequeuePolicy::new(Some(5)), 0, &FATAL),
            Decision::Discard
        );
    }

    #[test]
    fn negative_setting_means_unlimited() {
        assert_eq!(MaxRequeuePolicy::from_signed(-1).max_requeues(), None);
        assert_eq!(MaxRequeuePolicy::from_signed(-100).max_requeues(), None);
        assert_eq!(MaxRequeuePolicy::from_signed(0).max_requeues(), Some(0));
        assert_eq!(MaxRequeuePolicy::from_signed(15).max_requeues(), Some(15));
        assert_eq!(
            MaxRequeuePolicy::from_signed(i64::MAX).max_requeues(),
            Some(u32::MAX)
        );
    }

    proptest! {
        #[test]
        fn unlimited_always_requeues(attempt in any::<u32>()) {
            prop_assert_eq!(
                decide(MaxRequeuePolicy::unlimited(), attempt, &TRANSIENT),
                Decision::Requeue
            );
        }

        #[test]
        fn bounded_requeues_exactly_max_times(max in 0u32..50) {
            let policy = MaxRequeuePolicy::new(Some(max));
            let requeues = (0..=max)
                .take_while(|&attempt| decide(policy, attempt, &TRANSIENT) == Decision::Requeue)
                .count();
            prop_assert_eq!(requeues, max as usize);
        }
    }
}
