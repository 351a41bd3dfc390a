//! Relevance filter for quota notifications.
//!
//! Only quotas tagged with a hardware class are mirrored into queues. A quota
//! is tagged when its namespace or its own name ends with one of the
//! configured suffixes (for example `team-a100` or a quota in namespace
//! `infra-3090`). Scoping happens here rather than with a label selector on
//! the watch, so the watch layer stays generic.

use std::sync::Arc;

use tracing::trace;

use crate::types::QuotaSnapshot;

use super::events::{Notification, Verb};
use super::request::Request;

/// Suffix tags used when none are configured.
pub const DEFAULT_SUFFIXES: [&str; 2] = ["3090", "a100"];

/// Decides which quota notifications become reconcile requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    suffixes: Vec<String>,
}

impl Default for EventFilter {
    fn default() -> Self {
        EventFilter::new(DEFAULT_SUFFIXES)
    }
}

impl EventFilter {
    /// Creates a filter matching the given suffix tags.
    ///
    /// Empty tags are ignored; an empty tag would otherwise match everything.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter {
            suffixes: suffixes
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Returns true if the quota's namespace or name carries a tag.
    pub fn is_relevant(&self, quota: &QuotaSnapshot) -> bool {
        self.suffixes
            .iter()
            .any(|tag| quota.namespace.ends_with(tag.as_str()) || quota.name.ends_with(tag.as_str()))
    }

    /// Turns a quota change into a request, or `None` if it is not relevant.
    pub fn filter(&self, quota: impl Into<Arc<QuotaSnapshot>>, verb: Verb) -> Option<Request> {
        let quota = quota.into();
        if !self.is_relevant(&quota) {
            trace!(
                name = %quota.name,
                namespace = %quota.namespace,
                verb = %verb,
                "Ignoring untagged quota"
            );
            return None;
        }
        Some(Request::new(quota, verb))
    }

    /// Converts a notification at the feed boundary.
    pub fn admit(&self, notification: Notification) -> Option<Request> {
        self.filter(notification.quota, notification.kind)
    }
}
