//! Typed change notifications for quota objects.
//!
//! The watch layer delivers these after converting its raw watch events. The
//! controller never sees untyped payloads: anything that cannot be expressed
//! as a [`Notification`] is rejected at the decoding boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::QuotaSnapshot;

/// The kind of change that happened to a quota.
///
/// This doubles as the verb carried by a reconcile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Add,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Add => "Add",
            Verb::Update => "Update",
            Verb::Delete => "Delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verb string that is not `Add`, `Update` or `Delete`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown request verb: {0:?}")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Add" => Ok(Verb::Add),
            "Update" => Ok(Verb::Update),
            "Delete" => Ok(Verb::Delete),
            other => Err(UnknownVerb(other.to_string())),
        }
    }
}

/// A change notification for a single quota.
///
/// For updates only the new object is carried; the controller is
/// level-triggered and never diffs old against new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: Verb,
    pub quota: QuotaSnapshot,
}

impl Notification {
    pub fn added(quota: QuotaSnapshot) -> Self {
        Notification {
            kind: Verb::Add,
            quota,
        }
    }

    pub fn updated(quota: QuotaSnapshot) -> Self {
        Notification {
            kind: Verb::Update,
            quota,
        }
    }

    pub fn deleted(quota: QuotaSnapshot) -> Self {
        Notification {
            kind: Verb::Delete,
            quota,
        }
    }
}

/// Everything a change feed can yield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A quota changed.
    Notification(Notification),

    /// The watch layer's local cache has converged with the server.
    ///
    /// No request is processed before this has been observed.
    Synced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_round_trips_through_str() {
        for verb in [Verb::Add, Verb::Update, Verb::Delete] {
            assert_eq!(verb.as_str().parse::<Verb>(), Ok(verb));
        }
    }

    #[test]
    fn unknown_verb_is_rejected() {
        assert_eq!(
            "Patch".parse::<Verb>(),
            Err(UnknownVerb("Patch".to_string()))
        );
        // Verbs are case sensitive.
        assert!("add".parse::<Verb>().is_err());
    }

    #[test]
    fn constructors_set_kind() {
        let quota = QuotaSnapshot::new("q", "ns");
        assert_eq!(Notification::added(quota.clone()).kind, Verb::Add);
        assert_eq!(Notification::updated(quota.clone()).kind, Verb::Update);
        assert_eq!(Notification::deleted(quota).kind, Verb::Delete);
    }
}
