//! Newtype wrappers for resource identifiers.
//!
//! Queue resources are cluster-scoped and named after the quota they mirror.
//! Wrapping the name keeps it from being confused with a namespace or a
//! resource key such as `limits.cpu`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a resource name.
const MAX_NAME_LEN: usize = 253;

/// The name of a queue resource.
///
/// This is also the work queue's deduplication key: every request for the same
/// quota name collapses onto one `QueueName`, regardless of which snapshot
/// object triggered it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    /// Creates a queue name without validation.
    pub fn new(name: impl Into<String>) -> Self {
        QueueName(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks that the name is usable as a resource name.
    ///
    /// Names must be non-empty, at most 253 characters, consist of lowercase
    /// alphanumerics, `-` and `.`, and start and end with an alphanumeric.
    pub fn validate(&self) -> Result<(), InvalidName> {
        let name = self.0.as_str();
        if name.is_empty() {
            return Err(InvalidName::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(InvalidName::TooLong(name.len()));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
        {
            return Err(InvalidName::InvalidChar(c));
        }
        let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        let first = name.chars().next().is_some_and(is_alnum);
        let last = name.chars().last().is_some_and(is_alnum);
        if !first || !last {
            return Err(InvalidName::BadBoundary);
        }
        Ok(())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for QueueName {
    fn from(s: String) -> Self {
        QueueName(s)
    }
}

impl From<&str> for QueueName {
    fn from(s: &str) -> Self {
        QueueName(s.to_string())
    }
}

/// Why a name was rejected by [`QueueName::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidName {
    #[error("name is empty")]
    Empty,

    #[error("name is {0} characters long, limit is 253")]
    TooLong(usize),

    #[error("name contains invalid character {0:?}")]
    InvalidChar(char),

    #[error("name must start and end with an alphanumeric character")]
    BadBoundary,
}
