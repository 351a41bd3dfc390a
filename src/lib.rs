//! Quota Queue Sync - a controller that mirrors tagged resource quotas into scheduler queues.
//!
//! This library provides the reconcile engine (filter, work queue, reconciler,
//! retry policy), the controller runtime, and the operator HTTP surface.

pub mod controller;
pub mod notify;
pub mod reconcile;
pub mod recorder;
pub mod server;
pub mod store;
pub mod types;
pub mod workqueue;

#[cfg(test)]
mod test_utils;
