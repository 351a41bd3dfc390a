//! Controller configuration.
//!
//! Values come from `QUOTA_SYNC_*` environment variables with built-in
//! defaults. Unset variables fall back to the default; set but unparseable
//! variables are an error rather than silently ignored.

use std::net::SocketAddr;

use thiserror::Error;

use crate::notify::DEFAULT_SUFFIXES;
use crate::reconcile::{DEFAULT_GPU_RESOURCE, UnchangedPolicy};
use crate::workqueue::{BackoffConfig, BucketConfig, MaxRequeuePolicy};

pub const ENV_WORKERS: &str = "QUOTA_SYNC_WORKERS";
pub const ENV_MAX_REQUEUE: &str = "QUOTA_SYNC_MAX_REQUEUE";
pub const ENV_SUFFIXES: &str = "QUOTA_SYNC_SUFFIXES";
pub const ENV_GPU_RESOURCE: &str = "QUOTA_SYNC_GPU_RESOURCE";
pub const ENV_UNCHANGED: &str = "QUOTA_SYNC_UNCHANGED";
pub const ENV_LISTEN_ADDR: &str = "QUOTA_SYNC_LISTEN_ADDR";
pub const ENV_RETRY_QPS: &str = "QUOTA_SYNC_RETRY_QPS";
pub const ENV_RETRY_BURST: &str = "QUOTA_SYNC_RETRY_BURST";

/// Default number of concurrent reconcile workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Default retry budget per key.
pub const DEFAULT_MAX_REQUEUE: i64 = 15;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    fn new(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Settings for one quota sync controller and its HTTP surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers. Always at least one.
    pub workers: usize,

    /// Requeue budget per key; negative means unlimited.
    pub max_requeue: i64,

    /// Name or namespace suffixes that make a quota relevant.
    pub suffixes: Vec<String>,

    /// Extended resource mirrored from `requests.<gpu_resource>`.
    pub gpu_resource: String,

    pub unchanged: UnchangedPolicy,

    pub backoff: BackoffConfig,

    /// Overall requeue rate across all quotas.
    pub bucket: BucketConfig,

    pub listen_addr: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            workers: DEFAULT_WORKERS,
            max_requeue: DEFAULT_MAX_REQUEUE,
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            gpu_resource: DEFAULT_GPU_RESOURCE.to_string(),
            unchanged: UnchangedPolicy::default(),
            backoff: BackoffConfig::DEFAULT,
            bucket: BucketConfig::DEFAULT,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(value) = get(ENV_WORKERS) {
            let workers: usize = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::new(ENV_WORKERS, &value, e))?;
            if workers == 0 {
                return Err(ConfigError::new(ENV_WORKERS, &value, "must be at least 1"));
            }
            config.workers = workers;
        }

        if let Some(value) = get(ENV_MAX_REQUEUE) {
            config.max_requeue = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::new(ENV_MAX_REQUEUE, &value, e))?;
        }

        if let Some(value) = get(ENV_SUFFIXES) {
            config.suffixes = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(value) = get(ENV_GPU_RESOURCE) {
            config.gpu_resource = value.trim().to_string();
        }

        if let Some(value) = get(ENV_UNCHANGED) {
            config.unchanged = value
                .parse()
                .map_err(|e| ConfigError::new(ENV_UNCHANGED, &value, e))?;
        }

        if let Some(value) = get(ENV_RETRY_QPS) {
            let qps: f64 = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::new(ENV_RETRY_QPS, &value, e))?;
            if !(qps.is_finite() && qps > 0.0) {
                return Err(ConfigError::new(ENV_RETRY_QPS, &value, "must be a positive number"));
            }
            config.bucket.qps = qps;
        }

        if let Some(value) = get(ENV_RETRY_BURST) {
            let burst: u32 = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::new(ENV_RETRY_BURST, &value, e))?;
            if burst == 0 {
                return Err(ConfigError::new(ENV_RETRY_BURST, &value, "must be at least 1"));
            }
            config.bucket.burst = burst;
        }

        if let Some(value) = get(ENV_LISTEN_ADDR) {
            config.listen_addr = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::new(ENV_LISTEN_ADDR, &value, e))?;
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> MaxRequeuePolicy {
        MaxRequeuePolicy::from_signed(self.max_requeue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ControllerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_requeue, 15);
        assert_eq!(config.suffixes, vec!["3090", "a100"]);
        assert_eq!(config.gpu_resource, "nvidia.com/gpu");
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.bucket, BucketConfig::new(10.0, 100));
    }

    #[test]
    fn reads_all_variables() {
        let config = from_vars(&[
            (ENV_WORKERS, "4"),
            (ENV_MAX_REQUEUE, "-1"),
            (ENV_SUFFIXES, "h100, 4090,,"),
            (ENV_GPU_RESOURCE, "amd.com/gpu"),
            (ENV_UNCHANGED, "skip"),
            (ENV_LISTEN_ADDR, "127.0.0.1:9000"),
            (ENV_RETRY_QPS, "2.5"),
            (ENV_RETRY_BURST, "20"),
        ])
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.retry_policy().max_requeues(), None);
        assert_eq!(config.suffixes, vec!["h100", "4090"]);
        assert_eq!(config.gpu_resource, "amd.com/gpu");
        assert_eq!(config.unchanged, UnchangedPolicy::Skip);
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.bucket, BucketConfig::new(2.5, 20));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = from_vars(&[(ENV_WORKERS, ""), (ENV_SUFFIXES, "  ")]).unwrap();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.suffixes, vec!["3090", "a100"]);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = from_vars(&[(ENV_WORKERS, "0")]).unwrap_err();
        assert_eq!(err.var, ENV_WORKERS);
    }

    #[test]
    fn rejects_garbage() {
        assert!(from_vars(&[(ENV_WORKERS, "many")]).is_err());
        assert!(from_vars(&[(ENV_MAX_REQUEUE, "lots")]).is_err());
        assert!(from_vars(&[(ENV_UNCHANGED, "sometimes")]).is_err());
        assert!(from_vars(&[(ENV_LISTEN_ADDR, "nowhere")]).is_err());
        assert!(from_vars(&[(ENV_RETRY_QPS, "fast")]).is_err());
        assert!(from_vars(&[(ENV_RETRY_QPS, "0")]).is_err());
        assert!(from_vars(&[(ENV_RETRY_QPS, "inf")]).is_err());
        assert!(from_vars(&[(ENV_RETRY_BURST, "0")]).is_err());
    }

    #[test]
    fn error_names_variable_and_value() {
        let err = from_vars(&[(ENV_MAX_REQUEUE, "x")]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains(ENV_MAX_REQUEUE));
        assert!(text.contains("\"x\""));
    }
}
