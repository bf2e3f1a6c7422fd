//! Worker configuration loaded from the environment.

use crate::lock::LockBackoff;
use serde::Deserialize;
use std::time::Duration;

/// Worker configuration loaded from environment variables.
///
/// Environment variables are prefixed with `FLOW_WORKER_`:
/// - `FLOW_WORKER_SANDBOX_TIMEOUT_MS`: hard ceiling for one run attempt (default: 600000)
/// - `FLOW_WORKER_LOCK_SAFETY_MARGIN_MS`: added to the ceiling for the run lock (default: 30000)
/// - `FLOW_WORKER_QUEUE_NAME`: queue reported with job status updates (default: "flow-runs")
/// - `FLOW_WORKER_ENGINE_TOKEN`: token handed to the engine runner
/// - `FLOW_WORKER_API_URL`: platform API the engine calls back into
/// - `FLOW_WORKER_LOCK_RETRY_INITIAL_MS` / `FLOW_WORKER_LOCK_RETRY_MAX_MS`: lock backoff bounds
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,

    #[serde(default = "default_lock_safety_margin_ms")]
    pub lock_safety_margin_ms: u64,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default)]
    pub engine_token: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_lock_retry_initial_ms")]
    pub lock_retry_initial_ms: u64,

    #[serde(default = "default_lock_retry_max_ms")]
    pub lock_retry_max_ms: u64,
}

fn default_sandbox_timeout_ms() -> u64 {
    600_000
}

fn default_lock_safety_margin_ms() -> u64 {
    30_000
}

fn default_queue_name() -> String {
    "flow-runs".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:3000/api/".to_string()
}

fn default_lock_retry_initial_ms() -> u64 {
    50
}

fn default_lock_retry_max_ms() -> u64 {
    2_000
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("FLOW_WORKER_").from_env::<WorkerConfig>()
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }

    /// The run lock outlives the sandbox ceiling by the safety margin.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms.saturating_add(self.lock_safety_margin_ms))
    }

    pub fn lock_backoff(&self) -> LockBackoff {
        LockBackoff {
            initial: Duration::from_millis(self.lock_retry_initial_ms),
            max: Duration::from_millis(self.lock_retry_max_ms),
            ..LockBackoff::default()
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            lock_safety_margin_ms: default_lock_safety_margin_ms(),
            queue_name: default_queue_name(),
            engine_token: String::new(),
            api_url: default_api_url(),
            lock_retry_initial_ms: default_lock_retry_initial_ms(),
            lock_retry_max_ms: default_lock_retry_max_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.queue_name, "flow-runs");
        assert_eq!(config.lock_timeout(), Duration::from_millis(630_000));
    }

    #[test]
    fn test_lock_timeout_saturates() {
        let vars = vec![
            ("FLOW_WORKER_SANDBOX_TIMEOUT_MS".to_string(), u64::MAX.to_string()),
            ("FLOW_WORKER_LOCK_SAFETY_MARGIN_MS".to_string(), "30000".to_string()),
        ];
        let config: WorkerConfig = envy::prefixed("FLOW_WORKER_").from_iter(vars).unwrap();

        assert_eq!(config.lock_timeout(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_prefixed_variables_override_defaults() {
        let vars = vec![
            ("FLOW_WORKER_SANDBOX_TIMEOUT_MS".to_string(), "1000".to_string()),
            ("FLOW_WORKER_QUEUE_NAME".to_string(), "runs-test".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config: WorkerConfig = envy::prefixed("FLOW_WORKER_").from_iter(vars).unwrap();

        assert_eq!(config.sandbox_timeout(), Duration::from_millis(1000));
        assert_eq!(config.queue_name, "runs-test");
        assert_eq!(config.lock_safety_margin_ms, 30_000);
        assert_eq!(config.lock_backoff().initial, Duration::from_millis(50));
    }
}
