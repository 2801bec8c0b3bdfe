use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub driver: DriverConfig,
    pub executor: ExecutorConfig,
    pub skew: SkewConfig,
    pub network: NetworkConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load the application configuration from the embedded defaults and
    /// `BALLAST_`-prefixed environment variables, where `__` in a variable
    /// name stands for a section separator (e.g. `BALLAST_DRIVER__LISTEN_PORT`).
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .merge(Env::prefixed("BALLAST_").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub listen_host: String,
    /// The port the driver server binds to, or 0 for an ephemeral port.
    pub listen_port: u16,
    pub external_host: String,
    /// The port executors use to reach the driver, or 0 to reuse the
    /// bound listen port.
    pub external_port: u16,
    pub revive_interval_ms: u64,
    pub min_registered_resources_ratio: f64,
    pub max_registered_resources_waiting_time_ms: u64,
    /// The largest message the transport accepts for a task dispatch.
    pub max_frame_size: usize,
    /// Transport overhead subtracted from the frame budget before
    /// comparing against a serialized task.
    pub frame_reserved_bytes: usize,
    /// Overrides the parallelism derived from registered cores when non-zero.
    pub default_parallelism: usize,
    pub executor_heartbeat_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: String,
    pub external_port: u16,
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewConfig {
    /// The smallest number of active tasks for which a split is considered.
    pub min_active_tasks: usize,
    /// The threshold used instead of `min_active_tasks` when the newly
    /// registered task is the last of its set.
    pub min_active_tasks_last: usize,
    /// Assumed compute speed in bytes per millisecond for tasks that have
    /// not reported one yet.
    pub default_compute_speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub connect_timeout_ms: u64,
    pub rpc_retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay_ms: u64,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        factor: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub stack_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_loads() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.driver.revive_interval_ms, 1000);
        assert_eq!(config.driver.max_registered_resources_waiting_time_ms, 30000);
        assert_eq!(config.driver.max_frame_size, 128 * 1024 * 1024);
        assert_eq!(config.driver.frame_reserved_bytes, 200 * 1024);
        assert_eq!(config.skew.min_active_tasks, 3);
        assert_eq!(config.skew.min_active_tasks_last, 2);
        assert!(matches!(
            config.network.rpc_retry_strategy,
            RetryStrategy::ExponentialBackoff { max_count: 5, .. }
        ));
    }
}
