use std::sync::Arc;
use std::time::Duration;

use ballast_common::config::AppConfig;
use ballast_server::retry::RetryStrategy;

use crate::codec::TaskCodec;
use crate::driver::registry::ExecutorRegistry;
use crate::events::EventBus;
use crate::manager::ExecutorManager;
use crate::scheduler::TaskScheduler;
use crate::skew::SkewOptions;

pub struct DriverOptions {
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: String,
    /// The port executors use to reach the driver, or 0 to reuse the bound
    /// listen port.
    pub external_port: u16,
    pub revive_interval: Duration,
    pub max_frame_size: usize,
    pub frame_reserved_bytes: usize,
    pub executor_heartbeat_timeout: Duration,
    pub rpc_retry_strategy: RetryStrategy,
    pub skew: SkewOptions,
    /// Application properties served to executors at bootstrap.
    pub properties: Vec<(String, String)>,
    pub registry: Arc<ExecutorRegistry>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub manager: Arc<dyn ExecutorManager>,
    pub codec: Arc<dyn TaskCodec>,
    pub event_bus: Arc<EventBus>,
}

impl DriverOptions {
    pub fn new(
        config: &AppConfig,
        registry: Arc<ExecutorRegistry>,
        scheduler: Arc<dyn TaskScheduler>,
        manager: Arc<dyn ExecutorManager>,
        codec: Arc<dyn TaskCodec>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            listen_host: config.driver.listen_host.clone(),
            listen_port: config.driver.listen_port,
            external_host: config.driver.external_host.clone(),
            external_port: config.driver.external_port,
            revive_interval: Duration::from_millis(config.driver.revive_interval_ms),
            max_frame_size: config.driver.max_frame_size,
            frame_reserved_bytes: config.driver.frame_reserved_bytes,
            executor_heartbeat_timeout: Duration::from_millis(
                config.driver.executor_heartbeat_timeout_ms,
            ),
            rpc_retry_strategy: RetryStrategy::from(&config.network.rpc_retry_strategy),
            skew: SkewOptions::from(&config.skew),
            properties: vec![],
            registry,
            scheduler,
            manager,
            codec,
            event_bus,
        }
    }

    pub fn with_properties(mut self, properties: Vec<(String, String)>) -> Self {
        self.properties = properties;
        self
    }
}
