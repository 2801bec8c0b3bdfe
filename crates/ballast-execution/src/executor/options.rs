use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ballast_common::config::AppConfig;
use ballast_server::retry::RetryStrategy;

use crate::codec::TaskCodec;
use crate::executor::fetch::BlockFetcher;
use crate::executor::task_runner::TaskProcessor;
use crate::id::ExecutorId;

pub struct ExecutorOptions {
    pub executor_id: ExecutorId,
    pub app_id: String,
    pub cores: usize,
    pub driver_host: String,
    pub driver_port: u16,
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: String,
    /// The port the driver uses to reach this executor, or 0 to reuse the
    /// bound listen port.
    pub external_port: u16,
    pub heartbeat_interval: Duration,
    pub rpc_retry_strategy: RetryStrategy,
    pub log_urls: Vec<(String, String)>,
    pub codec: Arc<dyn TaskCodec>,
    pub fetcher: Arc<dyn BlockFetcher>,
    pub processor: Arc<dyn TaskProcessor>,
    /// Set when the executor dies of an unrecoverable error, so the process
    /// can exit with a non-zero status.
    pub fatal: Arc<OnceLock<String>>,
}

impl ExecutorOptions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AppConfig,
        executor_id: ExecutorId,
        app_id: String,
        cores: usize,
        driver_host: String,
        driver_port: u16,
        codec: Arc<dyn TaskCodec>,
        fetcher: Arc<dyn BlockFetcher>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        Self {
            executor_id,
            app_id,
            cores,
            driver_host,
            driver_port,
            listen_host: config.executor.listen_host.clone(),
            listen_port: config.executor.listen_port,
            external_host: config.executor.external_host.clone(),
            external_port: config.executor.external_port,
            heartbeat_interval: Duration::from_millis(config.executor.heartbeat_interval_ms),
            rpc_retry_strategy: RetryStrategy::from(&config.network.rpc_retry_strategy),
            log_urls: vec![],
            codec,
            fetcher,
            processor,
            fatal: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_log_urls(mut self, log_urls: Vec<(String, String)>) -> Self {
        self.log_urls = log_urls;
        self
    }
}
