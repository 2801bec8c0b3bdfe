use std::collections::HashMap;
use std::sync::Arc;

use ballast_common::config::AppConfig;
use ballast_server::actor::{ActorHandle, ActorSystem};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::codec::TaskCodec;
use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::fetch::BlockFetcher;
use crate::executor::task_runner::TaskProcessor;
use crate::executor::{ExecutorActor, ExecutorEvent, ExecutorOptions};
use crate::id::ExecutorId;
use crate::manager::ExecutorManager;

struct LocalExecutorManagerState {
    system: ActorSystem,
    executors: HashMap<ExecutorId, ActorHandle<ExecutorActor>>,
    next_index: usize,
}

/// Runs executors as actors inside the driver process, registering over
/// loopback gRPC like any remote executor would.
pub struct LocalExecutorManager {
    state: Mutex<LocalExecutorManagerState>,
    driver_endpoint: std::sync::Mutex<Option<(String, u16)>>,
    config: AppConfig,
    app_id: String,
    cores_per_executor: usize,
    codec: Arc<dyn TaskCodec>,
    fetcher: Arc<dyn BlockFetcher>,
    processor: Arc<dyn TaskProcessor>,
}

impl LocalExecutorManager {
    pub fn new(
        config: AppConfig,
        app_id: String,
        cores_per_executor: usize,
        codec: Arc<dyn TaskCodec>,
        fetcher: Arc<dyn BlockFetcher>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        Self {
            state: Mutex::new(LocalExecutorManagerState {
                system: ActorSystem::new(),
                executors: HashMap::new(),
                next_index: 0,
            }),
            driver_endpoint: std::sync::Mutex::new(None),
            config,
            app_id,
            cores_per_executor: cores_per_executor.max(1),
            codec,
            fetcher,
            processor,
        }
    }
}

#[tonic::async_trait]
impl ExecutorManager for LocalExecutorManager {
    fn notify_driver_endpoint(&self, host: &str, port: u16) {
        let mut endpoint = match self.driver_endpoint.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *endpoint = Some((host.to_string(), port));
    }

    async fn request_total_executors(&self, total: usize) -> ExecutionResult<()> {
        let endpoint = {
            let endpoint = match self.driver_endpoint.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            endpoint.clone()
        };
        let Some((driver_host, driver_port)) = endpoint else {
            return Err(ExecutionError::InternalError(
                "the driver endpoint is not known yet".to_string(),
            ));
        };
        let mut state = self.state.lock().await;
        while state.executors.len() < total {
            state.next_index += 1;
            let executor_id = ExecutorId::from(format!("local-{}", state.next_index));
            info!("starting local executor {executor_id}");
            let options = ExecutorOptions::new(
                &self.config,
                executor_id.clone(),
                self.app_id.clone(),
                self.cores_per_executor,
                driver_host.clone(),
                driver_port,
                self.codec.clone(),
                self.fetcher.clone(),
                self.processor.clone(),
            );
            let handle = state.system.spawn::<ExecutorActor>(options);
            state.executors.insert(executor_id, handle);
        }
        if state.executors.len() > total {
            info!(
                "keeping {} local executors; scale-down happens through kill requests",
                state.executors.len()
            );
        }
        Ok(())
    }

    async fn kill_executors(&self, executor_ids: &[ExecutorId]) -> ExecutionResult<()> {
        let mut state = self.state.lock().await;
        for executor_id in executor_ids {
            match state.executors.remove(executor_id) {
                Some(handle) => {
                    if handle.send(ExecutorEvent::Shutdown).await.is_err() {
                        warn!("local executor {executor_id} has already stopped");
                    }
                }
                None => warn!("local executor {executor_id} not found"),
            }
        }
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        let mut state = self.state.lock().await;
        for (executor_id, handle) in state.executors.drain() {
            if handle.send(ExecutorEvent::Shutdown).await.is_err() {
                warn!("local executor {executor_id} has already stopped");
            }
        }
        state.system.join().await;
        Ok(())
    }
}
