use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ballast_common::config::AppConfig;
use ballast_server::actor::ActorHandle;
use ballast_server::retry::RetryStrategy;
use log::{info, warn};
use tokio::sync::oneshot;

use crate::codec::TaskCodec;
use crate::driver::{DriverActor, DriverEvent, DriverOptions, ExecutorRegistry};
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::EventBus;
use crate::id::{ExecutorId, TaskId};
use crate::manager::ExecutorManager;
use crate::scheduler::TaskScheduler;

/// The surface the external task scheduler drives the cluster through.
#[tonic::async_trait]
pub trait SchedulerBackend: Send + Sync {
    async fn start(&self) -> ExecutionResult<()>;
    async fn stop(&self) -> ExecutionResult<()>;
    async fn stop_executors(&self) -> ExecutionResult<()>;
    async fn revive_offers(&self) -> ExecutionResult<()>;
    async fn kill_task(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
        interrupt: bool,
    ) -> ExecutionResult<()>;
    fn default_parallelism(&self) -> usize;
    fn num_existing_executors(&self) -> usize;
    async fn request_executors(&self, additional: i64) -> ExecutionResult<()>;
    async fn request_total_executors(&self, total: i64) -> ExecutionResult<()>;
    async fn kill_executors(&self, executor_ids: &[ExecutorId]) -> ExecutionResult<()>;
    fn is_ready(&self) -> bool;
    async fn remove_executor(&self, executor_id: ExecutorId, reason: String)
        -> ExecutionResult<()>;
}

/// The coarse-grained backend: one driver endpoint holding long-lived
/// executor registrations, with executor allocation delegated to the
/// executor manager.
pub struct CoarseSchedulerBackend {
    config: AppConfig,
    registry: Arc<ExecutorRegistry>,
    scheduler: Arc<dyn TaskScheduler>,
    manager: Arc<dyn ExecutorManager>,
    codec: Arc<dyn TaskCodec>,
    event_bus: Arc<EventBus>,
    retry: RetryStrategy,
    create_time: Instant,
    min_registered_ratio: f64,
    max_registered_waiting_time: Duration,
    handle: Mutex<Option<ActorHandle<DriverActor>>>,
}

impl CoarseSchedulerBackend {
    pub fn new(
        config: AppConfig,
        scheduler: Arc<dyn TaskScheduler>,
        manager: Arc<dyn ExecutorManager>,
        codec: Arc<dyn TaskCodec>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let retry = RetryStrategy::from(&config.network.rpc_retry_strategy);
        let min_registered_ratio = config.driver.min_registered_resources_ratio.clamp(0.0, 1.0);
        let max_registered_waiting_time =
            Duration::from_millis(config.driver.max_registered_resources_waiting_time_ms);
        Self {
            config,
            registry: Arc::new(ExecutorRegistry::new()),
            scheduler,
            manager,
            codec,
            event_bus,
            retry,
            create_time: Instant::now(),
            min_registered_ratio,
            max_registered_waiting_time,
            handle: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<ExecutorRegistry> {
        Arc::clone(&self.registry)
    }

    fn driver_handle(&self) -> ExecutionResult<ActorHandle<DriverActor>> {
        let handle = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handle.clone().ok_or_else(|| {
            ExecutionError::SchedulerCommunication("the driver is not started".to_string())
        })
    }

    /// Send an event built around a fresh reply channel and wait for the
    /// acknowledgment, retrying per the configured strategy.
    async fn ask<F>(&self, make: F) -> ExecutionResult<()>
    where
        F: Fn(oneshot::Sender<ExecutionResult<()>>) -> DriverEvent + Send + Sync,
    {
        let handle = self.driver_handle()?;
        let make = &make;
        self.retry
            .run(|| {
                let handle = handle.clone();
                async move {
                    let (tx, rx) = oneshot::channel();
                    handle.send(make(tx)).await?;
                    rx.await?
                }
            })
            .await
            .map_err(|e| ExecutionError::SchedulerCommunication(e.to_string()))
    }

    fn sufficient_resources_registered(&self) -> bool {
        if self.min_registered_ratio <= 0.0 {
            return true;
        }
        let target = self.registry.target_executor_count();
        if target == 0 {
            return true;
        }
        let registered = self.registry.registered_executor_count();
        registered as f64 / target as f64 >= self.min_registered_ratio
    }
}

#[tonic::async_trait]
impl SchedulerBackend for CoarseSchedulerBackend {
    async fn start(&self) -> ExecutionResult<()> {
        let mut handle = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if handle.is_some() {
            warn!("the scheduler backend is already started");
            return Ok(());
        }
        let options = DriverOptions::new(
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.manager),
            Arc::clone(&self.codec),
            Arc::clone(&self.event_bus),
        );
        *handle = Some(ActorHandle::<DriverActor>::new(options));
        info!("scheduler backend started");
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        let taken = {
            let mut handle = match self.handle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            handle.take()
        };
        let Some(handle) = taken else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        handle.send(DriverEvent::StopDriver { result: tx }).await?;
        rx.await??;
        handle.wait_for_stop().await;
        Ok(())
    }

    async fn stop_executors(&self) -> ExecutionResult<()> {
        self.ask(|result| DriverEvent::StopExecutors { result }).await
    }

    async fn revive_offers(&self) -> ExecutionResult<()> {
        let handle = self.driver_handle()?;
        self.retry
            .run(|| {
                let handle = handle.clone();
                async move { handle.send(DriverEvent::ReviveOffers).await }
            })
            .await
            .map_err(|e| ExecutionError::SchedulerCommunication(e.to_string()))
    }

    async fn kill_task(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
        interrupt: bool,
    ) -> ExecutionResult<()> {
        let handle = self.driver_handle()?;
        self.retry
            .run(|| {
                let handle = handle.clone();
                let executor_id = executor_id.clone();
                async move {
                    handle
                        .send(DriverEvent::KillTask {
                            task_id,
                            executor_id,
                            interrupt,
                        })
                        .await
                }
            })
            .await
            .map_err(|e| ExecutionError::SchedulerCommunication(e.to_string()))
    }

    fn default_parallelism(&self) -> usize {
        if self.config.driver.default_parallelism > 0 {
            self.config.driver.default_parallelism
        } else {
            self.registry.total_core_count().max(2)
        }
    }

    fn num_existing_executors(&self) -> usize {
        self.registry.registered_executor_count()
    }

    async fn request_executors(&self, additional: i64) -> ExecutionResult<()> {
        if additional < 0 {
            return Err(ExecutionError::InvalidArgument(format!(
                "cannot request a negative number of additional executors: {additional}"
            )));
        }
        let total = self.registry.note_requested_executors(additional as usize);
        self.manager.request_total_executors(total).await
    }

    async fn request_total_executors(&self, total: i64) -> ExecutionResult<()> {
        if total < 0 {
            return Err(ExecutionError::InvalidArgument(format!(
                "cannot request a negative total number of executors: {total}"
            )));
        }
        let total = self.registry.note_total_executors(total as usize);
        self.manager.request_total_executors(total).await
    }

    async fn kill_executors(&self, executor_ids: &[ExecutorId]) -> ExecutionResult<()> {
        let (filtered, total) = self.registry.note_killed_executors(executor_ids);
        if filtered.is_empty() {
            warn!("none of the executors to kill are registered");
            return Ok(());
        }
        self.manager.request_total_executors(total).await?;
        self.manager.kill_executors(&filtered).await
    }

    fn is_ready(&self) -> bool {
        if self.sufficient_resources_registered() {
            return true;
        }
        if self.create_time.elapsed() >= self.max_registered_waiting_time {
            info!(
                "scheduler backend is ready after waiting the maximum registration time ({:?})",
                self.max_registered_waiting_time
            );
            return true;
        }
        false
    }

    async fn remove_executor(
        &self,
        executor_id: ExecutorId,
        reason: String,
    ) -> ExecutionResult<()> {
        self.ask(|result| DriverEvent::RemoveExecutor {
            executor_id: executor_id.clone(),
            reason: reason.clone(),
            result: Some(result),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProstTaskCodec;
    use crate::driver::ExecutorData;
    use crate::executor::ExecutorClient;
    use crate::rpc::ClientOptions;
    use crate::scheduler::FifoTaskScheduler;

    #[derive(Default)]
    struct RecordingManager {
        totals: Mutex<Vec<usize>>,
        killed: Mutex<Vec<ExecutorId>>,
    }

    #[tonic::async_trait]
    impl ExecutorManager for RecordingManager {
        async fn request_total_executors(&self, total: usize) -> ExecutionResult<()> {
            self.totals.lock().unwrap().push(total);
            Ok(())
        }

        async fn kill_executors(&self, executor_ids: &[ExecutorId]) -> ExecutionResult<()> {
            self.killed.lock().unwrap().extend(executor_ids.iter().cloned());
            Ok(())
        }

        async fn stop(&self) -> ExecutionResult<()> {
            Ok(())
        }
    }

    fn backend_with_manager() -> (CoarseSchedulerBackend, Arc<RecordingManager>) {
        let config = AppConfig::load().unwrap();
        let manager = Arc::new(RecordingManager::default());
        let backend = CoarseSchedulerBackend::new(
            config,
            Arc::new(FifoTaskScheduler::new(1)),
            manager.clone(),
            Arc::new(ProstTaskCodec),
            Arc::new(EventBus::new()),
        );
        (backend, manager)
    }

    fn register(backend: &CoarseSchedulerBackend, executor_id: &str, cores: usize) {
        let client = ExecutorClient::new(ClientOptions {
            enable_tls: false,
            host: "127.0.0.1".to_string(),
            port: 1,
        });
        backend
            .registry()
            .insert(
                ExecutorId::from(executor_id),
                ExecutorData::new("host".to_string(), 1, cores, vec![], client),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_request_then_kill_executor_targets() {
        let (backend, manager) = backend_with_manager();
        register(&backend, "e1", 2);
        register(&backend, "e2", 2);
        backend.request_executors(3).await.unwrap();
        backend
            .kill_executors(&[ExecutorId::from("e1")])
            .await
            .unwrap();
        // existing + pending - pending_removal, then minus the killed one
        assert_eq!(*manager.totals.lock().unwrap(), vec![5, 4]);
        assert_eq!(*manager.killed.lock().unwrap(), vec![ExecutorId::from("e1")]);
        assert!(backend.registry().is_pending_removal(&ExecutorId::from("e1")));
    }

    #[tokio::test]
    async fn test_negative_allocation_arguments_are_rejected() {
        let (backend, manager) = backend_with_manager();
        assert!(matches!(
            backend.request_executors(-1).await,
            Err(ExecutionError::InvalidArgument(_))
        ));
        assert!(matches!(
            backend.request_total_executors(-5).await,
            Err(ExecutionError::InvalidArgument(_))
        ));
        assert!(manager.totals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_parallelism_floor() {
        let (backend, _) = backend_with_manager();
        assert_eq!(backend.default_parallelism(), 2);
        register(&backend, "e1", 8);
        assert_eq!(backend.default_parallelism(), 8);
    }

    #[tokio::test]
    async fn test_is_ready_with_zero_ratio() {
        let (backend, _) = backend_with_manager();
        assert!(backend.is_ready());
    }

    #[tokio::test]
    async fn test_asks_fail_without_a_driver() {
        let (backend, _) = backend_with_manager();
        assert!(matches!(
            backend.revive_offers().await,
            Err(ExecutionError::SchedulerCommunication(_))
        ));
        assert!(matches!(
            backend
                .remove_executor(ExecutorId::from("e1"), "test".to_string())
                .await,
            Err(ExecutionError::SchedulerCommunication(_))
        ));
    }
}
