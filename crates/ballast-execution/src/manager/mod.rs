mod local;

pub use local::LocalExecutorManager;

use log::info;

use crate::error::ExecutionResult;
use crate::id::ExecutorId;

/// The cluster-manager seam. The scheduler backend funnels its executor
/// allocation decisions through this trait; how executors are provisioned
/// (in-process, separate processes, a resource manager) stays behind it.
#[tonic::async_trait]
pub trait ExecutorManager: Send + Sync {
    /// Called when the driver server is reachable, with the address
    /// executors should register against.
    fn notify_driver_endpoint(&self, _host: &str, _port: u16) {}

    /// Bring the executor fleet to the given total.
    async fn request_total_executors(&self, total: usize) -> ExecutionResult<()>;

    /// Tear down the named executors.
    async fn kill_executors(&self, executor_ids: &[ExecutorId]) -> ExecutionResult<()>;

    async fn stop(&self) -> ExecutionResult<()>;
}

/// A manager for deployments where executors are provisioned out of band.
/// Allocation requests are recorded in the log and otherwise ignored.
#[derive(Debug, Default)]
pub struct UnmanagedExecutorManager;

#[tonic::async_trait]
impl ExecutorManager for UnmanagedExecutorManager {
    async fn request_total_executors(&self, total: usize) -> ExecutionResult<()> {
        info!("ignoring request for {total} executors; executors are managed externally");
        Ok(())
    }

    async fn kill_executors(&self, executor_ids: &[ExecutorId]) -> ExecutionResult<()> {
        info!(
            "ignoring kill request for {} executors; executors are managed externally",
            executor_ids.len()
        );
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        Ok(())
    }
}
