use tonic::transport::Channel;

use crate::block::{BlockInfo, BlockManagerId};
use crate::error::ExecutionResult;
use crate::gen;
use crate::gen::executor_service_client::ExecutorServiceClient;
use crate::id::{BlockId, ExecutorId, TaskId};
use crate::rpc::{ClientHandle, ClientOptions};

/// The driver-side client for one executor's service.
#[derive(Debug, Clone)]
pub struct ExecutorClient {
    inner: ClientHandle<ExecutorServiceClient<Channel>>,
}

impl ExecutorClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            inner: ClientHandle::new(options),
        }
    }

    pub async fn launch_task(&self, task: Vec<u8>) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::LaunchTaskRequest { task });
        let response = self.inner.get().await?.launch_task(request).await?;
        let gen::LaunchTaskResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn kill_task(&self, task_id: TaskId, interrupt: bool) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::KillTaskRequest {
            task_id: task_id.into(),
            interrupt,
        });
        let response = self.inner.get().await?.kill_task(request).await?;
        let gen::KillTaskResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn stop_executor(&self) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::StopExecutorRequest {});
        let response = self.inner.get().await?.stop_executor(request).await?;
        let gen::StopExecutorResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn remove_fetch(
        &self,
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        task_id: TaskId,
        blocks: Vec<(BlockManagerId, Vec<BlockId>)>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::RemoveFetchRequest {
            next_executor_id: next_executor_id.into(),
            next_task_id: next_task_id.into(),
            task_id: task_id.into(),
            blocks: blocks
                .into_iter()
                .map(|(block_manager, block_ids)| gen::HostBlockSet {
                    block_manager: Some(block_manager.into()),
                    block_ids: block_ids.into_iter().map(|x| x.into()).collect(),
                })
                .collect(),
        });
        let response = self.inner.get().await?.remove_fetch(request).await?;
        let gen::RemoveFetchResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn add_fetch(
        &self,
        task_id: TaskId,
        blocks: Vec<BlockInfo>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::AddFetchRequest {
            task_id: task_id.into(),
            blocks: blocks.into_iter().map(|x| x.into()).collect(),
        });
        let response = self.inner.get().await?.add_fetch(request).await?;
        let gen::AddFetchResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn move_fetch_results(
        &self,
        block_ids: Vec<BlockId>,
        from_task: TaskId,
        to_task: TaskId,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::MoveFetchResultsRequest {
            block_ids: block_ids.into_iter().map(|x| x.into()).collect(),
            from_task_id: from_task.into(),
            to_task_id: to_task.into(),
        });
        let response = self.inner.get().await?.move_fetch_results(request).await?;
        let gen::MoveFetchResultsResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn lock_task(&self, task_id: TaskId) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::LockTaskRequest {
            task_id: task_id.into(),
        });
        let response = self.inner.get().await?.lock_task(request).await?;
        let gen::LockTaskResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn unlock_task(&self, task_id: TaskId) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::UnlockTaskRequest {
            task_id: task_id.into(),
        });
        let response = self.inner.get().await?.unlock_task(request).await?;
        let gen::UnlockTaskResponse {} = response.into_inner();
        Ok(())
    }
}
