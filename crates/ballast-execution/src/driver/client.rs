use tonic::transport::Channel;

use crate::block::{BlockInfo, BlockStatusUpdate};
use crate::error::ExecutionResult;
use crate::gen;
use crate::gen::driver_service_client::DriverServiceClient;
use crate::id::{ExecutorId, TaskId};
use crate::rpc::{ClientHandle, ClientOptions};
use crate::task::TaskState;

/// The executor-side client for the driver service.
#[derive(Debug, Clone)]
pub struct DriverClient {
    inner: ClientHandle<DriverServiceClient<Channel>>,
}

impl DriverClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            inner: ClientHandle::new(options),
        }
    }

    pub async fn register_executor(
        &self,
        executor_id: ExecutorId,
        host: String,
        port: u16,
        cores: usize,
        log_urls: Vec<(String, String)>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::RegisterExecutorRequest {
            executor_id: executor_id.into(),
            host,
            port: port as u32,
            cores: cores as u32,
            log_urls: log_urls
                .into_iter()
                .map(|(name, url)| gen::LogUrl { name, url })
                .collect(),
        });
        let response = self.inner.get().await?.register_executor(request).await?;
        let gen::RegisterExecutorResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn heartbeat(&self, executor_id: ExecutorId) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::HeartbeatRequest {
            executor_id: executor_id.into(),
        });
        let response = self.inner.get().await?.heartbeat(request).await?;
        let gen::HeartbeatResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn report_task_status(
        &self,
        executor_id: ExecutorId,
        task_id: TaskId,
        state: TaskState,
        data: Vec<u8>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::ReportTaskStatusRequest {
            executor_id: executor_id.into(),
            task_id: task_id.into(),
            state: gen::TaskState::from(state) as i32,
            data,
        });
        let response = self.inner.get().await?.report_task_status(request).await?;
        let gen::ReportTaskStatusResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn register_task(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<BlockInfo>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::RegisterTaskRequest {
            task_id: task_id.into(),
            executor_id: executor_id.into(),
            blocks: blocks.into_iter().map(|x| x.into()).collect(),
        });
        let response = self.inner.get().await?.register_task(request).await?;
        let gen::RegisterTaskResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn report_block_statuses(
        &self,
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::ReportBlockStatusesRequest {
            task_id: task_id.into(),
            updates: updates.into_iter().map(|x| x.into()).collect(),
            new_task_id: new_task_id.map(|x| x.into()),
        });
        let response = self.inner.get().await?.report_block_statuses(request).await?;
        let gen::ReportBlockStatusesResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn report_task_finished(&self, task_id: TaskId) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::ReportTaskFinishedRequest {
            task_id: task_id.into(),
        });
        let response = self.inner.get().await?.report_task_finished(request).await?;
        let gen::ReportTaskFinishedResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn report_task_compute_speed(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
        bytes_per_ms: f64,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::ReportTaskComputeSpeedRequest {
            task_id: task_id.into(),
            executor_id: executor_id.into(),
            bytes_per_ms,
        });
        let response = self
            .inner
            .get()
            .await?
            .report_task_compute_speed(request)
            .await?;
        let gen::ReportTaskComputeSpeedResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn report_block_download_speed(
        &self,
        from_executor_id: ExecutorId,
        to_executor_id: ExecutorId,
        bytes_per_ms: f64,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::ReportBlockDownloadSpeedRequest {
            from_executor_id: from_executor_id.into(),
            to_executor_id: to_executor_id.into(),
            bytes_per_ms,
        });
        let response = self
            .inner
            .get()
            .await?
            .report_block_download_speed(request)
            .await?;
        let gen::ReportBlockDownloadSpeedResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn transfer_removed_fetch(
        &self,
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        blocks: Vec<BlockInfo>,
    ) -> ExecutionResult<()> {
        let request = tonic::Request::new(gen::TransferRemovedFetchRequest {
            next_executor_id: next_executor_id.into(),
            next_task_id: next_task_id.into(),
            blocks: blocks.into_iter().map(|x| x.into()).collect(),
        });
        let response = self
            .inner
            .get()
            .await?
            .transfer_removed_fetch(request)
            .await?;
        let gen::TransferRemovedFetchResponse {} = response.into_inner();
        Ok(())
    }

    pub async fn retrieve_properties(&self) -> ExecutionResult<Vec<(String, String)>> {
        let request = tonic::Request::new(gen::RetrievePropertiesRequest {});
        let response = self.inner.get().await?.retrieve_properties(request).await?;
        let gen::RetrievePropertiesResponse { properties } = response.into_inner();
        Ok(properties
            .into_iter()
            .map(|pair| (pair.key, pair.value))
            .collect())
    }
}
