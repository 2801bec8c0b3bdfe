use ballast_server::actor::ActorHandle;
use log::debug;
use tokio::sync::oneshot;
use tonic::{Request, Response, Status};

use crate::driver::{DriverActor, DriverEvent};
use crate::error::{ExecutionError, ExecutionResult};
use crate::gen;
use crate::gen::driver_service_server::DriverService;
use crate::id::{ExecutorId, TaskId};
use crate::task::TaskState;

pub struct DriverServer {
    handle: ActorHandle<DriverActor>,
    properties: Vec<(String, String)>,
}

impl DriverServer {
    pub fn new(handle: ActorHandle<DriverActor>, properties: Vec<(String, String)>) -> Self {
        Self { handle, properties }
    }

    async fn send(&self, event: DriverEvent) -> Result<(), Status> {
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        Ok(())
    }
}

#[tonic::async_trait]
impl DriverService for DriverServer {
    async fn register_executor(
        &self,
        request: Request<gen::RegisterExecutorRequest>,
    ) -> Result<Response<gen::RegisterExecutorResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::RegisterExecutorRequest {
            executor_id,
            host,
            port,
            cores,
            log_urls,
        } = request;
        let port = u16::try_from(port).map_err(|_| {
            Status::invalid_argument("port must be a valid 16-bit unsigned integer")
        })?;
        let (tx, rx) = oneshot::channel();
        let event = DriverEvent::RegisterExecutor {
            executor_id: ExecutorId::from(executor_id),
            host,
            port,
            cores: cores as usize,
            log_urls: log_urls.into_iter().map(|x| (x.name, x.url)).collect(),
            result: tx,
        };
        self.send(event).await?;
        rx.await.map_err(ExecutionError::from)??;
        let response = gen::RegisterExecutorResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }

    async fn heartbeat(
        &self,
        request: Request<gen::HeartbeatRequest>,
    ) -> Result<Response<gen::HeartbeatResponse>, Status> {
        let gen::HeartbeatRequest { executor_id } = request.into_inner();
        self.send(DriverEvent::ExecutorHeartbeat {
            executor_id: ExecutorId::from(executor_id),
        })
        .await?;
        Ok(Response::new(gen::HeartbeatResponse {}))
    }

    async fn report_task_status(
        &self,
        request: Request<gen::ReportTaskStatusRequest>,
    ) -> Result<Response<gen::ReportTaskStatusResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::ReportTaskStatusRequest {
            executor_id,
            task_id,
            state,
            data,
        } = request;
        let state = gen::TaskState::try_from(state)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let state = TaskState::try_from(state)?;
        let event = DriverEvent::ReportTaskStatus {
            executor_id: ExecutorId::from(executor_id),
            task_id: TaskId::from(task_id),
            state,
            data,
        };
        self.send(event).await?;
        Ok(Response::new(gen::ReportTaskStatusResponse {}))
    }

    async fn register_task(
        &self,
        request: Request<gen::RegisterTaskRequest>,
    ) -> Result<Response<gen::RegisterTaskResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::RegisterTaskRequest {
            task_id,
            executor_id,
            blocks,
        } = request;
        let blocks = blocks
            .into_iter()
            .map(|x| x.try_into())
            .collect::<ExecutionResult<Vec<_>>>()?;
        let event = DriverEvent::RegisterTask {
            task_id: TaskId::from(task_id),
            executor_id: ExecutorId::from(executor_id),
            blocks,
        };
        self.send(event).await?;
        Ok(Response::new(gen::RegisterTaskResponse {}))
    }

    async fn report_block_statuses(
        &self,
        request: Request<gen::ReportBlockStatusesRequest>,
    ) -> Result<Response<gen::ReportBlockStatusesResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::ReportBlockStatusesRequest {
            task_id,
            updates,
            new_task_id,
        } = request;
        let updates = updates
            .into_iter()
            .map(|x| x.try_into())
            .collect::<ExecutionResult<Vec<_>>>()?;
        let event = DriverEvent::ReportBlockStatuses {
            task_id: TaskId::from(task_id),
            updates,
            new_task_id: new_task_id.map(TaskId::from),
        };
        self.send(event).await?;
        Ok(Response::new(gen::ReportBlockStatusesResponse {}))
    }

    async fn report_task_finished(
        &self,
        request: Request<gen::ReportTaskFinishedRequest>,
    ) -> Result<Response<gen::ReportTaskFinishedResponse>, Status> {
        let gen::ReportTaskFinishedRequest { task_id } = request.into_inner();
        self.send(DriverEvent::ReportTaskFinished {
            task_id: TaskId::from(task_id),
        })
        .await?;
        Ok(Response::new(gen::ReportTaskFinishedResponse {}))
    }

    async fn report_task_compute_speed(
        &self,
        request: Request<gen::ReportTaskComputeSpeedRequest>,
    ) -> Result<Response<gen::ReportTaskComputeSpeedResponse>, Status> {
        let gen::ReportTaskComputeSpeedRequest {
            task_id,
            executor_id,
            bytes_per_ms,
        } = request.into_inner();
        self.send(DriverEvent::ReportTaskComputeSpeed {
            task_id: TaskId::from(task_id),
            executor_id: ExecutorId::from(executor_id),
            bytes_per_ms,
        })
        .await?;
        Ok(Response::new(gen::ReportTaskComputeSpeedResponse {}))
    }

    async fn report_block_download_speed(
        &self,
        request: Request<gen::ReportBlockDownloadSpeedRequest>,
    ) -> Result<Response<gen::ReportBlockDownloadSpeedResponse>, Status> {
        let gen::ReportBlockDownloadSpeedRequest {
            from_executor_id,
            to_executor_id,
            bytes_per_ms,
        } = request.into_inner();
        self.send(DriverEvent::ReportBlockDownloadSpeed {
            from_executor_id: ExecutorId::from(from_executor_id),
            to_executor_id: ExecutorId::from(to_executor_id),
            bytes_per_ms,
        })
        .await?;
        Ok(Response::new(gen::ReportBlockDownloadSpeedResponse {}))
    }

    async fn transfer_removed_fetch(
        &self,
        request: Request<gen::TransferRemovedFetchRequest>,
    ) -> Result<Response<gen::TransferRemovedFetchResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::TransferRemovedFetchRequest {
            next_executor_id,
            next_task_id,
            blocks,
        } = request;
        let blocks = blocks
            .into_iter()
            .map(|x| x.try_into())
            .collect::<ExecutionResult<Vec<_>>>()?;
        let event = DriverEvent::TransferRemovedFetch {
            next_executor_id: ExecutorId::from(next_executor_id),
            next_task_id: TaskId::from(next_task_id),
            blocks,
        };
        self.send(event).await?;
        Ok(Response::new(gen::TransferRemovedFetchResponse {}))
    }

    async fn retrieve_properties(
        &self,
        _request: Request<gen::RetrievePropertiesRequest>,
    ) -> Result<Response<gen::RetrievePropertiesResponse>, Status> {
        let properties = self
            .properties
            .iter()
            .map(|(key, value)| gen::PropertyPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok(Response::new(gen::RetrievePropertiesResponse {
            properties,
        }))
    }
}
