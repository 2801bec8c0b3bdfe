use ballast_server::actor::ActorHandle;
use log::debug;
use tonic::{Request, Response, Status};

use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::actor::ExecutorActor;
use crate::executor::ExecutorEvent;
use crate::gen;
use crate::gen::executor_service_server::ExecutorService;
use crate::id::{ExecutorId, TaskId};

pub struct ExecutorServer {
    handle: ActorHandle<ExecutorActor>,
}

impl ExecutorServer {
    pub fn new(handle: ActorHandle<ExecutorActor>) -> Self {
        Self { handle }
    }

    async fn send(&self, event: ExecutorEvent) -> Result<(), Status> {
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        Ok(())
    }
}

#[tonic::async_trait]
impl ExecutorService for ExecutorServer {
    async fn launch_task(
        &self,
        request: Request<gen::LaunchTaskRequest>,
    ) -> Result<Response<gen::LaunchTaskResponse>, Status> {
        let gen::LaunchTaskRequest { task } = request.into_inner();
        self.send(ExecutorEvent::LaunchTask { data: task }).await?;
        Ok(Response::new(gen::LaunchTaskResponse {}))
    }

    async fn kill_task(
        &self,
        request: Request<gen::KillTaskRequest>,
    ) -> Result<Response<gen::KillTaskResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::KillTaskRequest { task_id, interrupt } = request;
        self.send(ExecutorEvent::KillTask {
            task_id: TaskId::from(task_id),
            interrupt,
        })
        .await?;
        Ok(Response::new(gen::KillTaskResponse {}))
    }

    async fn stop_executor(
        &self,
        request: Request<gen::StopExecutorRequest>,
    ) -> Result<Response<gen::StopExecutorResponse>, Status> {
        let gen::StopExecutorRequest {} = request.into_inner();
        self.send(ExecutorEvent::Shutdown).await?;
        Ok(Response::new(gen::StopExecutorResponse {}))
    }

    async fn remove_fetch(
        &self,
        request: Request<gen::RemoveFetchRequest>,
    ) -> Result<Response<gen::RemoveFetchResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::RemoveFetchRequest {
            next_executor_id,
            next_task_id,
            task_id,
            blocks,
        } = request;
        let blocks = blocks
            .into_iter()
            .map(|set| {
                let block_manager = set
                    .block_manager
                    .ok_or_else(|| {
                        ExecutionError::InvalidArgument("missing block manager".to_string())
                    })?
                    .try_into()?;
                let block_ids = set.block_ids.into_iter().map(Into::into).collect();
                Ok((block_manager, block_ids))
            })
            .collect::<ExecutionResult<Vec<_>>>()?;
        self.send(ExecutorEvent::RemoveFetch {
            next_executor_id: ExecutorId::from(next_executor_id),
            next_task_id: TaskId::from(next_task_id),
            task_id: TaskId::from(task_id),
            blocks,
        })
        .await?;
        Ok(Response::new(gen::RemoveFetchResponse {}))
    }

    async fn add_fetch(
        &self,
        request: Request<gen::AddFetchRequest>,
    ) -> Result<Response<gen::AddFetchResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::AddFetchRequest { task_id, blocks } = request;
        let blocks = blocks
            .into_iter()
            .map(|x| x.try_into())
            .collect::<ExecutionResult<Vec<_>>>()?;
        self.send(ExecutorEvent::AddFetch {
            task_id: TaskId::from(task_id),
            blocks,
        })
        .await?;
        Ok(Response::new(gen::AddFetchResponse {}))
    }

    async fn move_fetch_results(
        &self,
        request: Request<gen::MoveFetchResultsRequest>,
    ) -> Result<Response<gen::MoveFetchResultsResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::MoveFetchResultsRequest {
            block_ids,
            from_task_id,
            to_task_id,
        } = request;
        self.send(ExecutorEvent::MoveFetchResults {
            block_ids: block_ids.into_iter().map(Into::into).collect(),
            from_task: TaskId::from(from_task_id),
            to_task: TaskId::from(to_task_id),
        })
        .await?;
        Ok(Response::new(gen::MoveFetchResultsResponse {}))
    }

    async fn lock_task(
        &self,
        request: Request<gen::LockTaskRequest>,
    ) -> Result<Response<gen::LockTaskResponse>, Status> {
        let gen::LockTaskRequest { task_id } = request.into_inner();
        self.send(ExecutorEvent::LockTask {
            task_id: TaskId::from(task_id),
        })
        .await?;
        Ok(Response::new(gen::LockTaskResponse {}))
    }

    async fn unlock_task(
        &self,
        request: Request<gen::UnlockTaskRequest>,
    ) -> Result<Response<gen::UnlockTaskResponse>, Status> {
        let gen::UnlockTaskRequest { task_id } = request.into_inner();
        self.send(ExecutorEvent::UnlockTask {
            task_id: TaskId::from(task_id),
        })
        .await?;
        Ok(Response::new(gen::UnlockTaskResponse {}))
    }
}
