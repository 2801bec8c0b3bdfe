use std::mem;
use std::sync::{Arc, OnceLock};

use ballast_server::actor::{ActorAction, ActorContext, ActorHandle};
use log::{error, info, warn};
use tokio::sync::oneshot;

use crate::block::{BlockInfo, BlockManagerId};
use crate::executor::actor::{ExecutorActor, ExecutorLifecycle};
use crate::executor::task_runner::TaskRunner;
use crate::executor::ExecutorEvent;
use crate::id::{BlockId, ExecutorId, TaskId};
use crate::task::TaskState;

impl ExecutorActor {
    pub(super) fn handle_server_ready(
        &mut self,
        ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> ActorAction {
        let executor_id = self.options.executor_id.clone();
        info!("executor {executor_id} server is ready on port {port}");
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal, port) {
            Ok(x) => x,
            Err(e) => {
                error!("{e}");
                return ActorAction::Stop;
            }
        };
        let host = self.options.external_host.clone();
        let port = if self.options.external_port > 0 {
            self.options.external_port
        } else {
            port
        };
        let cores = self.options.cores;
        let log_urls = self.options.log_urls.clone();
        let retry = self.options.rpc_retry_strategy.clone();
        let client = self.driver_client.clone();
        let handle = ctx.handle().clone();
        let fatal = self.options.fatal.clone();
        ctx.spawn(async move {
            match client.retrieve_properties().await {
                Ok(properties) => {
                    info!("retrieved {} driver properties", properties.len());
                }
                Err(e) => {
                    warn!("failed to retrieve driver properties: {e}");
                }
            }
            let out = retry
                .run(|| {
                    let client = client.clone();
                    let executor_id = executor_id.clone();
                    let host = host.clone();
                    let log_urls = log_urls.clone();
                    async move {
                        client
                            .register_executor(executor_id, host, port, cores, log_urls)
                            .await
                    }
                })
                .await;
            match out {
                Ok(()) => {
                    let _ = handle.send(ExecutorEvent::RegisteredExecutor).await;
                }
                Err(e) => {
                    fail(
                        fatal,
                        handle,
                        format!("failed to register with the driver: {e}"),
                    )
                    .await;
                }
            }
        });
        ActorAction::Continue
    }

    pub(super) fn handle_registered_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> ActorAction {
        info!("executor {} is registered", self.options.executor_id);
        self.lifecycle = ExecutorLifecycle::Registered;
        self.runner = Some(TaskRunner::new(
            self.options.executor_id.clone(),
            self.driver_client.clone(),
            self.options.fetcher.clone(),
            self.options.processor.clone(),
            self.options.rpc_retry_strategy.clone(),
        ));
        ctx.send(ExecutorEvent::StartHeartbeat);
        ActorAction::Continue
    }

    pub(super) fn handle_start_heartbeat(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        self.lifecycle = ExecutorLifecycle::Running;
        let executor_id = self.options.executor_id.clone();
        let client = self.driver_client.clone();
        let interval = self.options.heartbeat_interval;
        let retry = self.options.rpc_retry_strategy.clone();
        let handle = ctx.handle().clone();
        let fatal = self.options.fatal.clone();
        ctx.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let out = retry
                    .run(|| {
                        let client = client.clone();
                        let executor_id = executor_id.clone();
                        async move { client.heartbeat(executor_id).await }
                    })
                    .await;
                if let Err(e) = out {
                    // A driver that cannot be reached after retries is gone.
                    fail(fatal, handle, format!("lost contact with the driver: {e}")).await;
                    break;
                }
            }
        });
        ActorAction::Continue
    }

    pub(super) fn handle_launch_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        data: Vec<u8>,
    ) -> ActorAction {
        let task = match self.options.codec.decode(&data) {
            Ok(task) => task,
            Err(e) => {
                error!("failed to decode task description: {e}");
                return ActorAction::Continue;
            }
        };
        if self.lifecycle != ExecutorLifecycle::Running {
            warn!(
                "received a task while the executor is {:?}",
                self.lifecycle
            );
        }
        let Some(runner) = self.runner.as_mut() else {
            return self.fatal_stop("received a task before the task runner exists");
        };
        info!("launching task {} ({})", task.task_id, task.name);
        runner.run_task(ctx, task);
        ActorAction::Continue
    }

    pub(super) fn handle_kill_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        interrupt: bool,
    ) -> ActorAction {
        let Some(runner) = self.runner.as_mut() else {
            return self.fatal_stop("received a kill command before the task runner exists");
        };
        runner.kill_task(task_id, interrupt);
        ActorAction::Continue
    }

    pub(super) fn handle_remove_fetch(
        &mut self,
        ctx: &mut ActorContext<Self>,
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        task_id: TaskId,
        blocks: Vec<(BlockManagerId, Vec<BlockId>)>,
    ) -> ActorAction {
        let Some(runner) = self.runner.as_mut() else {
            warn!("no task runner for remove-fetch command");
            return ActorAction::Continue;
        };
        let removed = runner.remove_fetch(task_id, &blocks);
        if removed.is_empty() {
            return ActorAction::Continue;
        }
        let client = self.driver_client.clone();
        ctx.spawn(async move {
            if let Err(e) = client
                .transfer_removed_fetch(next_executor_id, next_task_id, removed)
                .await
            {
                warn!("failed to hand removed fetches back to the driver: {e}");
            }
        });
        ActorAction::Continue
    }

    pub(super) fn handle_add_fetch(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        blocks: Vec<BlockInfo>,
    ) -> ActorAction {
        match self.runner.as_mut() {
            Some(runner) => runner.add_fetch(task_id, blocks),
            None => warn!("no task runner for add-fetch command"),
        }
        ActorAction::Continue
    }

    pub(super) fn handle_move_fetch_results(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        block_ids: Vec<BlockId>,
        from_task: TaskId,
        to_task: TaskId,
    ) -> ActorAction {
        match self.runner.as_mut() {
            Some(runner) => runner.move_results(&block_ids, from_task, to_task),
            None => warn!("no task runner for move-results command"),
        }
        ActorAction::Continue
    }

    pub(super) fn handle_lock_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
    ) -> ActorAction {
        if let Some(runner) = self.runner.as_mut() {
            runner.set_locked(task_id, true);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_unlock_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
    ) -> ActorAction {
        if let Some(runner) = self.runner.as_mut() {
            runner.set_locked(task_id, false);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_task_finished(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        state: TaskState,
        data: Vec<u8>,
    ) -> ActorAction {
        if let Some(runner) = self.runner.as_mut() {
            runner.finish_task(task_id);
        }
        info!("task {task_id} finished with state {state}");
        let executor_id = self.options.executor_id.clone();
        let client = self.driver_client.clone();
        let retry = self.options.rpc_retry_strategy.clone();
        let handle = ctx.handle().clone();
        let fatal = self.options.fatal.clone();
        ctx.spawn(async move {
            if let Err(e) = client.report_task_finished(task_id).await {
                warn!("failed to report task {task_id} as finished: {e}");
            }
            let out = retry
                .run(|| {
                    let client = client.clone();
                    let executor_id = executor_id.clone();
                    let data = data.clone();
                    async move {
                        client
                            .report_task_status(executor_id, task_id, state, data)
                            .await
                    }
                })
                .await;
            if let Err(e) = out {
                // The driver must see terminal statuses to free the task's
                // cores; failing to deliver one means the driver is gone.
                fail(
                    fatal,
                    handle,
                    format!("failed to report the status of task {task_id}: {e}"),
                )
                .await;
            }
        });
        ActorAction::Continue
    }

    fn fatal_stop(&mut self, message: &str) -> ActorAction {
        error!("{message}");
        let _ = self.options.fatal.set(message.to_string());
        ActorAction::Stop
    }
}

async fn fail(
    fatal: Arc<OnceLock<String>>,
    handle: ActorHandle<ExecutorActor>,
    message: String,
) {
    error!("{message}");
    let _ = fatal.set(message);
    let _ = handle.send(ExecutorEvent::Shutdown).await;
}
