use std::mem;

use ballast_server::actor::{Actor, ActorAction, ActorContext};
use log::info;

use crate::driver::DriverClient;
use crate::executor::actor::{ExecutorActor, ExecutorLifecycle};
use crate::executor::{ExecutorEvent, ExecutorOptions};
use crate::rpc::{ClientOptions, ServerMonitor};

#[tonic::async_trait]
impl Actor for ExecutorActor {
    type Message = ExecutorEvent;
    type Options = ExecutorOptions;

    fn name() -> &'static str {
        "ExecutorActor"
    }

    fn new(options: ExecutorOptions) -> Self {
        let driver_client = DriverClient::new(ClientOptions {
            enable_tls: false,
            host: options.driver_host.clone(),
            port: options.driver_port,
        });
        Self {
            options,
            server: ServerMonitor::new(),
            driver_client,
            lifecycle: ExecutorLifecycle::Connecting,
            runner: None,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        let addr = (
            self.options.listen_host.clone(),
            self.options.listen_port,
        );
        let server = mem::take(&mut self.server);
        self.server = server.start(Self::serve(ctx.handle().clone(), addr)).await;
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: ExecutorEvent) -> ActorAction {
        match message {
            ExecutorEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            ExecutorEvent::RegisteredExecutor => self.handle_registered_executor(ctx),
            ExecutorEvent::StartHeartbeat => self.handle_start_heartbeat(ctx),
            ExecutorEvent::LaunchTask { data } => self.handle_launch_task(ctx, data),
            ExecutorEvent::KillTask { task_id, interrupt } => {
                self.handle_kill_task(ctx, task_id, interrupt)
            }
            ExecutorEvent::RemoveFetch {
                next_executor_id,
                next_task_id,
                task_id,
                blocks,
            } => self.handle_remove_fetch(ctx, next_executor_id, next_task_id, task_id, blocks),
            ExecutorEvent::AddFetch { task_id, blocks } => {
                self.handle_add_fetch(ctx, task_id, blocks)
            }
            ExecutorEvent::MoveFetchResults {
                block_ids,
                from_task,
                to_task,
            } => self.handle_move_fetch_results(ctx, block_ids, from_task, to_task),
            ExecutorEvent::LockTask { task_id } => self.handle_lock_task(ctx, task_id),
            ExecutorEvent::UnlockTask { task_id } => self.handle_unlock_task(ctx, task_id),
            ExecutorEvent::TaskFinished {
                task_id,
                state,
                data,
            } => self.handle_task_finished(ctx, task_id, state, data),
            ExecutorEvent::Shutdown => {
                self.lifecycle = ExecutorLifecycle::Stopping;
                ActorAction::Stop
            }
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {
        self.server.stop().await;
        info!("executor {} server has stopped", self.options.executor_id);
    }
}
