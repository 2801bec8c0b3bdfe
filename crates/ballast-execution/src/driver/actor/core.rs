use std::collections::{HashMap, HashSet};
use std::mem;

use ballast_server::actor::{Actor, ActorAction, ActorContext};
use log::{error, info};

use crate::driver::actor::DriverActor;
use crate::driver::{DriverEvent, DriverOptions};
use crate::rpc::ServerMonitor;

#[tonic::async_trait]
impl Actor for DriverActor {
    type Message = DriverEvent;
    type Options = DriverOptions;

    fn name() -> &'static str {
        "DriverActor"
    }

    fn new(options: DriverOptions) -> Self {
        Self {
            options,
            server: ServerMonitor::new(),
            skew_masters: HashMap::new(),
            launched_tasks: HashMap::new(),
            aborted_task_sets: HashSet::new(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        let addr = (
            self.options.listen_host.clone(),
            self.options.listen_port,
        );
        let properties = self.options.properties.clone();
        let server = mem::take(&mut self.server);
        self.server = server
            .start(Self::serve(ctx.handle().clone(), addr, properties))
            .await;
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: DriverEvent) -> ActorAction {
        match message {
            DriverEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            DriverEvent::RegisterExecutor {
                executor_id,
                host,
                port,
                cores,
                log_urls,
                result,
            } => self.handle_register_executor(ctx, executor_id, host, port, cores, log_urls, result),
            DriverEvent::ExecutorHeartbeat { executor_id } => {
                self.handle_executor_heartbeat(ctx, executor_id)
            }
            DriverEvent::ProbeLostExecutor {
                executor_id,
                instant,
            } => self.handle_probe_lost_executor(ctx, executor_id, instant),
            DriverEvent::ReportTaskStatus {
                executor_id,
                task_id,
                state,
                data,
            } => self.handle_report_task_status(ctx, executor_id, task_id, state, data),
            DriverEvent::ReviveOffers => self.handle_revive_offers(ctx),
            DriverEvent::KillTask {
                task_id,
                executor_id,
                interrupt,
            } => self.handle_kill_task(ctx, task_id, executor_id, interrupt),
            DriverEvent::RemoveExecutor {
                executor_id,
                reason,
                result,
            } => self.handle_remove_executor(ctx, executor_id, reason, result),
            DriverEvent::StopExecutors { result } => self.handle_stop_executors(ctx, result),
            DriverEvent::StopDriver { result } => self.handle_stop_driver(ctx, result),
            DriverEvent::RegisterTask {
                task_id,
                executor_id,
                blocks,
            } => self.handle_register_task(ctx, task_id, executor_id, blocks),
            DriverEvent::ReportBlockStatuses {
                task_id,
                updates,
                new_task_id,
            } => self.handle_report_block_statuses(ctx, task_id, updates, new_task_id),
            DriverEvent::ReportTaskFinished { task_id } => {
                self.handle_report_task_finished(ctx, task_id)
            }
            DriverEvent::ReportTaskComputeSpeed {
                task_id,
                executor_id,
                bytes_per_ms,
            } => self.handle_report_task_compute_speed(ctx, task_id, executor_id, bytes_per_ms),
            DriverEvent::ReportBlockDownloadSpeed {
                from_executor_id,
                to_executor_id,
                bytes_per_ms,
            } => self.handle_report_block_download_speed(
                ctx,
                from_executor_id,
                to_executor_id,
                bytes_per_ms,
            ),
            DriverEvent::TransferRemovedFetch {
                next_executor_id,
                next_task_id,
                blocks,
            } => self.handle_transfer_removed_fetch(ctx, next_executor_id, next_task_id, blocks),
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {
        if let Err(e) = self.options.manager.stop().await {
            error!("encountered error while stopping the executor manager: {e}");
        }
        info!("stopping driver server");
        self.server.stop().await;
        info!("driver server has stopped");
    }
}
