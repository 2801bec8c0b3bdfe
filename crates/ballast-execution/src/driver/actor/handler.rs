use std::mem;
use std::time::{Instant, SystemTime};

use ballast_server::actor::{ActorAction, ActorContext};
use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::block::{BlockInfo, BlockStatusUpdate};
use crate::driver::actor::{DriverActor, LaunchedTask};
use crate::driver::registry::ExecutorData;
use crate::driver::DriverEvent;
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::ClusterEvent;
use crate::executor::ExecutorClient;
use crate::id::{ExecutorId, TaskId, TaskSetId};
use crate::rpc::ClientOptions;
use crate::skew::{SkewCommand, SkewMaster};
use crate::task::{TaskDescription, TaskState};

impl DriverActor {
    pub(super) fn handle_server_ready(
        &mut self,
        ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> ActorAction {
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal, port) {
            Ok(x) => x,
            Err(e) => {
                error!("{e}");
                return ActorAction::Stop;
            }
        };
        info!("driver server is ready on port {port}");
        let external_port = if self.options.external_port > 0 {
            self.options.external_port
        } else {
            port
        };
        self.options
            .manager
            .notify_driver_endpoint(&self.options.external_host, external_port);
        let handle = ctx.handle().clone();
        let interval = self.options.revive_interval;
        ctx.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if handle.send(DriverEvent::ReviveOffers).await.is_err() {
                    break;
                }
            }
        });
        ActorAction::Continue
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn handle_register_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        executor_id: ExecutorId,
        host: String,
        port: u16,
        cores: usize,
        log_urls: Vec<(String, String)>,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        let client = ExecutorClient::new(ClientOptions {
            enable_tls: false,
            host: host.clone(),
            port,
        });
        let data = ExecutorData::new(host.clone(), port, cores, log_urls, client);
        let out = self.options.registry.insert(executor_id.clone(), data);
        match &out {
            Ok(()) => {
                info!("executor {executor_id} registered at {host}:{port} with {cores} cores");
                self.options.event_bus.publish(ClusterEvent::ExecutorAdded {
                    time: SystemTime::now(),
                    executor_id: executor_id.clone(),
                    host,
                    total_cores: cores,
                });
                self.schedule_lost_executor_probe(ctx, &executor_id, Instant::now());
            }
            Err(e) => {
                warn!("failed to register executor: {e}");
            }
        }
        let registered = out.is_ok();
        if result.send(out).is_err() {
            warn!("failed to send executor registration result");
        }
        if registered {
            self.make_offers(ctx, None);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_executor_heartbeat(
        &mut self,
        ctx: &mut ActorContext<Self>,
        executor_id: ExecutorId,
    ) -> ActorAction {
        match self.options.registry.record_heartbeat(&executor_id) {
            Ok(instant) => self.schedule_lost_executor_probe(ctx, &executor_id, instant),
            Err(e) => debug!("dropping heartbeat: {e}"),
        }
        ActorAction::Continue
    }

    pub(super) fn handle_probe_lost_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        executor_id: ExecutorId,
        instant: Instant,
    ) -> ActorAction {
        if self
            .options
            .registry
            .heartbeat_at(&executor_id)
            .is_some_and(|x| x <= instant)
        {
            // A silent executor is indistinguishable from a disconnected RPC
            // client; it is removed the same way.
            self.remove_executor(ctx, &executor_id, "remote RPC client disassociated");
        }
        ActorAction::Continue
    }

    pub(super) fn handle_report_task_status(
        &mut self,
        ctx: &mut ActorContext<Self>,
        executor_id: ExecutorId,
        task_id: TaskId,
        state: TaskState,
        data: Vec<u8>,
    ) -> ActorAction {
        if !self.options.registry.contains(&executor_id) {
            warn!("dropping task status update from unknown executor {executor_id}");
            return ActorAction::Continue;
        }
        self.options.scheduler.status_update(task_id, state, &data);
        if state.is_terminal() {
            self.launched_tasks.remove(&task_id);
            let cpus = self.options.scheduler.cpus_per_task() as i64;
            if let Err(e) = self.options.registry.adjust_free_cores(&executor_id, cpus) {
                warn!("failed to restore cores for executor {executor_id}: {e}");
            }
            self.make_offers(ctx, Some(&executor_id));
        }
        ActorAction::Continue
    }

    pub(super) fn handle_revive_offers(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        self.make_offers(ctx, None);
        ActorAction::Continue
    }

    pub(super) fn handle_kill_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        executor_id: ExecutorId,
        interrupt: bool,
    ) -> ActorAction {
        let Some(client) = self.options.registry.client(&executor_id) else {
            warn!("cannot kill task {task_id}: executor {executor_id} is not registered");
            return ActorAction::Continue;
        };
        ctx.spawn(async move {
            if let Err(e) = client.kill_task(task_id, interrupt).await {
                warn!("failed to kill task {task_id}: {e}");
            }
        });
        ActorAction::Continue
    }

    pub(super) fn handle_remove_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        executor_id: ExecutorId,
        reason: String,
        result: Option<oneshot::Sender<ExecutionResult<()>>>,
    ) -> ActorAction {
        self.remove_executor(ctx, &executor_id, &reason);
        if let Some(result) = result {
            if result.send(Ok(())).is_err() {
                warn!("failed to acknowledge executor removal");
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_stop_executors(
        &mut self,
        ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        self.stop_all_executors(ctx);
        if result.send(Ok(())).is_err() {
            warn!("failed to acknowledge executor shutdown");
        }
        ActorAction::Continue
    }

    pub(super) fn handle_stop_driver(
        &mut self,
        ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        info!("stopping driver");
        self.stop_all_executors(ctx);
        if result.send(Ok(())).is_err() {
            warn!("failed to acknowledge driver shutdown");
        }
        ActorAction::Stop
    }

    pub(super) fn handle_register_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<BlockInfo>,
    ) -> ActorAction {
        let Some(launched) = self.launched_tasks.get(&task_id) else {
            warn!("dropping registration for unlaunched task {task_id}");
            return ActorAction::Continue;
        };
        if launched.executor_id != executor_id {
            warn!(
                "task {task_id} registered from executor {executor_id} but was launched on {}",
                launched.executor_id
            );
        }
        let task_set_id = launched.task_set_id;
        let cap = self.options.registry.total_core_count();
        let is_last = self.options.scheduler.pending_task_count(task_set_id) == 0;
        let skew_options = self.options.skew.clone();
        let master = self
            .skew_masters
            .entry(task_set_id)
            .or_insert_with(|| SkewMaster::new(task_set_id, skew_options));
        let commands = master.on_register_task(task_id, executor_id, blocks, is_last, cap);
        self.dispatch_skew_commands(ctx, commands);
        ActorAction::Continue
    }

    pub(super) fn handle_report_block_statuses(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    ) -> ActorAction {
        if let Some(master) = self.master_for_task(task_id) {
            master.on_block_statuses(task_id, updates, new_task_id);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_report_task_finished(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
    ) -> ActorAction {
        let Some(task_set_id) = self
            .launched_tasks
            .get(&task_id)
            .map(|x| x.task_set_id)
        else {
            warn!("dropping finish report for unlaunched task {task_id}");
            return ActorAction::Continue;
        };
        let mut commands = vec![];
        let mut drop_master = false;
        if let Some(master) = self.skew_masters.get_mut(&task_set_id) {
            commands = master.on_task_finished(task_id);
            drop_master = master.is_idle()
                && self.options.scheduler.pending_task_count(task_set_id) == 0;
        }
        self.dispatch_skew_commands(ctx, commands);
        if drop_master {
            self.skew_masters.remove(&task_set_id);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_report_task_compute_speed(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        _executor_id: ExecutorId,
        bytes_per_ms: f64,
    ) -> ActorAction {
        if let Some(master) = self.master_for_task(task_id) {
            master.on_compute_speed(task_id, bytes_per_ms);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_report_block_download_speed(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from_executor_id: ExecutorId,
        to_executor_id: ExecutorId,
        bytes_per_ms: f64,
    ) -> ActorAction {
        // Download speeds are per executor pair and inform every active set.
        for master in self.skew_masters.values_mut() {
            master.on_download_speed(
                from_executor_id.clone(),
                to_executor_id.clone(),
                bytes_per_ms,
            );
        }
        ActorAction::Continue
    }

    pub(super) fn handle_transfer_removed_fetch(
        &mut self,
        ctx: &mut ActorContext<Self>,
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        blocks: Vec<BlockInfo>,
    ) -> ActorAction {
        let Some(master) = self.master_for_task(next_task_id) else {
            warn!("dropping transferred fetches for unknown task {next_task_id}");
            return ActorAction::Continue;
        };
        let commands = master.on_transfer_removed_fetch(next_executor_id, next_task_id, blocks);
        self.dispatch_skew_commands(ctx, commands);
        ActorAction::Continue
    }

    fn master_for_task(&mut self, task_id: TaskId) -> Option<&mut SkewMaster> {
        let task_set_id = self.launched_tasks.get(&task_id)?.task_set_id;
        self.skew_masters.get_mut(&task_set_id)
    }

    fn remove_executor(&mut self, ctx: &mut ActorContext<Self>, executor_id: &ExecutorId, reason: &str) {
        match self.options.registry.remove(executor_id) {
            Ok(_) => {
                info!("removed executor {executor_id}: {reason}");
                self.options
                    .event_bus
                    .publish(ClusterEvent::ExecutorRemoved {
                        time: SystemTime::now(),
                        executor_id: executor_id.clone(),
                        reason: reason.to_string(),
                    });
                self.options.scheduler.executor_lost(executor_id, reason);
                let mut commands = vec![];
                for master in self.skew_masters.values_mut() {
                    commands.extend(master.purge_executor(executor_id));
                }
                self.dispatch_skew_commands(ctx, commands);
            }
            Err(e) => {
                warn!("cannot remove executor: {e}");
            }
        }
    }

    fn stop_all_executors(&mut self, ctx: &mut ActorContext<Self>) {
        for (executor_id, client) in self.options.registry.clients() {
            ctx.spawn(async move {
                if let Err(e) = client.stop_executor().await {
                    warn!("failed to stop executor {executor_id}: {e}");
                }
            });
        }
    }

    fn schedule_lost_executor_probe(
        &self,
        ctx: &mut ActorContext<Self>,
        executor_id: &ExecutorId,
        instant: Instant,
    ) {
        ctx.send_with_delay(
            DriverEvent::ProbeLostExecutor {
                executor_id: executor_id.clone(),
                instant,
            },
            self.options.executor_heartbeat_timeout,
        );
    }

    /// Offer spare capacity to the task scheduler and launch whatever it
    /// returns. With an executor id, only that executor's capacity is
    /// offered; otherwise every registered executor is.
    fn make_offers(&mut self, ctx: &mut ActorContext<Self>, executor_id: Option<&ExecutorId>) {
        let offers = match executor_id {
            Some(executor_id) => match self.options.registry.offer_for(executor_id) {
                Some(offer) => vec![offer],
                None => vec![],
            },
            None => self.options.registry.snapshot_offers(),
        };
        if offers.is_empty() {
            return;
        }
        let tasks = self.options.scheduler.resource_offers(&offers);
        if !tasks.is_empty() {
            self.launch_tasks(ctx, tasks);
        }
    }

    fn launch_tasks(&mut self, ctx: &mut ActorContext<Self>, tasks: Vec<TaskDescription>) {
        let limit = self
            .options
            .max_frame_size
            .saturating_sub(self.options.frame_reserved_bytes);
        let mut batches: Vec<(ExecutorId, ExecutorClient, Vec<(TaskId, Vec<u8>)>)> = vec![];
        for (index, task) in tasks.into_iter().enumerate() {
            let task_id = task.task_id;
            let task_set_id = task.task_set_id;
            let executor_id = task.executor_id.clone();
            if self.aborted_task_sets.contains(&task_set_id) {
                debug!("not dispatching task {task_id} of aborted task set {task_set_id}");
                continue;
            }
            let data = match self.options.codec.encode(task) {
                Ok(data) => data,
                Err(e) => {
                    let message = format!("failed to serialize task {task_id}: {e}");
                    error!("{message}");
                    self.abort_task_set(task_set_id, &message);
                    continue;
                }
            };
            if data.len() >= limit {
                let error = ExecutionError::FrameSizeExceeded {
                    task_id,
                    task_set_id,
                    index,
                    size: data.len(),
                    limit,
                    frame_size: self.options.max_frame_size,
                    reserved: self.options.frame_reserved_bytes,
                };
                let message = error.to_string();
                error!("{message}");
                self.abort_task_set(task_set_id, &message);
                continue;
            }
            let cpus = self.options.scheduler.cpus_per_task() as i64;
            if let Err(e) = self.options.registry.adjust_free_cores(&executor_id, -cpus) {
                warn!("not dispatching task {task_id}: {e}");
                continue;
            }
            self.launched_tasks.insert(
                task_id,
                LaunchedTask {
                    executor_id: executor_id.clone(),
                    task_set_id,
                },
            );
            match batches.iter_mut().find(|(id, _, _)| *id == executor_id) {
                Some((_, _, batch)) => batch.push((task_id, data)),
                None => {
                    let Some(client) = self.options.registry.client(&executor_id) else {
                        warn!("not dispatching task {task_id}: executor {executor_id} is gone");
                        self.launched_tasks.remove(&task_id);
                        continue;
                    };
                    batches.push((executor_id, client, vec![(task_id, data)]));
                }
            }
        }
        for (executor_id, client, batch) in batches {
            let handle = ctx.handle().clone();
            // One task per executor keeps launch order intact on the wire.
            ctx.spawn(async move {
                for (task_id, data) in batch {
                    if let Err(e) = client.launch_task(data).await {
                        warn!("failed to launch task {task_id} on executor {executor_id}: {e}");
                        let _ = handle
                            .send(DriverEvent::ReportTaskStatus {
                                executor_id: executor_id.clone(),
                                task_id,
                                state: TaskState::Lost,
                                data: vec![],
                            })
                            .await;
                    }
                }
            });
        }
    }

    fn abort_task_set(&mut self, task_set_id: TaskSetId, message: &str) {
        if self.aborted_task_sets.insert(task_set_id) {
            self.options.scheduler.abort_task_set(task_set_id, message);
        }
    }

    fn dispatch_skew_commands(&mut self, ctx: &mut ActorContext<Self>, commands: Vec<SkewCommand>) {
        for command in commands {
            debug!("skew command: {command:?}");
            let executor_id = match &command {
                SkewCommand::RemoveFetch { executor_id, .. }
                | SkewCommand::AddFetch { executor_id, .. }
                | SkewCommand::MoveResults { executor_id, .. }
                | SkewCommand::Lock { executor_id, .. }
                | SkewCommand::Unlock { executor_id, .. } => executor_id.clone(),
            };
            let Some(client) = self.options.registry.client(&executor_id) else {
                warn!("dropping skew command for unregistered executor {executor_id}");
                continue;
            };
            ctx.spawn(async move {
                let out = match command {
                    SkewCommand::RemoveFetch {
                        next_executor_id,
                        next_task_id,
                        task_id,
                        blocks,
                        ..
                    } => {
                        client
                            .remove_fetch(next_executor_id, next_task_id, task_id, blocks)
                            .await
                    }
                    SkewCommand::AddFetch {
                        task_id, blocks, ..
                    } => client.add_fetch(task_id, blocks).await,
                    SkewCommand::MoveResults {
                        block_ids,
                        from_task,
                        to_task,
                        ..
                    } => client.move_fetch_results(block_ids, from_task, to_task).await,
                    SkewCommand::Lock { task_id, .. } => client.lock_task(task_id).await,
                    SkewCommand::Unlock { task_id, .. } => client.unlock_task(task_id).await,
                };
                if let Err(e) = out {
                    warn!("failed to deliver skew command to executor {executor_id}: {e}");
                }
            });
        }
    }
}
