use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ballast_server::actor::ActorContext;
use ballast_server::retry::RetryStrategy;
use log::warn;

use crate::block::{BlockInfo, BlockManagerId, BlockState, BlockStatusUpdate};
use crate::driver::DriverClient;
use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::actor::ExecutorActor;
use crate::executor::fetch::{BlockFetcher, FetchIterator, FetchObservations};
use crate::executor::ExecutorEvent;
use crate::id::{BlockId, ExecutorId, TaskId};
use crate::task::{TaskDescription, TaskState};

/// Applies the task's payload to fetched blocks and produces the task
/// result. The semantics of the payload live behind this seam.
pub trait TaskProcessor: Send + Sync {
    fn process(
        &self,
        task: &TaskDescription,
        block: &BlockInfo,
        data: &[u8],
    ) -> ExecutionResult<()>;
    fn finish(&self, task: &TaskDescription) -> ExecutionResult<Vec<u8>>;
}

/// A processor that tallies consumed blocks and bytes and reports the totals
/// as the task result.
#[derive(Default)]
pub struct DigestTaskProcessor {
    totals: Mutex<HashMap<TaskId, (u64, u64)>>,
}

impl DigestTaskProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, (u64, u64)>> {
        match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TaskProcessor for DigestTaskProcessor {
    fn process(
        &self,
        task: &TaskDescription,
        _block: &BlockInfo,
        data: &[u8],
    ) -> ExecutionResult<()> {
        let mut totals = self.lock();
        let entry = totals.entry(task.task_id).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += data.len() as u64;
        Ok(())
    }

    fn finish(&self, task: &TaskDescription) -> ExecutionResult<Vec<u8>> {
        let (blocks, bytes) = self.lock().remove(&task.task_id).unwrap_or((0, 0));
        Ok(format!("blocks={blocks} bytes={bytes}").into_bytes())
    }
}

const OBSERVATION_REPORT_INTERVAL: Duration = Duration::from_millis(1000);

/// Runs tasks on the executor: one blocking consumer per task pulling from
/// its fetch iterator, plus a monitor task streaming fetch and speed
/// observations back to the driver.
pub struct TaskRunner {
    executor_id: ExecutorId,
    driver: DriverClient,
    fetcher: Arc<dyn BlockFetcher>,
    processor: Arc<dyn TaskProcessor>,
    retry: RetryStrategy,
    iterators: HashMap<TaskId, FetchIterator>,
    /// Mirror of each iterator's lock flag.
    lock_status: HashMap<TaskId, bool>,
}

impl TaskRunner {
    pub fn new(
        executor_id: ExecutorId,
        driver: DriverClient,
        fetcher: Arc<dyn BlockFetcher>,
        processor: Arc<dyn TaskProcessor>,
        retry: RetryStrategy,
    ) -> Self {
        Self {
            executor_id,
            driver,
            fetcher,
            processor,
            retry,
            iterators: HashMap::new(),
            lock_status: HashMap::new(),
        }
    }

    pub fn iterator(&self, task_id: TaskId) -> Option<&FetchIterator> {
        self.iterators.get(&task_id)
    }

    pub fn run_task(&mut self, ctx: &mut ActorContext<ExecutorActor>, task: TaskDescription) {
        let task_id = task.task_id;
        let iterator = FetchIterator::new(task_id, task.blocks.clone());
        self.iterators.insert(task_id, iterator.clone());
        self.lock_status.insert(task_id, true);

        // Announce the task and its block inventory to the driver. This is
        // what pulls the task into the rebalancing window.
        let driver = self.driver.clone();
        let retry = self.retry.clone();
        let executor_id = self.executor_id.clone();
        let blocks = task.blocks.clone();
        ctx.spawn(async move {
            let out = retry
                .run(|| {
                    let driver = driver.clone();
                    let executor_id = executor_id.clone();
                    let blocks = blocks.clone();
                    async move { driver.register_task(task_id, executor_id, blocks).await }
                })
                .await;
            if let Err(e) = out {
                warn!("failed to register task {task_id} with the driver: {e}");
            }
        });

        let monitor = Monitor {
            executor_id: self.executor_id.clone(),
            driver: self.driver.clone(),
            iterator: iterator.clone(),
            task_id,
        };
        ctx.spawn(monitor.run());

        let fetcher = self.fetcher.clone();
        let processor = self.processor.clone();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || consume(task, iterator, fetcher, processor))
                    .await;
            let (state, data) = match result {
                Ok(Ok(data)) => (TaskState::Finished, data),
                Ok(Err(ExecutionError::TaskKilled(_))) => (TaskState::Killed, vec![]),
                Ok(Err(e)) => (TaskState::Failed, e.to_string().into_bytes()),
                Err(e) => (
                    TaskState::Failed,
                    format!("task consumer panicked: {e}").into_bytes(),
                ),
            };
            let _ = handle
                .send(ExecutorEvent::TaskFinished {
                    task_id,
                    state,
                    data,
                })
                .await;
        });
    }

    pub fn kill_task(&mut self, task_id: TaskId, interrupt: bool) {
        match self.iterators.get(&task_id) {
            Some(iterator) => iterator.kill(interrupt),
            None => warn!("cannot kill unknown task {task_id}"),
        }
    }

    pub fn set_locked(&mut self, task_id: TaskId, locked: bool) {
        match self.iterators.get(&task_id) {
            Some(iterator) => {
                iterator.set_locked(locked);
                self.lock_status.insert(task_id, locked);
            }
            None => warn!("cannot change lock of unknown task {task_id}"),
        }
    }

    pub fn remove_fetch(
        &mut self,
        task_id: TaskId,
        blocks: &[(BlockManagerId, Vec<BlockId>)],
    ) -> Vec<BlockInfo> {
        match self.iterators.get(&task_id) {
            Some(iterator) => iterator.remove_fetch_requests(blocks),
            None => {
                warn!("cannot remove fetches from unknown task {task_id}");
                vec![]
            }
        }
    }

    pub fn add_fetch(&mut self, task_id: TaskId, blocks: Vec<BlockInfo>) {
        match self.iterators.get(&task_id) {
            Some(iterator) => iterator.add_fetch_requests(blocks),
            None => warn!("cannot add fetches to unknown task {task_id}"),
        }
    }

    /// Move already-fetched results between two iterators on this executor,
    /// skipping blocks the source does not hold.
    pub fn move_results(&mut self, block_ids: &[BlockId], from_task: TaskId, to_task: TaskId) {
        let Some(source) = self.iterators.get(&from_task) else {
            warn!("cannot move results from unknown task {from_task}");
            return;
        };
        let Some(target) = self.iterators.get(&to_task) else {
            warn!("cannot move results to unknown task {to_task}");
            return;
        };
        let moved = source.remove_fetch_results(block_ids);
        if !moved.is_empty() {
            target.add_fetch_results(moved);
        }
    }

    /// Drop the task's iterator and return it for the final report.
    pub fn finish_task(&mut self, task_id: TaskId) -> Option<FetchIterator> {
        self.lock_status.remove(&task_id);
        let iterator = self.iterators.remove(&task_id)?;
        iterator.mark_finished();
        Some(iterator)
    }
}

fn consume(
    task: TaskDescription,
    iterator: FetchIterator,
    fetcher: Arc<dyn BlockFetcher>,
    processor: Arc<dyn TaskProcessor>,
) -> ExecutionResult<Vec<u8>> {
    while let Some(result) = iterator.next(fetcher.as_ref())? {
        let start = Instant::now();
        processor.process(&task, &result.block, &result.data)?;
        let millis = start.elapsed().as_secs_f64() * 1000.0;
        iterator.record_compute(result.data.len() as u64, millis);
    }
    processor.finish(&task)
}

struct Monitor {
    executor_id: ExecutorId,
    driver: DriverClient,
    iterator: FetchIterator,
    task_id: TaskId,
}

impl Monitor {
    async fn run(self) {
        loop {
            tokio::time::sleep(OBSERVATION_REPORT_INTERVAL).await;
            let finished = self.iterator.is_finished();
            let observations = self.iterator.take_observations();
            if !observations.is_empty() {
                self.report(observations).await;
            }
            if finished {
                break;
            }
        }
    }

    async fn report(&self, observations: FetchObservations) {
        let mut updates: Vec<BlockStatusUpdate> = observations
            .fetched
            .into_iter()
            .map(|(block_id, size)| BlockStatusUpdate {
                block_id,
                state: BlockState::Fetched,
                size: Some(size),
            })
            .collect();
        updates.extend(
            observations
                .consumed
                .into_iter()
                .map(|block_id| BlockStatusUpdate {
                    block_id,
                    state: BlockState::Consumed,
                    size: None,
                }),
        );
        if !updates.is_empty() {
            if let Err(e) = self
                .driver
                .report_block_statuses(self.task_id, updates, None)
                .await
            {
                warn!("failed to report block statuses for task {}: {e}", self.task_id);
            }
        }
        for (origin, (bytes, millis)) in observations.downloads {
            if millis > 0.0 {
                if let Err(e) = self
                    .driver
                    .report_block_download_speed(
                        origin,
                        self.executor_id.clone(),
                        bytes as f64 / millis,
                    )
                    .await
                {
                    warn!("failed to report download speed: {e}");
                }
            }
        }
        if observations.compute_millis > 0.0 {
            if let Err(e) = self
                .driver
                .report_task_compute_speed(
                    self.task_id,
                    self.executor_id.clone(),
                    observations.compute_bytes as f64 / observations.compute_millis,
                )
                .await
            {
                warn!("failed to report compute speed: {e}");
            }
        }
    }
}
