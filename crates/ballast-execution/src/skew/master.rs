use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, warn};

use crate::block::{BlockInfo, BlockManagerId, BlockState, BlockStatusUpdate};
use crate::id::{BlockId, ExecutorId, TaskId, TaskSetId};
use crate::skew::SkewOptions;

/// A command the driver endpoint dispatches to executors on behalf of the
/// skew master. Commands for executors that are no longer registered are
/// dropped at dispatch.
#[derive(Debug, Clone)]
pub enum SkewCommand {
    RemoveFetch {
        executor_id: ExecutorId,
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        task_id: TaskId,
        blocks: Vec<(BlockManagerId, Vec<BlockId>)>,
    },
    AddFetch {
        executor_id: ExecutorId,
        task_id: TaskId,
        blocks: Vec<BlockInfo>,
    },
    MoveResults {
        executor_id: ExecutorId,
        block_ids: Vec<BlockId>,
        from_task: TaskId,
        to_task: TaskId,
    },
    Lock {
        executor_id: ExecutorId,
        task_id: TaskId,
    },
    Unlock {
        executor_id: ExecutorId,
        task_id: TaskId,
    },
}

struct SplitPlan {
    commands: Vec<SkewCommand>,
    small_task: TaskId,
}

/// Tracks block inventories and speeds for the in-flight tasks of one task
/// set and decides when to shift unfetched work between them.
///
/// New tasks start with their fetch iterator locked. While a rebalancing
/// window is open, at most one task is unlocked to pull blocks; the others
/// queue up as demon tasks until the master hands them the window or drains
/// them when the set is exhausted.
pub struct SkewMaster {
    task_set_id: TaskSetId,
    options: SkewOptions,
    registered_tasks: HashMap<TaskId, ExecutorId>,
    /// Remaining fetch queue per task, in fetch order.
    task_blocks: HashMap<TaskId, VecDeque<BlockInfo>>,
    /// Blocks already fetched but not yet consumed, per task.
    task_results: HashMap<TaskId, HashSet<BlockId>>,
    /// Last reported compute speed per task, in bytes per millisecond.
    task_compute_speed: HashMap<TaskId, f64>,
    /// Mean observed download speed per (source, destination) executor pair.
    network_speed: HashMap<(ExecutorId, ExecutorId), f64>,
    active_tasks: HashSet<TaskId>,
    /// The number of tasks of the set that have started, whether still
    /// running or already finished.
    finished_or_running_count: usize,
    /// Tasks locked while waiting for permission to fetch, oldest first.
    demon_tasks: Vec<TaskId>,
    /// The single task granted the fetch window during rebalancing.
    unlocked_task: Option<TaskId>,
    /// How many tasks of this set each executor has run, purged when the
    /// executor is removed.
    runs_by_executor: HashMap<ExecutorId, usize>,
}

impl SkewMaster {
    pub fn new(task_set_id: TaskSetId, options: SkewOptions) -> Self {
        Self {
            task_set_id,
            options,
            registered_tasks: HashMap::new(),
            task_blocks: HashMap::new(),
            task_results: HashMap::new(),
            task_compute_speed: HashMap::new(),
            network_speed: HashMap::new(),
            active_tasks: HashSet::new(),
            finished_or_running_count: 0,
            demon_tasks: Vec::new(),
            unlocked_task: None,
            runs_by_executor: HashMap::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active_tasks.is_empty()
    }

    pub fn demon_task_count(&self) -> usize {
        self.demon_tasks.len()
    }

    pub fn unlocked_task(&self) -> Option<TaskId> {
        self.unlocked_task
    }

    pub fn executor_of(&self, task_id: TaskId) -> Option<&ExecutorId> {
        self.registered_tasks.get(&task_id)
    }

    /// Register a newly started task and decide how it joins the rebalancing
    /// window: trigger a split once a full wave of tasks is in flight, queue
    /// the task as a demon while there is room, or unlock it to keep the set
    /// moving.
    pub fn on_register_task(
        &mut self,
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<BlockInfo>,
        is_last: bool,
        cap: usize,
    ) -> Vec<SkewCommand> {
        if self.registered_tasks.contains_key(&task_id) {
            debug!("task {task_id} is already registered");
            return vec![];
        }
        self.registered_tasks.insert(task_id, executor_id.clone());
        self.task_blocks.insert(task_id, blocks.into());
        self.task_results.insert(task_id, HashSet::new());
        self.active_tasks.insert(task_id);
        self.finished_or_running_count += 1;
        *self.runs_by_executor.entry(executor_id).or_default() += 1;

        let mut commands = vec![];
        if cap > 0 && self.finished_or_running_count >= cap {
            match self.compute_and_split(is_last) {
                Some(plan) => {
                    let small = plan.small_task;
                    commands.extend(plan.commands);
                    if small == task_id {
                        commands.extend(self.open_window(task_id));
                    } else if let Some(position) =
                        self.demon_tasks.iter().position(|x| *x == small)
                    {
                        self.demon_tasks.remove(position);
                        commands.extend(self.open_window(small));
                        self.demon_tasks.push(task_id);
                    } else {
                        warn!(
                            "task set {}: split receiver {small} is no longer eligible",
                            self.task_set_id
                        );
                    }
                }
                None => {
                    if self.demon_tasks.len() + 1 >= cap {
                        commands.extend(self.open_window(task_id));
                    } else {
                        self.demon_tasks.push(task_id);
                    }
                }
            }
        } else if self.demon_tasks.len() + 1 < cap {
            self.demon_tasks.push(task_id);
        } else {
            commands.extend(self.open_window(task_id));
        }
        if is_last {
            commands.extend(self.drain_demons());
        }
        commands
    }

    pub fn on_task_finished(&mut self, task_id: TaskId) -> Vec<SkewCommand> {
        self.active_tasks.remove(&task_id);
        self.task_blocks.remove(&task_id);
        self.task_results.remove(&task_id);
        if let Some(position) = self.demon_tasks.iter().position(|x| *x == task_id) {
            self.demon_tasks.remove(position);
        }
        let mut commands = vec![];
        if self.unlocked_task == Some(task_id) {
            self.unlocked_task = None;
            commands.extend(self.promote_next_demon());
        }
        commands
    }

    pub fn on_block_statuses(
        &mut self,
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    ) {
        for update in updates {
            match update.state {
                BlockState::Fetched => {
                    if let Some(queue) = self.task_blocks.get_mut(&task_id) {
                        if let Some(position) =
                            queue.iter().position(|b| b.block_id == update.block_id)
                        {
                            queue.remove(position);
                        }
                    }
                    if let Some(results) = self.task_results.get_mut(&task_id) {
                        results.insert(update.block_id);
                    }
                }
                BlockState::Consumed => {
                    if let Some(results) = self.task_results.get_mut(&task_id) {
                        results.remove(&update.block_id);
                    }
                }
                BlockState::Reassigned => {
                    let Some(new_task_id) = new_task_id else {
                        warn!(
                            "block {} reassignment from task {task_id} names no new task",
                            update.block_id
                        );
                        continue;
                    };
                    if !self.registered_tasks.contains_key(&new_task_id) {
                        warn!("block reassignment to unregistered task {new_task_id}");
                        continue;
                    }
                    let block = self.task_blocks.get_mut(&task_id).and_then(|queue| {
                        queue
                            .iter()
                            .position(|b| b.block_id == update.block_id)
                            .and_then(|position| queue.remove(position))
                    });
                    if let Some(mut block) = block {
                        if let Some(size) = update.size {
                            block.size = size;
                        }
                        self.task_blocks
                            .entry(new_task_id)
                            .or_default()
                            .push_back(block);
                    }
                }
            }
        }
    }

    pub fn on_compute_speed(&mut self, task_id: TaskId, bytes_per_ms: f64) {
        if bytes_per_ms > 0.0 {
            self.task_compute_speed.insert(task_id, bytes_per_ms);
        }
    }

    pub fn on_download_speed(&mut self, from: ExecutorId, to: ExecutorId, bytes_per_ms: f64) {
        if bytes_per_ms <= 0.0 {
            return;
        }
        self.network_speed
            .entry((from, to))
            .and_modify(|speed| *speed = (*speed + bytes_per_ms) / 2.0)
            .or_insert(bytes_per_ms);
    }

    /// Blocks actually removed from a donor arrive here with their sizes;
    /// they are handed to the receiving task.
    pub fn on_transfer_removed_fetch(
        &mut self,
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        blocks: Vec<BlockInfo>,
    ) -> Vec<SkewCommand> {
        if !self.registered_tasks.contains_key(&next_task_id) {
            warn!("transferred fetches name unregistered task {next_task_id}");
            return vec![];
        }
        self.task_blocks
            .entry(next_task_id)
            .or_default()
            .extend(blocks.iter().cloned());
        vec![SkewCommand::AddFetch {
            executor_id: next_executor_id,
            task_id: next_task_id,
            blocks,
        }]
    }

    /// Drop all state tied to a removed executor. Tasks that were running
    /// there are gone; if one of them held the fetch window, the window is
    /// handed to the oldest demon.
    pub fn purge_executor(&mut self, executor_id: &ExecutorId) -> Vec<SkewCommand> {
        self.runs_by_executor.remove(executor_id);
        let lost: Vec<TaskId> = self
            .registered_tasks
            .iter()
            .filter(|(_, e)| *e == executor_id)
            .map(|(t, _)| *t)
            .collect();
        let mut commands = vec![];
        for task_id in lost {
            self.registered_tasks.remove(&task_id);
            self.active_tasks.remove(&task_id);
            self.task_blocks.remove(&task_id);
            self.task_results.remove(&task_id);
            if let Some(position) = self.demon_tasks.iter().position(|x| *x == task_id) {
                self.demon_tasks.remove(position);
            }
            if self.unlocked_task == Some(task_id) {
                self.unlocked_task = None;
                commands.extend(self.promote_next_demon());
            }
        }
        commands
    }

    fn open_window(&mut self, task_id: TaskId) -> Vec<SkewCommand> {
        self.unlocked_task = Some(task_id);
        self.unlock_command(task_id).into_iter().collect()
    }

    fn promote_next_demon(&mut self) -> Vec<SkewCommand> {
        if self.demon_tasks.is_empty() {
            return vec![];
        }
        let next = self.demon_tasks.remove(0);
        self.open_window(next)
    }

    fn drain_demons(&mut self) -> Vec<SkewCommand> {
        let demons = std::mem::take(&mut self.demon_tasks);
        demons
            .into_iter()
            .filter_map(|task_id| self.unlock_command(task_id))
            .collect()
    }

    fn unlock_command(&self, task_id: TaskId) -> Option<SkewCommand> {
        let Some(executor_id) = self.registered_tasks.get(&task_id) else {
            warn!("cannot unlock unregistered task {task_id}");
            return None;
        };
        Some(SkewCommand::Unlock {
            executor_id: executor_id.clone(),
            task_id,
        })
    }

    /// Decide whether to rebalance and plan the work movement. Returns
    /// `None` when there are too few active tasks or nothing worth moving.
    fn compute_and_split(&mut self, is_last: bool) -> Option<SplitPlan> {
        let threshold = if is_last {
            self.options.min_active_tasks_last
        } else {
            self.options.min_active_tasks
        };
        if self.active_tasks.len() < threshold {
            return None;
        }
        let mut weights: HashMap<TaskId, f64> = self
            .active_tasks
            .iter()
            .map(|&task_id| (task_id, self.estimate_weight(task_id)))
            .collect();

        let mut commands = vec![];
        let mut primary: Option<(TaskId, TaskId)> = None;
        let mut processed_donors = HashSet::new();
        loop {
            let Some(donor) = Self::pick_large(&weights, &processed_donors) else {
                break;
            };
            let Some(receiver) = Self::pick_small(&weights, donor) else {
                break;
            };
            if weights[&donor] <= weights[&receiver] {
                break;
            }
            let moved = self.plan_moves(donor, receiver, &mut weights);
            if moved.is_empty() {
                break;
            }
            if primary.is_none() {
                primary = Some((donor, receiver));
            }
            commands.push(self.remove_fetch_command(donor, receiver, &moved));
            processed_donors.insert(donor);
            if !is_last {
                break;
            }
        }
        let (large, small) = primary?;
        commands.extend(self.shift_drained_results(small));
        info!(
            "task set {}: splitting work from task {large} toward task {small}",
            self.task_set_id
        );
        Some(SplitPlan {
            commands,
            small_task: small,
        })
    }

    fn pick_large(
        weights: &HashMap<TaskId, f64>,
        excluded: &HashSet<TaskId>,
    ) -> Option<TaskId> {
        let mut best: Option<(TaskId, f64)> = None;
        for (&task_id, &weight) in weights {
            if excluded.contains(&task_id) {
                continue;
            }
            match best {
                None => best = Some((task_id, weight)),
                Some((best_id, best_weight)) => {
                    if weight > best_weight || (weight == best_weight && task_id < best_id) {
                        best = Some((task_id, weight));
                    }
                }
            }
        }
        best.map(|(task_id, _)| task_id)
    }

    fn pick_small(weights: &HashMap<TaskId, f64>, large: TaskId) -> Option<TaskId> {
        let mut best: Option<(TaskId, f64)> = None;
        for (&task_id, &weight) in weights {
            if task_id == large {
                continue;
            }
            match best {
                None => best = Some((task_id, weight)),
                Some((best_id, best_weight)) => {
                    if weight < best_weight || (weight == best_weight && task_id > best_id) {
                        best = Some((task_id, weight));
                    }
                }
            }
        }
        best.map(|(task_id, _)| task_id)
    }

    /// Move a prefix of the donor's pending fetches to the receiver until
    /// their projected completion times agree to within one block. Only
    /// measured blocks move; the movable prefix ends at the first block
    /// whose size is unknown.
    fn plan_moves(
        &mut self,
        donor: TaskId,
        receiver: TaskId,
        weights: &mut HashMap<TaskId, f64>,
    ) -> Vec<BlockInfo> {
        let mut donor_weight = weights[&donor];
        let mut receiver_weight = weights[&receiver];
        let mut moved = vec![];
        if let Some(queue) = self.task_blocks.get(&donor) {
            for block in queue.iter() {
                if !block.is_measured() {
                    break;
                }
                let give = self.block_time(donor, block);
                if donor_weight - receiver_weight <= give {
                    break;
                }
                let take = self.block_time(receiver, block);
                donor_weight -= give;
                receiver_weight += take;
                moved.push(block.clone());
            }
        }
        if let Some(queue) = self.task_blocks.get_mut(&donor) {
            for _ in 0..moved.len() {
                queue.pop_front();
            }
        }
        weights.insert(donor, donor_weight);
        weights.insert(receiver, receiver_weight);
        moved
    }

    fn remove_fetch_command(
        &self,
        donor: TaskId,
        receiver: TaskId,
        moved: &[BlockInfo],
    ) -> SkewCommand {
        let mut by_host: Vec<(BlockManagerId, Vec<BlockId>)> = vec![];
        for block in moved {
            match by_host.iter_mut().find(|(m, _)| *m == block.block_manager) {
                Some((_, ids)) => ids.push(block.block_id.clone()),
                None => by_host.push((block.block_manager.clone(), vec![block.block_id.clone()])),
            }
        }
        SkewCommand::RemoveFetch {
            executor_id: self.registered_tasks[&donor].clone(),
            next_executor_id: self.registered_tasks[&receiver].clone(),
            next_task_id: receiver,
            task_id: donor,
            blocks: by_host,
        }
    }

    /// Tasks left with nothing to fetch hand their already-fetched results
    /// to the receiver. Results can only move between iterators hosted by
    /// the same executor.
    fn shift_drained_results(&mut self, receiver: TaskId) -> Vec<SkewCommand> {
        let Some(receiver_executor) = self.registered_tasks.get(&receiver).cloned() else {
            return vec![];
        };
        let candidates: Vec<TaskId> = self
            .active_tasks
            .iter()
            .filter(|&&task_id| {
                task_id != receiver
                    && self.registered_tasks.get(&task_id) == Some(&receiver_executor)
                    && self
                        .task_blocks
                        .get(&task_id)
                        .map_or(true, |queue| queue.is_empty())
                    && self
                        .task_results
                        .get(&task_id)
                        .is_some_and(|results| !results.is_empty())
            })
            .copied()
            .collect();
        let mut commands = vec![];
        for task_id in candidates {
            let Some(results) = self.task_results.get_mut(&task_id) else {
                continue;
            };
            let block_ids: Vec<BlockId> = results.drain().collect();
            if let Some(receiver_results) = self.task_results.get_mut(&receiver) {
                receiver_results.extend(block_ids.iter().cloned());
            }
            commands.push(SkewCommand::MoveResults {
                executor_id: receiver_executor.clone(),
                block_ids,
                from_task: task_id,
                to_task: receiver,
            });
        }
        commands
    }

    fn estimate_weight(&self, task_id: TaskId) -> f64 {
        let Some(queue) = self.task_blocks.get(&task_id) else {
            return 0.0;
        };
        queue
            .iter()
            .filter(|block| block.is_measured())
            .map(|block| self.block_time(task_id, block))
            .sum()
    }

    /// The projected time in milliseconds for a task to fetch and process
    /// one block: compute time at the task's reported speed plus transfer
    /// time for the measured source-to-task network pair.
    fn block_time(&self, task_id: TaskId, block: &BlockInfo) -> f64 {
        let speed = self
            .task_compute_speed
            .get(&task_id)
            .copied()
            .unwrap_or(self.options.default_compute_speed);
        let mut time = block.size as f64 / speed;
        if let Some(executor_id) = self.registered_tasks.get(&task_id) {
            let pair = (
                block.block_manager.executor_id.clone(),
                executor_id.clone(),
            );
            if let Some(network) = self.network_speed.get(&pair) {
                if *network > 0.0 {
                    time += block.size as f64 / network;
                }
            }
        }
        time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SkewOptions {
        SkewOptions {
            min_active_tasks: 3,
            min_active_tasks_last: 2,
            default_compute_speed: 1.0,
        }
    }

    fn manager(executor: &str) -> BlockManagerId {
        BlockManagerId {
            executor_id: ExecutorId::from(executor),
            host: format!("{executor}.example"),
            port: 7337,
        }
    }

    fn block(id: &str, executor: &str, size: u64) -> BlockInfo {
        BlockInfo {
            block_id: BlockId::from(id),
            block_manager: manager(executor),
            size,
        }
    }

    fn blocks(prefix: &str, executor: &str, count: usize, size: u64) -> Vec<BlockInfo> {
        (0..count)
            .map(|i| block(&format!("{prefix}_{i}"), executor, size))
            .collect()
    }

    fn unlocked(commands: &[SkewCommand]) -> Vec<TaskId> {
        commands
            .iter()
            .filter_map(|c| match c {
                SkewCommand::Unlock { task_id, .. } => Some(*task_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_wave_queues_demons() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 4;
        for i in 1..=3 {
            let commands = master.on_register_task(
                TaskId::from(i),
                ExecutorId::from(format!("e{i}").as_str()),
                blocks(&format!("b{i}"), "e0", 2, 100),
                false,
                cap,
            );
            assert!(commands.is_empty());
        }
        assert_eq!(master.demon_task_count(), 3);
    }

    #[test]
    fn test_split_targets_largest_and_newest() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 4;
        // T1 has the most remaining bytes and becomes the donor.
        master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            blocks("t1", "e0", 8, 100),
            false,
            cap,
        );
        master.on_register_task(
            TaskId::from(2),
            ExecutorId::from("e2"),
            blocks("t2", "e0", 3, 100),
            false,
            cap,
        );
        master.on_register_task(
            TaskId::from(3),
            ExecutorId::from("e3"),
            blocks("t3", "e0", 3, 100),
            false,
            cap,
        );
        let commands = master.on_register_task(
            TaskId::from(4),
            ExecutorId::from("e4"),
            blocks("t4", "e0", 1, 100),
            false,
            cap,
        );
        let remove = commands
            .iter()
            .find_map(|c| match c {
                SkewCommand::RemoveFetch {
                    executor_id,
                    next_task_id,
                    task_id,
                    blocks,
                    ..
                } => Some((executor_id.clone(), *next_task_id, *task_id, blocks.clone())),
                _ => None,
            })
            .expect("a remove-fetch command");
        assert_eq!(remove.0, ExecutorId::from("e1"));
        assert_eq!(remove.1, TaskId::from(4));
        assert_eq!(remove.2, TaskId::from(1));
        let moved: usize = remove.3.iter().map(|(_, ids)| ids.len()).sum();
        assert!(moved > 0);
        // The newly registered task is the receiver and gets the window.
        assert_eq!(unlocked(&commands), vec![TaskId::from(4)]);
        assert_eq!(master.unlocked_task(), Some(TaskId::from(4)));
        // The demon set is untouched by a split toward the new task.
        assert_eq!(master.demon_task_count(), 3);
    }

    #[test]
    fn test_decline_with_full_demon_set_unlocks_new_task() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 2;
        let commands = master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            blocks("t1", "e0", 2, 100),
            false,
            cap,
        );
        assert!(commands.is_empty());
        assert_eq!(master.demon_task_count(), 1);
        // Two active tasks are below the split threshold, and the demon set
        // is already at cap - 1, so the new task is unlocked directly.
        let commands = master.on_register_task(
            TaskId::from(2),
            ExecutorId::from("e2"),
            blocks("t2", "e0", 2, 100),
            false,
            cap,
        );
        assert_eq!(unlocked(&commands), vec![TaskId::from(2)]);
    }

    #[test]
    fn test_last_task_drains_demons() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 4;
        master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            blocks("t1", "e0", 2, 100),
            false,
            cap,
        );
        let commands = master.on_register_task(
            TaskId::from(2),
            ExecutorId::from("e2"),
            blocks("t2", "e0", 2, 100),
            true,
            cap,
        );
        let mut ids = unlocked(&commands);
        ids.sort();
        assert_eq!(ids, vec![TaskId::from(1), TaskId::from(2)]);
        assert_eq!(master.demon_task_count(), 0);
    }

    #[test]
    fn test_finished_window_task_promotes_oldest_demon() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 2;
        master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            blocks("t1", "e0", 2, 100),
            false,
            cap,
        );
        let commands = master.on_register_task(
            TaskId::from(2),
            ExecutorId::from("e2"),
            blocks("t2", "e0", 2, 100),
            false,
            cap,
        );
        assert_eq!(unlocked(&commands), vec![TaskId::from(2)]);
        let commands = master.on_task_finished(TaskId::from(2));
        assert_eq!(unlocked(&commands), vec![TaskId::from(1)]);
        assert_eq!(master.unlocked_task(), Some(TaskId::from(1)));
        assert_eq!(master.demon_task_count(), 0);
    }

    #[test]
    fn test_transfer_removed_fetch_produces_add_fetch() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            vec![],
            false,
            4,
        );
        let transferred = blocks("m", "e0", 2, 50);
        let commands = master.on_transfer_removed_fetch(
            ExecutorId::from("e1"),
            TaskId::from(1),
            transferred.clone(),
        );
        match commands.as_slice() {
            [SkewCommand::AddFetch {
                executor_id,
                task_id,
                blocks,
            }] => {
                assert_eq!(*executor_id, ExecutorId::from("e1"));
                assert_eq!(*task_id, TaskId::from(1));
                assert_eq!(*blocks, transferred);
            }
            other => panic!("unexpected commands: {other:?}"),
        }
    }

    #[test]
    fn test_block_status_transitions() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            blocks("t1", "e0", 2, 100),
            false,
            4,
        );
        master.on_block_statuses(
            TaskId::from(1),
            vec![BlockStatusUpdate {
                block_id: BlockId::from("t1_0"),
                state: BlockState::Fetched,
                size: None,
            }],
            None,
        );
        assert_eq!(master.task_blocks[&TaskId::from(1)].len(), 1);
        assert!(master.task_results[&TaskId::from(1)].contains(&BlockId::from("t1_0")));
        master.on_block_statuses(
            TaskId::from(1),
            vec![BlockStatusUpdate {
                block_id: BlockId::from("t1_0"),
                state: BlockState::Consumed,
                size: None,
            }],
            None,
        );
        assert!(master.task_results[&TaskId::from(1)].is_empty());
    }

    #[test]
    fn test_download_speed_is_averaged() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let from = ExecutorId::from("e1");
        let to = ExecutorId::from("e2");
        master.on_download_speed(from.clone(), to.clone(), 10.0);
        master.on_download_speed(from.clone(), to.clone(), 20.0);
        assert_eq!(master.network_speed[&(from, to)], 15.0);
    }

    #[test]
    fn test_unmeasured_blocks_do_not_move() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 3;
        // The donor's queue starts with an unmeasured block, so nothing can
        // move even though its measured weight is the largest.
        let mut donor_blocks = vec![block("u", "e0", 0)];
        donor_blocks.extend(blocks("t1", "e0", 5, 100));
        master.on_register_task(TaskId::from(1), ExecutorId::from("e1"), donor_blocks, false, cap);
        master.on_register_task(
            TaskId::from(2),
            ExecutorId::from("e2"),
            blocks("t2", "e0", 2, 100),
            false,
            cap,
        );
        let commands = master.on_register_task(
            TaskId::from(3),
            ExecutorId::from("e3"),
            blocks("t3", "e0", 1, 100),
            false,
            cap,
        );
        assert!(!commands
            .iter()
            .any(|c| matches!(c, SkewCommand::RemoveFetch { .. })));
        // With no plan and a full demon set, the new task is still unlocked.
        assert_eq!(unlocked(&commands), vec![TaskId::from(3)]);
    }

    #[test]
    fn test_purge_executor_drops_its_tasks() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 2;
        master.on_register_task(
            TaskId::from(1),
            ExecutorId::from("e1"),
            blocks("t1", "e0", 2, 100),
            false,
            cap,
        );
        let commands = master.on_register_task(
            TaskId::from(2),
            ExecutorId::from("e2"),
            blocks("t2", "e0", 2, 100),
            false,
            cap,
        );
        assert_eq!(unlocked(&commands), vec![TaskId::from(2)]);
        // Losing the executor of the unlocked task hands the window to the
        // queued demon.
        let commands = master.purge_executor(&ExecutorId::from("e2"));
        assert_eq!(unlocked(&commands), vec![TaskId::from(1)]);
        assert!(master.executor_of(TaskId::from(2)).is_none());
    }

    #[test]
    fn test_demon_cardinality_stays_below_cap() {
        let mut master = SkewMaster::new(TaskSetId::from(1), options());
        let cap = 3;
        for i in 1..=6 {
            master.on_register_task(
                TaskId::from(i),
                ExecutorId::from(format!("e{i}").as_str()),
                blocks(&format!("t{i}"), "e0", 1, 100),
                false,
                cap,
            );
            assert!(master.demon_task_count() <= cap - 1);
        }
    }
}
