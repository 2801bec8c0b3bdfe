use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use log::{info, warn};

use crate::id::{ExecutorId, TaskId, TaskSetId};
use crate::task::{TaskDescription, TaskState};

/// A snapshot of one executor's spare capacity, handed to the task scheduler
/// when making resource offers.
#[derive(Debug, Clone)]
pub struct ExecutorOffer {
    pub executor_id: ExecutorId,
    pub host: String,
    pub free_cores: usize,
}

/// The surface of the external task scheduler. The driver endpoint makes
/// resource offers through this trait and reports task outcomes back to it;
/// task-set internals such as priority, locality, and speculation stay on
/// the other side of this boundary.
pub trait TaskScheduler: Send + Sync {
    /// Offer spare capacity and receive tasks to launch. Each returned task
    /// names the executor it was assigned to.
    fn resource_offers(&self, offers: &[ExecutorOffer]) -> Vec<TaskDescription>;
    fn status_update(&self, task_id: TaskId, state: TaskState, data: &[u8]);
    fn executor_lost(&self, executor_id: &ExecutorId, reason: &str);
    fn abort_task_set(&self, task_set_id: TaskSetId, message: &str);
    /// The number of tasks of the set that have not been handed out yet.
    fn pending_task_count(&self, task_set_id: TaskSetId) -> usize;
    fn cpus_per_task(&self) -> usize;
}

/// A minimal first-in-first-out task scheduler. Task sets are drained in
/// submission order and tasks are assigned to whichever executor has spare
/// cores, without priority, locality, or speculation.
pub struct FifoTaskScheduler {
    state: Mutex<FifoState>,
    cpus_per_task: usize,
}

struct FifoState {
    task_sets: HashMap<TaskSetId, TaskSetQueue>,
    order: VecDeque<TaskSetId>,
}

struct TaskSetQueue {
    queued: VecDeque<TaskDescription>,
    aborted: bool,
}

impl FifoTaskScheduler {
    pub fn new(cpus_per_task: usize) -> Self {
        Self {
            state: Mutex::new(FifoState {
                task_sets: HashMap::new(),
                order: VecDeque::new(),
            }),
            cpus_per_task: cpus_per_task.max(1),
        }
    }

    pub fn submit_task_set(&self, task_set_id: TaskSetId, tasks: Vec<TaskDescription>) {
        let mut state = lock(&self.state);
        info!(
            "submitting task set {task_set_id} with {} tasks",
            tasks.len()
        );
        state.task_sets.insert(
            task_set_id,
            TaskSetQueue {
                queued: tasks.into(),
                aborted: false,
            },
        );
        state.order.push_back(task_set_id);
    }

    pub fn is_aborted(&self, task_set_id: TaskSetId) -> bool {
        lock(&self.state)
            .task_sets
            .get(&task_set_id)
            .is_some_and(|x| x.aborted)
    }
}

impl TaskScheduler for FifoTaskScheduler {
    fn resource_offers(&self, offers: &[ExecutorOffer]) -> Vec<TaskDescription> {
        let mut state = lock(&self.state);
        let state = &mut *state;
        let mut launched = vec![];
        for offer in offers {
            let mut free = offer.free_cores;
            while free >= self.cpus_per_task {
                let Some(mut task) = next_task(state) else {
                    break;
                };
                task.executor_id = offer.executor_id.clone();
                free -= self.cpus_per_task;
                launched.push(task);
            }
        }
        launched
    }

    fn status_update(&self, task_id: TaskId, state: TaskState, data: &[u8]) {
        info!(
            "task {task_id} is {state} ({} bytes of result data)",
            data.len()
        );
    }

    fn executor_lost(&self, executor_id: &ExecutorId, reason: &str) {
        warn!("executor {executor_id} lost: {reason}");
    }

    fn abort_task_set(&self, task_set_id: TaskSetId, message: &str) {
        let mut state = lock(&self.state);
        if let Some(set) = state.task_sets.get_mut(&task_set_id) {
            if !set.aborted {
                warn!("aborting task set {task_set_id}: {message}");
                set.aborted = true;
                set.queued.clear();
            }
        }
    }

    fn pending_task_count(&self, task_set_id: TaskSetId) -> usize {
        lock(&self.state)
            .task_sets
            .get(&task_set_id)
            .map(|x| x.queued.len())
            .unwrap_or(0)
    }

    fn cpus_per_task(&self) -> usize {
        self.cpus_per_task
    }
}

fn next_task(state: &mut FifoState) -> Option<TaskDescription> {
    while let Some(&task_set_id) = state.order.front() {
        let Some(set) = state.task_sets.get_mut(&task_set_id) else {
            state.order.pop_front();
            continue;
        };
        if set.aborted || set.queued.is_empty() {
            state.order.pop_front();
            continue;
        }
        return set.queued.pop_front();
    }
    None
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;

    fn task(task_id: u64, task_set_id: u64) -> TaskDescription {
        TaskDescription {
            task_id: TaskId::from(task_id),
            attempt: 0,
            name: format!("task {task_id}"),
            task_set_id: TaskSetId::from(task_set_id),
            executor_id: ExecutorId::from(""),
            blocks: vec![],
            payload: vec![],
        }
    }

    #[test]
    fn test_fifo_offers_assign_executors() {
        let scheduler = FifoTaskScheduler::new(1);
        scheduler.submit_task_set(TaskSetId::from(1), vec![task(1, 1), task(2, 1), task(3, 1)]);
        let offers = vec![
            ExecutorOffer {
                executor_id: ExecutorId::from("a"),
                host: "host-a".to_string(),
                free_cores: 2,
            },
            ExecutorOffer {
                executor_id: ExecutorId::from("b"),
                host: "host-b".to_string(),
                free_cores: 2,
            },
        ];
        let launched = scheduler.resource_offers(&offers);
        assert_eq!(launched.len(), 3);
        assert_eq!(launched[0].executor_id, ExecutorId::from("a"));
        assert_eq!(launched[1].executor_id, ExecutorId::from("a"));
        assert_eq!(launched[2].executor_id, ExecutorId::from("b"));
        assert_eq!(scheduler.pending_task_count(TaskSetId::from(1)), 0);
    }

    #[test]
    fn test_aborted_task_set_stops_offering() {
        let scheduler = FifoTaskScheduler::new(1);
        scheduler.submit_task_set(TaskSetId::from(1), vec![task(1, 1), task(2, 1)]);
        scheduler.abort_task_set(TaskSetId::from(1), "too large");
        let offers = vec![ExecutorOffer {
            executor_id: ExecutorId::from("a"),
            host: "host-a".to_string(),
            free_cores: 4,
        }];
        assert!(scheduler.resource_offers(&offers).is_empty());
        assert!(scheduler.is_aborted(TaskSetId::from(1)));
    }
}
