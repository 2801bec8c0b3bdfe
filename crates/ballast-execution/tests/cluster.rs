use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_common::config::AppConfig;
use ballast_execution::backend::{CoarseSchedulerBackend, SchedulerBackend};
use ballast_execution::codec::ProstTaskCodec;
use ballast_execution::events::EventBus;
use ballast_execution::executor::fetch::MemoryBlockFetcher;
use ballast_execution::executor::task_runner::DigestTaskProcessor;
use ballast_execution::id::{ExecutorId, TaskId, TaskSetId};
use ballast_execution::manager::LocalExecutorManager;
use ballast_execution::scheduler::{ExecutorOffer, TaskScheduler};
use ballast_execution::task::{TaskDescription, TaskState};
use tokio::sync::mpsc;

struct TestScheduler {
    queued: Mutex<VecDeque<TaskDescription>>,
    aborts: Mutex<Vec<(TaskSetId, String)>>,
    lost: Mutex<Vec<(ExecutorId, String)>>,
    terminal: mpsc::UnboundedSender<(TaskId, TaskState, Vec<u8>)>,
}

impl TestScheduler {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(TaskId, TaskState, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            queued: Mutex::new(VecDeque::new()),
            aborts: Mutex::new(vec![]),
            lost: Mutex::new(vec![]),
            terminal: tx,
        });
        (scheduler, rx)
    }

    fn submit(&self, tasks: Vec<TaskDescription>) {
        self.queued.lock().unwrap().extend(tasks);
    }

    fn aborts(&self) -> Vec<(TaskSetId, String)> {
        self.aborts.lock().unwrap().clone()
    }

    fn lost(&self) -> Vec<(ExecutorId, String)> {
        self.lost.lock().unwrap().clone()
    }
}

impl TaskScheduler for TestScheduler {
    fn resource_offers(&self, offers: &[ExecutorOffer]) -> Vec<TaskDescription> {
        let mut queued = self.queued.lock().unwrap();
        let mut launched = vec![];
        for offer in offers {
            let mut free = offer.free_cores;
            while free > 0 {
                let Some(mut task) = queued.pop_front() else {
                    break;
                };
                task.executor_id = offer.executor_id.clone();
                free -= 1;
                launched.push(task);
            }
        }
        launched
    }

    fn status_update(&self, task_id: TaskId, state: TaskState, data: &[u8]) {
        if state.is_terminal() {
            let _ = self.terminal.send((task_id, state, data.to_vec()));
        }
    }

    fn executor_lost(&self, executor_id: &ExecutorId, reason: &str) {
        self.lost
            .lock()
            .unwrap()
            .push((executor_id.clone(), reason.to_string()));
    }

    fn abort_task_set(&self, task_set_id: TaskSetId, message: &str) {
        self.aborts
            .lock()
            .unwrap()
            .push((task_set_id, message.to_string()));
        self.queued
            .lock()
            .unwrap()
            .retain(|task| task.task_set_id != task_set_id);
    }

    fn pending_task_count(&self, task_set_id: TaskSetId) -> usize {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .filter(|task| task.task_set_id == task_set_id)
            .count()
    }

    fn cpus_per_task(&self) -> usize {
        1
    }
}

fn task(task_id: u64, task_set_id: u64, payload: Vec<u8>) -> TaskDescription {
    TaskDescription {
        task_id: TaskId::from(task_id),
        attempt: 0,
        name: format!("test task {task_id}"),
        task_set_id: TaskSetId::from(task_set_id),
        executor_id: ExecutorId::from(""),
        blocks: vec![],
        payload,
    }
}

async fn start_cluster(
    config: AppConfig,
    scheduler: Arc<TestScheduler>,
    executors: usize,
    cores_per_executor: usize,
) -> CoarseSchedulerBackend {
    let codec = Arc::new(ProstTaskCodec);
    let manager = Arc::new(LocalExecutorManager::new(
        config.clone(),
        "test-app".to_string(),
        cores_per_executor,
        codec.clone(),
        Arc::new(MemoryBlockFetcher::new()),
        Arc::new(DigestTaskProcessor::new()),
    ));
    let backend = CoarseSchedulerBackend::new(
        config,
        scheduler,
        manager,
        codec,
        Arc::new(EventBus::new()),
    );
    backend.start().await.unwrap();
    // The driver server binds asynchronously; keep asking until the
    // executor manager has learned its address.
    for _ in 0..100 {
        if backend.request_total_executors(executors as i64).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for _ in 0..100 {
        if backend.num_existing_executors() == executors {
            return backend;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("executors did not register in time");
}

#[tokio::test]
async fn test_task_runs_to_completion() {
    let (scheduler, mut terminal) = TestScheduler::new();
    let config = AppConfig::load().unwrap();
    let backend = start_cluster(config, scheduler.clone(), 1, 4).await;
    assert_eq!(backend.num_existing_executors(), 1);
    assert_eq!(backend.registry().total_core_count(), 4);
    assert_eq!(backend.default_parallelism(), 4);

    scheduler.submit(vec![task(1, 1, b"payload".to_vec())]);
    backend.revive_offers().await.unwrap();

    let (task_id, state, data) =
        tokio::time::timeout(Duration::from_secs(30), terminal.recv())
            .await
            .expect("task did not finish in time")
            .expect("terminal channel closed");
    assert_eq!(task_id, TaskId::from(1));
    assert_eq!(state, TaskState::Finished);
    assert_eq!(data, b"blocks=0 bytes=0");

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_task_aborts_its_set() {
    let (scheduler, mut terminal) = TestScheduler::new();
    let mut config = AppConfig::load().unwrap();
    config.driver.max_frame_size = 256;
    config.driver.frame_reserved_bytes = 0;
    let backend = start_cluster(config, scheduler.clone(), 1, 2).await;

    scheduler.submit(vec![
        task(1, 1, vec![0u8; 4096]),
        task(2, 1, b"small".to_vec()),
    ]);
    backend.revive_offers().await.unwrap();

    for _ in 0..100 {
        if !scheduler.aborts().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let aborts = scheduler.aborts();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].0, TaskSetId::from(1));
    assert!(aborts[0].1.contains("task 1"));
    assert!(aborts[0].1.contains("exceeds the limit"));
    // The oversized task was never dispatched.
    assert!(terminal.try_recv().is_err());

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_silent_executor_is_removed() {
    let (scheduler, _terminal) = TestScheduler::new();
    let mut config = AppConfig::load().unwrap();
    // The executor never manages a heartbeat before the driver's timeout.
    config.executor.heartbeat_interval_ms = 60_000;
    config.driver.executor_heartbeat_timeout_ms = 1_000;
    let backend = start_cluster(config, scheduler.clone(), 1, 2).await;
    assert_eq!(backend.num_existing_executors(), 1);

    for _ in 0..100 {
        if backend.num_existing_executors() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(backend.num_existing_executors(), 0);
    assert_eq!(backend.registry().total_core_count(), 0);
    let lost = scheduler.lost();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].1, "remote RPC client disassociated");

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_multiple_executors_share_a_task_set() {
    let (scheduler, mut terminal) = TestScheduler::new();
    let config = AppConfig::load().unwrap();
    let backend = start_cluster(config, scheduler.clone(), 2, 2).await;
    assert_eq!(backend.registry().total_core_count(), 4);

    scheduler.submit((1..=4).map(|i| task(i, 7, b"x".to_vec())).collect());
    backend.revive_offers().await.unwrap();

    let mut finished = vec![];
    for _ in 0..4 {
        let (task_id, state, _) =
            tokio::time::timeout(Duration::from_secs(30), terminal.recv())
                .await
                .expect("tasks did not finish in time")
                .expect("terminal channel closed");
        assert_eq!(state, TaskState::Finished);
        finished.push(task_id);
    }
    finished.sort();
    assert_eq!(
        finished,
        vec![
            TaskId::from(1),
            TaskId::from(2),
            TaskId::from(3),
            TaskId::from(4)
        ]
    );

    backend.stop().await.unwrap();
}
