use tokio::sync::oneshot;

use crate::block::{BlockInfo, BlockManagerId};
use crate::id::{BlockId, ExecutorId, TaskId};
use crate::task::TaskState;

pub enum ExecutorEvent {
    ServerReady {
        /// The local port that the executor server listens on.
        /// This may be different from the port accessible from other nodes.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    /// Registration with the driver succeeded; the task runner can start.
    RegisteredExecutor,
    StartHeartbeat,
    LaunchTask {
        data: Vec<u8>,
    },
    KillTask {
        task_id: TaskId,
        interrupt: bool,
    },
    RemoveFetch {
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        task_id: TaskId,
        blocks: Vec<(BlockManagerId, Vec<BlockId>)>,
    },
    AddFetch {
        task_id: TaskId,
        blocks: Vec<BlockInfo>,
    },
    MoveFetchResults {
        block_ids: Vec<BlockId>,
        from_task: TaskId,
        to_task: TaskId,
    },
    LockTask {
        task_id: TaskId,
    },
    UnlockTask {
        task_id: TaskId,
    },
    /// The consumer for a task has finished, successfully or not.
    TaskFinished {
        task_id: TaskId,
        state: TaskState,
        data: Vec<u8>,
    },
    Shutdown,
}
