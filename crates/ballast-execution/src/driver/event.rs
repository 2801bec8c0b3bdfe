use tokio::sync::oneshot;

use crate::block::{BlockInfo, BlockStatusUpdate};
use crate::error::ExecutionResult;
use crate::id::{ExecutorId, TaskId};
use crate::task::TaskState;

pub enum DriverEvent {
    ServerReady {
        /// The local port that the driver server listens on.
        /// This may be different from the port accessible from other nodes.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    RegisterExecutor {
        executor_id: ExecutorId,
        host: String,
        port: u16,
        cores: usize,
        log_urls: Vec<(String, String)>,
        result: oneshot::Sender<ExecutionResult<()>>,
    },
    ExecutorHeartbeat {
        executor_id: ExecutorId,
    },
    ProbeLostExecutor {
        executor_id: ExecutorId,
        instant: std::time::Instant,
    },
    /// A task status update from an executor, also used internally to report
    /// dispatch failures.
    ReportTaskStatus {
        executor_id: ExecutorId,
        task_id: TaskId,
        state: TaskState,
        data: Vec<u8>,
    },
    ReviveOffers,
    KillTask {
        task_id: TaskId,
        executor_id: ExecutorId,
        interrupt: bool,
    },
    RemoveExecutor {
        executor_id: ExecutorId,
        reason: String,
        result: Option<oneshot::Sender<ExecutionResult<()>>>,
    },
    StopExecutors {
        result: oneshot::Sender<ExecutionResult<()>>,
    },
    StopDriver {
        result: oneshot::Sender<ExecutionResult<()>>,
    },
    RegisterTask {
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<BlockInfo>,
    },
    ReportBlockStatuses {
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    },
    ReportTaskFinished {
        task_id: TaskId,
    },
    ReportTaskComputeSpeed {
        task_id: TaskId,
        executor_id: ExecutorId,
        bytes_per_ms: f64,
    },
    ReportBlockDownloadSpeed {
        from_executor_id: ExecutorId,
        to_executor_id: ExecutorId,
        bytes_per_ms: f64,
    },
    TransferRemovedFetch {
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        blocks: Vec<BlockInfo>,
    },
}
