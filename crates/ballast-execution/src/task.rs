use crate::block::BlockInfo;
use crate::error::{ExecutionError, ExecutionResult};
use crate::gen;
use crate::id::{ExecutorId, TaskId, TaskSetId};

/// The self-contained description of one task. The payload is opaque to the
/// coordinator and is interpreted by the task processor on the executor.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub attempt: usize,
    pub name: String,
    pub task_set_id: TaskSetId,
    /// The executor the task is assigned to. Empty until the task scheduler
    /// accepts a resource offer for it.
    pub executor_id: ExecutorId,
    /// The shuffle blocks the task fetches, in fetch order.
    pub blocks: Vec<BlockInfo>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskState {
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
            TaskState::Killed => "killed",
            TaskState::Lost => "lost",
        };
        write!(f, "{value}")
    }
}

impl From<TaskState> for gen::TaskState {
    fn from(value: TaskState) -> Self {
        match value {
            TaskState::Running => gen::TaskState::Running,
            TaskState::Finished => gen::TaskState::Finished,
            TaskState::Failed => gen::TaskState::Failed,
            TaskState::Killed => gen::TaskState::Killed,
            TaskState::Lost => gen::TaskState::Lost,
        }
    }
}

impl TryFrom<gen::TaskState> for TaskState {
    type Error = ExecutionError;

    fn try_from(value: gen::TaskState) -> ExecutionResult<Self> {
        match value {
            gen::TaskState::Running => Ok(TaskState::Running),
            gen::TaskState::Finished => Ok(TaskState::Finished),
            gen::TaskState::Failed => Ok(TaskState::Failed),
            gen::TaskState::Killed => Ok(TaskState::Killed),
            gen::TaskState::Lost => Ok(TaskState::Lost),
            gen::TaskState::Unspecified => Err(ExecutionError::InvalidArgument(
                "unspecified task state".to_string(),
            )),
        }
    }
}

impl From<TaskDescription> for gen::TaskDescription {
    fn from(value: TaskDescription) -> Self {
        Self {
            task_id: value.task_id.into(),
            attempt: value.attempt as u32,
            name: value.name,
            task_set_id: value.task_set_id.into(),
            executor_id: value.executor_id.into(),
            blocks: value.blocks.into_iter().map(|x| x.into()).collect(),
            payload: value.payload,
        }
    }
}

impl TryFrom<gen::TaskDescription> for TaskDescription {
    type Error = ExecutionError;

    fn try_from(value: gen::TaskDescription) -> ExecutionResult<Self> {
        let blocks = value
            .blocks
            .into_iter()
            .map(|x| x.try_into())
            .collect::<ExecutionResult<Vec<_>>>()?;
        Ok(Self {
            task_id: value.task_id.into(),
            attempt: value.attempt as usize,
            name: value.name,
            task_set_id: value.task_set_id.into(),
            executor_id: value.executor_id.into(),
            blocks,
            payload: value.payload,
        })
    }
}
