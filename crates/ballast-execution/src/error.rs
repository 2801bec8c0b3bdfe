use ballast_server::actor::ActorSendError;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::id::{BlockId, ExecutorId, TaskId, TaskSetId};

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("duplicate executor: {0}")]
    DuplicateExecutor(ExecutorId),
    #[error("unknown executor: {0}")]
    UnknownExecutor(ExecutorId),
    #[error(
        "serialized task {task_id} (index {index} in task set {task_set_id}) is {size} bytes, \
         which exceeds the limit of {limit} bytes ({frame_size} byte frame minus \
         {reserved} reserved bytes)"
    )]
    FrameSizeExceeded {
        task_id: TaskId,
        task_set_id: TaskSetId,
        index: usize,
        size: usize,
        limit: usize,
        frame_size: usize,
        reserved: usize,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to communicate with the scheduler backend: {0}")]
    SchedulerCommunication(String),
    #[error("task {0} was killed")]
    TaskKilled(TaskId),
    #[error("block {0} is unavailable")]
    BlockUnavailable(BlockId),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("error in RPC transport: {0}")]
    TonicTransportError(#[from] tonic::transport::Error),
    #[error("error in RPC call: {0}")]
    TonicStatusError(#[from] tonic::Status),
    #[error("error decoding message: {0}")]
    ProstDecodeError(#[from] prost::DecodeError),
    #[error("error encoding message: {0}")]
    ProstEncodeError(#[from] prost::EncodeError),
    #[error(transparent)]
    CommonError(#[from] ballast_common::error::CommonError),
    #[error("error sending message to actor: {0}")]
    ActorSendError(#[from] ActorSendError),
    #[error("error receiving reply: {0}")]
    OneshotRecvError(#[from] oneshot::error::RecvError),
}

impl From<ExecutionError> for tonic::Status {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::DuplicateExecutor(_) => {
                tonic::Status::already_exists(error.to_string())
            }
            ExecutionError::UnknownExecutor(_) => tonic::Status::not_found(error.to_string()),
            ExecutionError::InvalidArgument(_) => {
                tonic::Status::invalid_argument(error.to_string())
            }
            ExecutionError::TonicStatusError(status) => status,
            _ => tonic::Status::internal(error.to_string()),
        }
    }
}
