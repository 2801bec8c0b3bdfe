use crate::error::{ExecutionError, ExecutionResult};
use crate::gen;
use crate::id::{BlockId, ExecutorId};

/// The executor hosting a shuffle block.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct BlockManagerId {
    pub executor_id: ExecutorId,
    pub host: String,
    pub port: u16,
}

/// A shuffle block in some task's fetch queue.
/// A size of zero means the size has not been measured yet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockInfo {
    pub block_id: BlockId,
    pub block_manager: BlockManagerId,
    pub size: u64,
}

impl BlockInfo {
    pub fn is_measured(&self) -> bool {
        self.size > 0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BlockState {
    Fetched,
    Consumed,
    Reassigned,
}

#[derive(Debug, Clone)]
pub struct BlockStatusUpdate {
    pub block_id: BlockId,
    pub state: BlockState,
    pub size: Option<u64>,
}

impl From<BlockManagerId> for gen::BlockManagerId {
    fn from(value: BlockManagerId) -> Self {
        Self {
            executor_id: value.executor_id.into(),
            host: value.host,
            port: value.port as u32,
        }
    }
}

impl TryFrom<gen::BlockManagerId> for BlockManagerId {
    type Error = ExecutionError;

    fn try_from(value: gen::BlockManagerId) -> ExecutionResult<Self> {
        let port = u16::try_from(value.port).map_err(|_| {
            ExecutionError::InvalidArgument(format!(
                "block manager port out of range: {}",
                value.port
            ))
        })?;
        Ok(Self {
            executor_id: value.executor_id.into(),
            host: value.host,
            port,
        })
    }
}

impl From<BlockInfo> for gen::BlockDescriptor {
    fn from(value: BlockInfo) -> Self {
        Self {
            block_id: value.block_id.into(),
            block_manager: Some(value.block_manager.into()),
            size: value.size,
        }
    }
}

impl TryFrom<gen::BlockDescriptor> for BlockInfo {
    type Error = ExecutionError;

    fn try_from(value: gen::BlockDescriptor) -> ExecutionResult<Self> {
        let block_manager = value
            .block_manager
            .ok_or_else(|| {
                ExecutionError::InvalidArgument(format!(
                    "missing block manager for block {}",
                    value.block_id
                ))
            })?
            .try_into()?;
        Ok(Self {
            block_id: value.block_id.into(),
            block_manager,
            size: value.size,
        })
    }
}

impl From<BlockState> for gen::BlockState {
    fn from(value: BlockState) -> Self {
        match value {
            BlockState::Fetched => gen::BlockState::Fetched,
            BlockState::Consumed => gen::BlockState::Consumed,
            BlockState::Reassigned => gen::BlockState::Reassigned,
        }
    }
}

impl TryFrom<gen::BlockState> for BlockState {
    type Error = ExecutionError;

    fn try_from(value: gen::BlockState) -> ExecutionResult<Self> {
        match value {
            gen::BlockState::Fetched => Ok(BlockState::Fetched),
            gen::BlockState::Consumed => Ok(BlockState::Consumed),
            gen::BlockState::Reassigned => Ok(BlockState::Reassigned),
            gen::BlockState::Unspecified => Err(ExecutionError::InvalidArgument(
                "unspecified block state".to_string(),
            )),
        }
    }
}

impl From<BlockStatusUpdate> for gen::BlockStatusUpdate {
    fn from(value: BlockStatusUpdate) -> Self {
        Self {
            block_id: value.block_id.into(),
            state: gen::BlockState::from(value.state) as i32,
            size: value.size,
        }
    }
}

impl TryFrom<gen::BlockStatusUpdate> for BlockStatusUpdate {
    type Error = ExecutionError;

    fn try_from(value: gen::BlockStatusUpdate) -> ExecutionResult<Self> {
        let state = gen::BlockState::try_from(value.state)
            .map_err(|e| ExecutionError::InvalidArgument(e.to_string()))?
            .try_into()?;
        Ok(Self {
            block_id: value.block_id.into(),
            state,
            size: value.size,
        })
    }
}
