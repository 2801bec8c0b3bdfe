use prost::Message;

use crate::error::ExecutionResult;
use crate::gen;
use crate::task::TaskDescription;

/// Serializes task descriptions for dispatch. The driver encodes a task once
/// and sends the bytes verbatim; the executor decodes them before handing the
/// task to its runner.
pub trait TaskCodec: Send + Sync {
    fn encode(&self, task: TaskDescription) -> ExecutionResult<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> ExecutionResult<TaskDescription>;
}

#[derive(Debug, Default)]
pub struct ProstTaskCodec;

impl TaskCodec for ProstTaskCodec {
    fn encode(&self, task: TaskDescription) -> ExecutionResult<Vec<u8>> {
        let message = gen::TaskDescription::from(task);
        let mut buffer = Vec::with_capacity(message.encoded_len());
        message.encode(&mut buffer)?;
        Ok(buffer)
    }

    fn decode(&self, data: &[u8]) -> ExecutionResult<TaskDescription> {
        gen::TaskDescription::decode(data)?.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockInfo, BlockManagerId};
    use crate::id::{BlockId, ExecutorId, TaskId, TaskSetId};

    #[test]
    fn test_prost_task_codec() {
        let codec = ProstTaskCodec;
        let task = TaskDescription {
            task_id: TaskId::from(7),
            attempt: 1,
            name: "stage 2 partition 3".to_string(),
            task_set_id: TaskSetId::from(2),
            executor_id: ExecutorId::from("exec-1"),
            blocks: vec![BlockInfo {
                block_id: BlockId::from("shuffle_2_0_3"),
                block_manager: BlockManagerId {
                    executor_id: ExecutorId::from("exec-2"),
                    host: "10.0.0.2".to_string(),
                    port: 7337,
                },
                size: 4096,
            }],
            payload: b"opaque".to_vec(),
        };
        let data = codec.encode(task.clone()).unwrap();
        let decoded = codec.decode(&data).unwrap();
        assert_eq!(decoded.task_id, task.task_id);
        assert_eq!(decoded.executor_id, task.executor_id);
        assert_eq!(decoded.blocks, task.blocks);
        assert_eq!(decoded.payload, task.payload);
    }
}
