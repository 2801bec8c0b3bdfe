use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use crate::block::{BlockInfo, BlockManagerId};
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{BlockId, ExecutorId, TaskId};

/// Obtains the bytes of a shuffle block from its host. Implementations wrap
/// whatever transport serves block data; the coordinator only sees this seam.
pub trait BlockFetcher: Send + Sync {
    fn fetch(&self, block: &BlockInfo) -> ExecutionResult<Vec<u8>>;
}

/// A map-backed block store, used in tests and as a stand-in transport for
/// local deployments.
#[derive(Default)]
pub struct MemoryBlockFetcher {
    blocks: RwLock<HashMap<BlockId, Vec<u8>>>,
}

impl MemoryBlockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, block_id: BlockId, data: Vec<u8>) {
        let mut blocks = match self.blocks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        blocks.insert(block_id, data);
    }
}

impl BlockFetcher for MemoryBlockFetcher {
    fn fetch(&self, block: &BlockInfo) -> ExecutionResult<Vec<u8>> {
        let blocks = match self.blocks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        blocks
            .get(&block.block_id)
            .cloned()
            .ok_or_else(|| ExecutionError::BlockUnavailable(block.block_id.clone()))
    }
}

/// A fetched block pending consumption by the task.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub block: BlockInfo,
    pub data: Vec<u8>,
}

/// Measurements accumulated by the fetch iterator between reports.
#[derive(Debug, Default)]
pub struct FetchObservations {
    /// Blocks fetched since the last report, with their measured sizes.
    pub fetched: Vec<(BlockId, u64)>,
    /// Blocks consumed by the task since the last report.
    pub consumed: Vec<BlockId>,
    /// Bytes and milliseconds downloaded per source executor.
    pub downloads: HashMap<ExecutorId, (u64, f64)>,
    pub compute_bytes: u64,
    pub compute_millis: f64,
}

impl FetchObservations {
    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty()
            && self.consumed.is_empty()
            && self.downloads.is_empty()
            && self.compute_bytes == 0
    }
}

struct FetchState {
    task_id: TaskId,
    /// Blocks not yet fetched, in fetch order.
    pending: VecDeque<BlockInfo>,
    /// Fetched blocks waiting for the consumer.
    results: VecDeque<FetchResult>,
    locked: bool,
    killed: bool,
    finished: bool,
    observations: FetchObservations,
}

struct FetchShared {
    state: Mutex<FetchState>,
    cond: Condvar,
}

/// The per-task fetch queue. The consumer thread pulls blocks through
/// [`FetchIterator::next`]; the executor endpoint mutates the queues
/// out-of-band when the driver rebalances work. The `locked` flag and the
/// condition variable are the synchronization boundary between the two:
/// a locked iterator parks its consumer, and every command is applied under
/// the same mutex, so the consumer observes all of them once it wakes.
#[derive(Clone)]
pub struct FetchIterator {
    shared: Arc<FetchShared>,
}

impl FetchIterator {
    /// Create an iterator for a task. New iterators start locked; the driver
    /// decides when the task may begin pulling blocks.
    pub fn new(task_id: TaskId, blocks: Vec<BlockInfo>) -> Self {
        Self {
            shared: Arc::new(FetchShared {
                state: Mutex::new(FetchState {
                    task_id,
                    pending: blocks.into(),
                    results: VecDeque::new(),
                    locked: true,
                    killed: false,
                    finished: false,
                    observations: FetchObservations::default(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FetchState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pull the next fetched block, fetching pending blocks as needed.
    /// Parks while the iterator is locked and re-checks the lock and kill
    /// flags after every wakeup. Returns `None` when all work is done.
    pub fn next(&self, fetcher: &dyn BlockFetcher) -> ExecutionResult<Option<FetchResult>> {
        loop {
            let block = {
                let mut state = self.lock_state();
                loop {
                    if state.killed {
                        return Err(ExecutionError::TaskKilled(state.task_id));
                    }
                    if !state.locked {
                        if let Some(result) = state.results.pop_front() {
                            state.observations.consumed.push(result.block.block_id.clone());
                            return Ok(Some(result));
                        }
                        match state.pending.pop_front() {
                            Some(block) => break block,
                            None => return Ok(None),
                        }
                    }
                    state = match self.shared.cond.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            };
            let start = Instant::now();
            let data = fetcher.fetch(&block)?;
            let millis = start.elapsed().as_secs_f64() * 1000.0;
            let mut state = self.lock_state();
            let size = data.len() as u64;
            state.observations.fetched.push((block.block_id.clone(), size));
            let download = state
                .observations
                .downloads
                .entry(block.block_manager.executor_id.clone())
                .or_insert((0, 0.0));
            download.0 += size;
            download.1 += millis;
            state.results.push_back(FetchResult { block, data });
        }
    }

    pub fn add_fetch_requests(&self, blocks: Vec<BlockInfo>) {
        let mut state = self.lock_state();
        state.pending.extend(blocks);
        self.shared.cond.notify_all();
    }

    /// Remove the named blocks from the pending queue and return the ones
    /// actually removed, in queue order. Blocks that are in flight or
    /// already fetched are left alone.
    pub fn remove_fetch_requests(
        &self,
        blocks: &[(BlockManagerId, Vec<BlockId>)],
    ) -> Vec<BlockInfo> {
        let wanted: HashSet<&BlockId> = blocks.iter().flat_map(|(_, ids)| ids.iter()).collect();
        let mut state = self.lock_state();
        let mut removed = vec![];
        state.pending.retain(|block| {
            if wanted.contains(&block.block_id) {
                removed.push(block.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn add_fetch_results(&self, results: Vec<FetchResult>) {
        let mut state = self.lock_state();
        state.results.extend(results);
        self.shared.cond.notify_all();
    }

    /// Remove the named fetched results, skipping blocks that are absent.
    pub fn remove_fetch_results(&self, block_ids: &[BlockId]) -> Vec<FetchResult> {
        let wanted: HashSet<&BlockId> = block_ids.iter().collect();
        let mut state = self.lock_state();
        let mut removed = vec![];
        state.results.retain(|result| {
            if wanted.contains(&result.block.block_id) {
                removed.push(result.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn set_locked(&self, locked: bool) {
        let mut state = self.lock_state();
        state.locked = locked;
        if !locked {
            self.shared.cond.notify_all();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state().locked
    }

    /// Mark the task killed. An interrupting kill wakes a parked consumer
    /// immediately; otherwise the flag is observed at the next boundary.
    pub fn kill(&self, interrupt: bool) {
        let mut state = self.lock_state();
        state.killed = true;
        drop(state);
        if interrupt {
            self.shared.cond.notify_all();
        }
    }

    pub fn mark_finished(&self) {
        self.lock_state().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.lock_state().finished
    }

    pub fn record_compute(&self, bytes: u64, millis: f64) {
        let mut state = self.lock_state();
        state.observations.compute_bytes += bytes;
        state.observations.compute_millis += millis;
    }

    pub fn take_observations(&self) -> FetchObservations {
        std::mem::take(&mut self.lock_state().observations)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn manager(executor: &str) -> BlockManagerId {
        BlockManagerId {
            executor_id: ExecutorId::from(executor),
            host: format!("{executor}.example"),
            port: 7337,
        }
    }

    fn block(id: &str, size: u64) -> BlockInfo {
        BlockInfo {
            block_id: BlockId::from(id),
            block_manager: manager("e0"),
            size,
        }
    }

    fn fetcher_with(blocks: &[(&str, &[u8])]) -> MemoryBlockFetcher {
        let fetcher = MemoryBlockFetcher::new();
        for (id, data) in blocks {
            fetcher.insert(BlockId::from(*id), data.to_vec());
        }
        fetcher
    }

    #[test]
    fn test_unlocked_iterator_drains_pending_blocks() {
        let fetcher = fetcher_with(&[("a", b"aaaa"), ("b", b"bb")]);
        let iterator = FetchIterator::new(TaskId::from(1), vec![block("a", 4), block("b", 2)]);
        iterator.set_locked(false);
        let first = iterator.next(&fetcher).unwrap().unwrap();
        assert_eq!(first.block.block_id, BlockId::from("a"));
        assert_eq!(first.data, b"aaaa");
        let second = iterator.next(&fetcher).unwrap().unwrap();
        assert_eq!(second.block.block_id, BlockId::from("b"));
        assert!(iterator.next(&fetcher).unwrap().is_none());
        let observations = iterator.take_observations();
        assert_eq!(observations.fetched.len(), 2);
        assert_eq!(observations.consumed.len(), 2);
    }

    #[test]
    fn test_locked_iterator_parks_until_unlocked() {
        let fetcher = Arc::new(fetcher_with(&[("a", b"aaaa")]));
        let iterator = FetchIterator::new(TaskId::from(1), vec![block("a", 4)]);
        let consumer = {
            let iterator = iterator.clone();
            let fetcher = fetcher.clone();
            std::thread::spawn(move || iterator.next(fetcher.as_ref()))
        };
        // The consumer should still be parked on the lock.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());
        iterator.set_locked(false);
        let result = consumer.join().unwrap().unwrap();
        assert_eq!(result.unwrap().block.block_id, BlockId::from("a"));
    }

    #[test]
    fn test_kill_exits_the_wait() {
        let fetcher = fetcher_with(&[]);
        let iterator = FetchIterator::new(TaskId::from(7), vec![block("a", 4)]);
        let consumer = {
            let iterator = iterator.clone();
            std::thread::spawn(move || iterator.next(&fetcher))
        };
        std::thread::sleep(Duration::from_millis(50));
        iterator.kill(true);
        let result = consumer.join().unwrap();
        assert!(matches!(result, Err(ExecutionError::TaskKilled(t)) if t == TaskId::from(7)));
    }

    #[test]
    fn test_remove_fetch_requests_skips_missing_blocks() {
        let iterator = FetchIterator::new(TaskId::from(1), vec![block("a", 4), block("b", 2)]);
        let removed = iterator.remove_fetch_requests(&[(
            manager("e0"),
            vec![BlockId::from("b"), BlockId::from("missing")],
        )]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].block_id, BlockId::from("b"));
    }

    #[test]
    fn test_result_move_and_mirror_is_a_no_op() {
        let source = FetchIterator::new(TaskId::from(1), vec![]);
        let target = FetchIterator::new(TaskId::from(2), vec![]);
        source.add_fetch_results(vec![FetchResult {
            block: block("a", 4),
            data: b"aaaa".to_vec(),
        }]);
        let ids = vec![BlockId::from("a")];
        let moved = source.remove_fetch_results(&ids);
        assert_eq!(moved.len(), 1);
        target.add_fetch_results(moved);
        let back = target.remove_fetch_results(&ids);
        assert_eq!(back.len(), 1);
        source.add_fetch_results(back);
        // The block ends up where it started and the target holds nothing.
        assert_eq!(source.remove_fetch_results(&ids).len(), 1);
        assert!(target.remove_fetch_results(&ids).is_empty());
    }

    #[test]
    fn test_lock_unlock_restores_wait_free_state() {
        let fetcher = fetcher_with(&[]);
        let iterator = FetchIterator::new(TaskId::from(1), vec![]);
        iterator.set_locked(false);
        assert!(iterator.next(&fetcher).unwrap().is_none());
        iterator.set_locked(true);
        iterator.set_locked(false);
        assert!(iterator.next(&fetcher).unwrap().is_none());
    }
}
