use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::warn;

use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::ExecutorClient;
use crate::id::ExecutorId;
use crate::scheduler::ExecutorOffer;

/// The driver-side record of one registered executor.
#[derive(Debug, Clone)]
pub struct ExecutorData {
    pub host: String,
    pub port: u16,
    pub total_cores: usize,
    pub free_cores: usize,
    pub log_urls: Vec<(String, String)>,
    pub client: ExecutorClient,
    pub heartbeat_at: Instant,
}

impl ExecutorData {
    pub fn new(
        host: String,
        port: u16,
        total_cores: usize,
        log_urls: Vec<(String, String)>,
        client: ExecutorClient,
    ) -> Self {
        Self {
            host,
            port,
            total_cores,
            free_cores: total_cores,
            log_urls,
            client,
            heartbeat_at: Instant::now(),
        }
    }
}

struct RegistryInner {
    executors: HashMap<ExecutorId, ExecutorData>,
    /// Executors requested from the executor manager but not yet registered.
    pending_executor_count: usize,
    /// Executors the manager has been asked to kill but which have not
    /// disconnected yet.
    pending_removal: HashSet<ExecutorId>,
    /// The executor count last requested from the manager, used by the
    /// readiness ratio check.
    target_executor_count: usize,
}

/// The registry of live executors plus the executor-allocation bookkeeping.
///
/// The map, the pending counters, and the pending-removal set share one
/// mutex because the allocation API reads and writes them together from
/// outside the driver endpoint. The aggregate counters are atomics updated
/// in the same critical section as the map, so readers that do not take the
/// lock still observe values that are monotonic with respect to the last
/// completed insert or remove.
pub struct ExecutorRegistry {
    inner: Mutex<RegistryInner>,
    total_core_count: AtomicUsize,
    registered_executor_count: AtomicUsize,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                executors: HashMap::new(),
                pending_executor_count: 0,
                pending_removal: HashSet::new(),
                target_executor_count: 0,
            }),
            total_core_count: AtomicUsize::new(0),
            registered_executor_count: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, executor_id: ExecutorId, data: ExecutorData) -> ExecutionResult<()> {
        let mut inner = self.lock();
        if inner.executors.contains_key(&executor_id) {
            return Err(ExecutionError::DuplicateExecutor(executor_id));
        }
        let cores = data.total_cores;
        inner.executors.insert(executor_id, data);
        inner.pending_executor_count = inner.pending_executor_count.saturating_sub(1);
        self.total_core_count.fetch_add(cores, Ordering::SeqCst);
        self.registered_executor_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn remove(&self, executor_id: &ExecutorId) -> ExecutionResult<ExecutorData> {
        let mut inner = self.lock();
        let Some(data) = inner.executors.remove(executor_id) else {
            return Err(ExecutionError::UnknownExecutor(executor_id.clone()));
        };
        inner.pending_removal.remove(executor_id);
        self.total_core_count
            .fetch_sub(data.total_cores, Ordering::SeqCst);
        self.registered_executor_count.fetch_sub(1, Ordering::SeqCst);
        Ok(data)
    }

    pub fn contains(&self, executor_id: &ExecutorId) -> bool {
        self.lock().executors.contains_key(executor_id)
    }

    /// Adjust the free cores of an executor by the given delta, clamped to
    /// the `[0, total_cores]` range.
    pub fn adjust_free_cores(&self, executor_id: &ExecutorId, delta: i64) -> ExecutionResult<usize> {
        let mut inner = self.lock();
        let Some(data) = inner.executors.get_mut(executor_id) else {
            return Err(ExecutionError::UnknownExecutor(executor_id.clone()));
        };
        let free = data.free_cores as i64 + delta;
        if free < 0 || free > data.total_cores as i64 {
            warn!(
                "free cores of executor {executor_id} clamped: {} + {delta} outside [0, {}]",
                data.free_cores, data.total_cores
            );
        }
        data.free_cores = free.clamp(0, data.total_cores as i64) as usize;
        Ok(data.free_cores)
    }

    pub fn record_heartbeat(&self, executor_id: &ExecutorId) -> ExecutionResult<Instant> {
        let mut inner = self.lock();
        let Some(data) = inner.executors.get_mut(executor_id) else {
            return Err(ExecutionError::UnknownExecutor(executor_id.clone()));
        };
        data.heartbeat_at = Instant::now();
        Ok(data.heartbeat_at)
    }

    pub fn heartbeat_at(&self, executor_id: &ExecutorId) -> Option<Instant> {
        self.lock().executors.get(executor_id).map(|x| x.heartbeat_at)
    }

    /// Capacity offers for every registered executor, in unspecified order.
    pub fn snapshot_offers(&self) -> Vec<ExecutorOffer> {
        self.lock()
            .executors
            .iter()
            .map(|(executor_id, data)| ExecutorOffer {
                executor_id: executor_id.clone(),
                host: data.host.clone(),
                free_cores: data.free_cores,
            })
            .collect()
    }

    pub fn offer_for(&self, executor_id: &ExecutorId) -> Option<ExecutorOffer> {
        self.lock().executors.get(executor_id).map(|data| ExecutorOffer {
            executor_id: executor_id.clone(),
            host: data.host.clone(),
            free_cores: data.free_cores,
        })
    }

    pub fn client(&self, executor_id: &ExecutorId) -> Option<ExecutorClient> {
        self.lock()
            .executors
            .get(executor_id)
            .map(|data| data.client.clone())
    }

    pub fn clients(&self) -> Vec<(ExecutorId, ExecutorClient)> {
        self.lock()
            .executors
            .iter()
            .map(|(executor_id, data)| (executor_id.clone(), data.client.clone()))
            .collect()
    }

    pub fn total_core_count(&self) -> usize {
        self.total_core_count.load(Ordering::SeqCst)
    }

    pub fn registered_executor_count(&self) -> usize {
        self.registered_executor_count.load(Ordering::SeqCst)
    }

    pub fn pending_executor_count(&self) -> usize {
        self.lock().pending_executor_count
    }

    pub fn target_executor_count(&self) -> usize {
        self.lock().target_executor_count
    }

    pub fn is_pending_removal(&self, executor_id: &ExecutorId) -> bool {
        self.lock().pending_removal.contains(executor_id)
    }

    /// Record a request for additional executors and return the new total to
    /// ask the executor manager for.
    pub fn note_requested_executors(&self, additional: usize) -> usize {
        let mut inner = self.lock();
        inner.pending_executor_count += additional;
        let total = (inner.executors.len() + inner.pending_executor_count)
            .saturating_sub(inner.pending_removal.len());
        inner.target_executor_count = total;
        total
    }

    /// Record a request for an absolute executor count and return it.
    pub fn note_total_executors(&self, total: usize) -> usize {
        let mut inner = self.lock();
        inner.pending_executor_count = (total + inner.pending_removal.len())
            .saturating_sub(inner.executors.len());
        inner.target_executor_count = total;
        total
    }

    /// Record a kill request. Returns the subset of ids that are actually
    /// registered and the new total to ask the executor manager for.
    pub fn note_killed_executors(&self, executor_ids: &[ExecutorId]) -> (Vec<ExecutorId>, usize) {
        let mut inner = self.lock();
        let filtered: Vec<ExecutorId> = executor_ids
            .iter()
            .filter(|id| inner.executors.contains_key(*id))
            .cloned()
            .collect();
        let total = (inner.executors.len() + inner.pending_executor_count)
            .saturating_sub(inner.pending_removal.len())
            .saturating_sub(filtered.len());
        inner.pending_removal.extend(filtered.iter().cloned());
        inner.target_executor_count = total;
        (filtered, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ClientOptions;

    fn client() -> ExecutorClient {
        ExecutorClient::new(ClientOptions {
            enable_tls: false,
            host: "127.0.0.1".to_string(),
            port: 1,
        })
    }

    fn data(cores: usize) -> ExecutorData {
        ExecutorData::new("host".to_string(), 1, cores, vec![], client())
    }

    #[test]
    fn test_insert_updates_counters() {
        let registry = ExecutorRegistry::new();
        registry.insert(ExecutorId::from("e1"), data(4)).unwrap();
        assert_eq!(registry.total_core_count(), 4);
        assert_eq!(registry.registered_executor_count(), 1);
        let offers = registry.snapshot_offers();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].executor_id, ExecutorId::from("e1"));
        assert_eq!(offers[0].free_cores, 4);
    }

    #[test]
    fn test_duplicate_insert_is_rejected_and_leaves_state_unchanged() {
        let registry = ExecutorRegistry::new();
        registry.insert(ExecutorId::from("e1"), data(4)).unwrap();
        let result = registry.insert(ExecutorId::from("e1"), data(8));
        assert!(matches!(result, Err(ExecutionError::DuplicateExecutor(_))));
        assert_eq!(registry.total_core_count(), 4);
        assert_eq!(registry.registered_executor_count(), 1);
    }

    #[test]
    fn test_remove_updates_counters_and_pending_removal() {
        let registry = ExecutorRegistry::new();
        registry.insert(ExecutorId::from("e1"), data(4)).unwrap();
        registry.insert(ExecutorId::from("e2"), data(2)).unwrap();
        registry.note_killed_executors(&[ExecutorId::from("e1")]);
        assert!(registry.is_pending_removal(&ExecutorId::from("e1")));
        let removed = registry.remove(&ExecutorId::from("e1")).unwrap();
        assert_eq!(removed.total_cores, 4);
        assert_eq!(registry.total_core_count(), 2);
        assert_eq!(registry.registered_executor_count(), 1);
        assert!(!registry.is_pending_removal(&ExecutorId::from("e1")));
        assert!(matches!(
            registry.remove(&ExecutorId::from("e1")),
            Err(ExecutionError::UnknownExecutor(_))
        ));
    }

    #[test]
    fn test_free_cores_are_clamped() {
        let registry = ExecutorRegistry::new();
        registry.insert(ExecutorId::from("e1"), data(4)).unwrap();
        assert_eq!(
            registry.adjust_free_cores(&ExecutorId::from("e1"), -3).unwrap(),
            1
        );
        assert_eq!(
            registry.adjust_free_cores(&ExecutorId::from("e1"), -3).unwrap(),
            0
        );
        assert_eq!(
            registry.adjust_free_cores(&ExecutorId::from("e1"), 10).unwrap(),
            4
        );
    }

    #[test]
    fn test_allocation_arithmetic() {
        let registry = ExecutorRegistry::new();
        registry.insert(ExecutorId::from("e1"), data(2)).unwrap();
        registry.insert(ExecutorId::from("e2"), data(2)).unwrap();
        // existing + pending - pending_removal
        assert_eq!(registry.note_requested_executors(3), 5);
        assert_eq!(registry.pending_executor_count(), 3);
        // killing one subtracts it from the target and marks it for removal
        let (filtered, total) = registry.note_killed_executors(&[
            ExecutorId::from("e1"),
            ExecutorId::from("missing"),
        ]);
        assert_eq!(filtered, vec![ExecutorId::from("e1")]);
        assert_eq!(total, 4);
        assert!(registry.is_pending_removal(&ExecutorId::from("e1")));
    }

    #[test]
    fn test_note_total_executors_clamps_pending_at_zero() {
        let registry = ExecutorRegistry::new();
        registry.insert(ExecutorId::from("e1"), data(2)).unwrap();
        registry.insert(ExecutorId::from("e2"), data(2)).unwrap();
        assert_eq!(registry.note_total_executors(1), 1);
        assert_eq!(registry.pending_executor_count(), 0);
        assert_eq!(registry.note_total_executors(5), 5);
        assert_eq!(registry.pending_executor_count(), 3);
    }

    #[test]
    fn test_registration_consumes_pending_count() {
        let registry = ExecutorRegistry::new();
        registry.note_requested_executors(1);
        assert_eq!(registry.pending_executor_count(), 1);
        registry.insert(ExecutorId::from("e1"), data(2)).unwrap();
        assert_eq!(registry.pending_executor_count(), 0);
        // registration without a pending request keeps the count at zero
        registry.insert(ExecutorId::from("e2"), data(2)).unwrap();
        assert_eq!(registry.pending_executor_count(), 0);
    }
}
