mod core;
mod handler;
mod rpc;

use std::collections::{HashMap, HashSet};

use crate::driver::options::DriverOptions;
use crate::id::{ExecutorId, TaskId, TaskSetId};
use crate::rpc::ServerMonitor;
use crate::skew::SkewMaster;

/// The single-consumer driver endpoint. All cluster state transitions run
/// through this actor's mailbox, one message at a time.
pub struct DriverActor {
    options: DriverOptions,
    server: ServerMonitor,
    /// One skew master per task set with in-flight tasks.
    skew_masters: HashMap<TaskSetId, SkewMaster>,
    /// Where each dispatched task went, used to route skew reports.
    launched_tasks: HashMap<TaskId, LaunchedTask>,
    /// Task sets that already received their one abort message.
    aborted_task_sets: HashSet<TaskSetId>,
}

struct LaunchedTask {
    executor_id: ExecutorId,
    task_set_id: TaskSetId,
}
