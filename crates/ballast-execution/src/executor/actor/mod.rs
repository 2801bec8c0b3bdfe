mod core;
mod handler;
mod rpc;

use crate::driver::DriverClient;
use crate::executor::options::ExecutorOptions;
use crate::executor::task_runner::TaskRunner;
use crate::rpc::ServerMonitor;

/// The lifecycle of an executor process.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExecutorLifecycle {
    Connecting,
    Registered,
    Running,
    Stopping,
}

pub struct ExecutorActor {
    pub(super) options: ExecutorOptions,
    pub(super) server: ServerMonitor,
    pub(super) driver_client: DriverClient,
    pub(super) lifecycle: ExecutorLifecycle,
    /// Present once registration with the driver has succeeded.
    pub(super) runner: Option<TaskRunner>,
}
