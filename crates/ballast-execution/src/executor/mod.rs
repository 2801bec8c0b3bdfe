mod actor;
mod client;
pub mod entrypoint;
mod event;
pub mod fetch;
mod options;
mod server;
pub mod task_runner;

pub use actor::{ExecutorActor, ExecutorLifecycle};
pub use client::ExecutorClient;
pub use event::ExecutorEvent;
pub use options::ExecutorOptions;
