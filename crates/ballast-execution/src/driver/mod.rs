mod actor;
mod client;
mod event;
mod options;
mod registry;
mod server;

pub use actor::DriverActor;
pub use client::DriverClient;
pub use event::DriverEvent;
pub use options::DriverOptions;
pub use registry::{ExecutorData, ExecutorRegistry};
