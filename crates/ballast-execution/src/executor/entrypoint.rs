use ballast_server::actor::ActorSystem;
use log::info;

use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::{ExecutorActor, ExecutorOptions};

/// Run an executor until it stops. Returns an error when the executor died
/// of an unrecoverable condition (failed registration, lost driver), so the
/// process can exit with a non-zero status.
pub async fn run_executor(options: ExecutorOptions) -> ExecutionResult<()> {
    let executor_id = options.executor_id.clone();
    let fatal = options.fatal.clone();
    let mut system = ActorSystem::new();
    let _handle = system.spawn::<ExecutorActor>(options);
    system.join().await;
    match fatal.get() {
        Some(message) => Err(ExecutionError::InternalError(message.clone())),
        None => {
            info!("executor {executor_id} stopped");
            Ok(())
        }
    }
}
