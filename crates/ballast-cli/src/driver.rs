use std::sync::Arc;
use std::time::Duration;

use ballast_common::config::AppConfig;
use ballast_common::runtime::RuntimeManager;
use ballast_execution::backend::{CoarseSchedulerBackend, SchedulerBackend};
use ballast_execution::codec::ProstTaskCodec;
use ballast_execution::events::{EventBus, LoggingEventListener};
use ballast_execution::executor::fetch::MemoryBlockFetcher;
use ballast_execution::executor::task_runner::DigestTaskProcessor;
use ballast_execution::manager::{ExecutorManager, LocalExecutorManager, UnmanagedExecutorManager};
use ballast_execution::scheduler::FifoTaskScheduler;
use ballast_server::retry::RetryStrategy;
use log::info;

use crate::DriverArgs;

pub fn run_driver(args: DriverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let runtime = RuntimeManager::try_new(&config.runtime)?;
    runtime.block_on(serve(config, args))
}

async fn serve(config: AppConfig, args: DriverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = Arc::new(FifoTaskScheduler::new(1));
    let codec = Arc::new(ProstTaskCodec);
    let manager: Arc<dyn ExecutorManager> = if args.local_executors > 0 {
        Arc::new(LocalExecutorManager::new(
            config.clone(),
            args.app_id.clone(),
            args.cores_per_executor,
            codec.clone(),
            Arc::new(MemoryBlockFetcher::new()),
            Arc::new(DigestTaskProcessor::new()),
        ))
    } else {
        Arc::new(UnmanagedExecutorManager)
    };
    let event_bus = Arc::new(EventBus::new().with_listener(Box::new(LoggingEventListener)));
    let backend = CoarseSchedulerBackend::new(config, scheduler, manager, codec, event_bus);
    backend.start().await?;

    if args.local_executors > 0 {
        // The driver endpoint binds asynchronously; keep asking until the
        // executor manager has learned its address.
        let startup = RetryStrategy::Fixed {
            max_count: 50,
            delay: Duration::from_millis(100),
        };
        startup
            .run(|| backend.request_total_executors(args.local_executors as i64))
            .await?;
    }

    info!("driver is running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    backend.stop().await?;
    Ok(())
}
