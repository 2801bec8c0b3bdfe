use ballast_server::actor::ActorHandle;
use ballast_server::builder::{ServerBuilder, ServerBuilderOptions};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::actor::ExecutorActor;
use crate::executor::server::ExecutorServer;
use crate::executor::ExecutorEvent;
use crate::gen;
use crate::gen::executor_service_server::ExecutorServiceServer;

impl ExecutorActor {
    pub(super) async fn serve(
        handle: ActorHandle<ExecutorActor>,
        addr: (String, u16),
    ) -> ExecutionResult<()> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = oneshot::channel();
        handle
            .send(ExecutorEvent::ServerReady { port, signal: tx })
            .await?;
        let server = ExecutorServer::new(handle);
        let service = ExecutorServiceServer::new(server);
        ServerBuilder::new("ballast_executor", ServerBuilderOptions::default())
            .add_service(service, Some(gen::FILE_DESCRIPTOR_SET))
            .await
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .map_err(|e| ExecutionError::InternalError(format!("executor server failed: {e}")))
    }
}
