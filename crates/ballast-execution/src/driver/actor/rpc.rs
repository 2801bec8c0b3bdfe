use ballast_server::actor::ActorHandle;
use ballast_server::builder::{ServerBuilder, ServerBuilderOptions};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::driver::actor::DriverActor;
use crate::driver::server::DriverServer;
use crate::driver::DriverEvent;
use crate::error::{ExecutionError, ExecutionResult};
use crate::gen;
use crate::gen::driver_service_server::DriverServiceServer;

impl DriverActor {
    pub(super) async fn serve(
        handle: ActorHandle<DriverActor>,
        addr: (String, u16),
        properties: Vec<(String, String)>,
    ) -> ExecutionResult<()> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = oneshot::channel();
        handle
            .send(DriverEvent::ServerReady { port, signal: tx })
            .await?;
        let server = DriverServer::new(handle, properties);
        let service = DriverServiceServer::new(server);
        ServerBuilder::new("ballast_driver", ServerBuilderOptions::default())
            .add_service(service, Some(gen::FILE_DESCRIPTOR_SET))
            .await
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .map_err(|e| ExecutionError::InternalError(format!("driver server failed: {e}")))
    }
}
