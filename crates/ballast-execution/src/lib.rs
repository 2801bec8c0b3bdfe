pub mod backend;
pub mod block;
pub mod codec;
pub mod driver;
pub mod error;
pub mod events;
pub mod executor;
pub mod id;
pub mod manager;
pub mod rpc;
pub mod scheduler;
pub mod skew;
pub mod task;

#[allow(clippy::all)]
pub(crate) mod gen {
    tonic::include_proto!("ballast.rpc");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("ballast_descriptor");
}

pub use executor::entrypoint::run_executor;
