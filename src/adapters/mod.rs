//! I/O implementations of the ports: the hyper-backed backend client and
//! the transparent gRPC stream proxy.

pub mod grpc_proxy;
pub mod http_client;

pub use grpc_proxy::GrpcProxy;
pub use http_client::{ClientPool, HyperBackendClient};
