pub mod loader;
pub mod models;

pub use models::{
    GatewayFileConfig, GrpcProxyConfig, LogClass, LoggerConfig, Protocol, ServiceConfig,
    ServiceKind,
};
