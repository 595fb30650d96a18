//! Core business logic: routing tree, request context, middleware
//! chains, services and the gateway composition root. This layer avoids
//! direct I/O where it can; sockets live behind the ports/adapters seam.

pub mod context;
pub mod gateway;
pub mod middleware;
pub mod registry;
pub mod route;
pub mod service;
pub mod tree;

pub use context::{PathParam, RequestContext};
pub use gateway::{Gateway, GatewayBuilder, RunLevel};
pub use middleware::{handler_fn, middleware_fn, HandlerFn, Middleware, MiddlewareFn};
pub use registry::ServiceRegistry;
pub use route::Route;
pub use service::{Service, ServiceState};
pub use tree::{PrefixTree, TreeError};
