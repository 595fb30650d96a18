//! Portico — a prefix-routed API gateway.
//!
//! Portico accepts HTTP/1.x requests on one public address and either
//! serves them from registered in-process handlers or forwards them —
//! method, headers, body and response preserved — to backend services
//! chosen by URL prefix. Backend reachability is tracked continuously;
//! unhealthy backends are never forwarded to. An optional second listener
//! transparently proxies gRPC streams by service-name prefix.
//!
//! # Features
//! - Compressed radix-tree routing with `{name}` path parameters
//! - Longest-prefix service matching with per-service health states
//! - Pre/post middleware chains with short-circuit semantics, global and
//!   per route
//! - Pooled request contexts and per-service HTTP client pools
//! - Secret-gated management endpoints under `/api/system`
//! - Transparent gRPC stream bridging on a dedicated port
//!
//! # Quick example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::core::{handler_fn, Gateway};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let gateway = Gateway::builder()
//!     .with_address(8000)
//!     .with_secret_key("shared-secret")
//!     .build();
//!
//! gateway.get(
//!     "/api/hello/{name}",
//!     handler_fn(|ctx| {
//!         Box::pin(async move {
//!             let name = ctx.param("name").unwrap_or("world").to_string();
//!             ctx.send_raw(name.as_bytes(), axum::http::StatusCode::OK, Default::default());
//!         })
//!     }),
//! );
//!
//! Arc::new(gateway).start().await
//! # }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) and keeps the dispatch logic inside `core`. The
//! binary wires a catch-all axum router into [`core::Gateway::serve`];
//! embedders can do the same with any listener.
//!
//! # Error handling
//! Domain failures are `thiserror` enums; setup-time failures surface as
//! `eyre::Result`. Inside handlers and middlewares nothing propagates —
//! errors become responses.

pub mod admin;
pub mod config;
pub mod metrics;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;
pub mod ports;

pub use crate::{
    adapters::{GrpcProxy, HyperBackendClient},
    core::{Gateway, GatewayBuilder, RequestContext, Route},
    ports::http_client::BackendClient,
    utils::GracefulShutdown,
};
