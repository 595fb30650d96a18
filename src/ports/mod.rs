//! Trait seams between the core and its I/O adapters.

pub mod http_client;

pub use http_client::{BackendClient, ClientError, ClientResult};
