//! Port (interface) for the per-service HTTP clients used to forward
//! requests and probe backend health.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Response, StatusCode},
};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced by backend client operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// The backend could not be reached (connect refused, reset, EOF).
    #[error("connection error: {0}")]
    Connection(String),

    /// The configured deadline elapsed before a response arrived.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The outgoing request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// One pooled client bound to a single backend (`protocol://host:port`).
///
/// Every request goes out with `Connection: close` and without redirect
/// following, so 3xx responses flow back to the caller unchanged.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Send a request built from parts against the backend; `relative_url`
    /// is appended to the client's base address.
    async fn do_request(
        &self,
        method: Method,
        relative_url: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> ClientResult<Response<Body>>;

    /// Forward an incoming request wholesale: method, relative URL with
    /// query, headers and a (possibly streaming) body.
    async fn pipe(
        &self,
        method: Method,
        relative_url: &str,
        headers: HeaderMap,
        body: Body,
    ) -> ClientResult<Response<Body>>;

    /// Health-probe escape hatch: GET an absolute URL under an explicit
    /// deadline, returning only the status code.
    async fn probe(&self, url: &str, deadline: Duration) -> ClientResult<StatusCode>;
}
