//! Transparent gRPC stream proxy.
//!
//! Listens on its own port and forwards any incoming stream to a
//! registered gRPC-kind service chosen by the first path segment of the
//! full method name (`/pkg.Service/Method` → service key `/pkg.Service`).
//!
//! gRPC frames are opaque bytes inside HTTP/2 DATA frames, so bridging a
//! bidirectional stream reduces to piping the request and response bodies
//! through untouched: hyper's streaming bodies carry DATA frames and the
//! trailers (`grpc-status` and friends) end to end in both directions.
//! There is no per-message deadline; the bridge dies when either side
//! errors. Lookup failures abort with gRPC status `Internal`.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response, StatusCode},
};
use eyre::{Result, WrapErr};
use hyper::{body::Incoming, server::conn::http2, service::service_fn};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    config::models::ServiceKind,
    core::registry::ServiceRegistry,
};

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

const GRPC_STATUS_HEADER: &str = "grpc-status";
const GRPC_MESSAGE_HEADER: &str = "grpc-message";
/// gRPC code 13.
const GRPC_STATUS_INTERNAL: &str = "13";

/// Derive the service lookup key from a full gRPC method path:
/// `/pkg.Service/Method` → `/pkg.Service`.
fn service_key(path: &str) -> Option<String> {
    let mut segments = path.split('/');
    segments.next()?; // leading empty segment
    let service = segments.next().filter(|s| !s.is_empty())?;
    Some(format!("/{service}"))
}

/// An `Internal` abort the way gRPC clients expect it: HTTP 200 with the
/// status carried in `grpc-status`.
fn grpc_internal_error(message: &str) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(GRPC_CONTENT_TYPE),
    );
    headers.insert(
        GRPC_STATUS_HEADER,
        HeaderValue::from_static(GRPC_STATUS_INTERNAL),
    );
    if let Ok(value) = HeaderValue::from_str(message) {
        headers.insert(GRPC_MESSAGE_HEADER, value);
    }
    response
}

#[derive(Clone)]
pub struct GrpcProxy {
    address: u16,
    registry: Arc<ServiceRegistry>,
    client: Client<HttpConnector, Body>,
}

impl GrpcProxy {
    pub fn new(address: u16, registry: Arc<ServiceRegistry>) -> Self {
        // Prior-knowledge HTTP/2 over cleartext; backend TLS is out of
        // scope.
        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build_http::<Body>();

        Self {
            address,
            registry,
            client,
        }
    }

    /// Accept loop: every connection is served as HTTP/2 with this proxy
    /// as the catch-all service. Runs until the token fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.address))
            .await
            .wrap_err_with(|| format!("binding grpc proxy to port {}", self.address))?;

        tracing::info!(port = self.address, "grpc proxy listening");

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::debug!(error = %err, "grpc accept error");
                        continue;
                    }
                },
                _ = shutdown.cancelled() => {
                    tracing::info!("grpc proxy stopped");
                    return Ok(());
                }
            };

            let proxy = self.clone();
            let conn_token = shutdown.child_token();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let proxy = proxy.clone();
                    async move { Ok::<_, Infallible>(proxy.forward(req).await) }
                });

                let conn = http2::Builder::new(TokioExecutor::new()).serve_connection(io, service);
                tokio::select! {
                    result = conn => {
                        if let Err(err) = result {
                            tracing::debug!(peer = %peer, error = %err, "grpc connection ended");
                        }
                    }
                    _ = conn_token.cancelled() => {}
                }
            });
        }
    }

    /// Bridge one stream: resolve the backend by service key and pipe the
    /// request through, returning the backend's streamed response.
    async fn forward(&self, req: Request<Incoming>) -> Response<Body> {
        let path = req.uri().path().to_string();

        let Some(key) = service_key(&path) else {
            return grpc_internal_error("malformed grpc method path");
        };

        let service = match self.registry.find(&key) {
            Some(service) if service.kind() == ServiceKind::Grpc => service,
            _ => return grpc_internal_error(&format!("service {key} not found")),
        };

        let (mut parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or(path);

        let target = format!("http://{}{}", service.address(), path_and_query);
        parts.uri = match target.parse() {
            Ok(uri) => uri,
            Err(_) => return grpc_internal_error("building backend uri"),
        };

        let outgoing = Request::from_parts(parts, Body::new(body));
        match self.client.request(outgoing).await {
            Ok(response) => {
                crate::metrics::record_grpc_stream(service.name());
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Err(err) => {
                tracing::error!(
                    service = service.name(),
                    error = %err,
                    "grpc forwarding failed"
                );
                grpc_internal_error(&format!("failed proxying to backend: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_key_takes_the_first_segment() {
        assert_eq!(
            service_key("/example.TestService/DoThing").as_deref(),
            Some("/example.TestService")
        );
        assert_eq!(service_key("/svc/Method/extra").as_deref(), Some("/svc"));
        assert_eq!(service_key("/"), None);
        assert_eq!(service_key(""), None);
    }

    #[test]
    fn internal_error_shape() {
        let res = grpc_internal_error("nope");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(GRPC_STATUS_HEADER).unwrap(), "13");
        assert_eq!(res.headers().get(GRPC_MESSAGE_HEADER).unwrap(), "nope");
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            GRPC_CONTENT_TYPE
        );
    }
}
