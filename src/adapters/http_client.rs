//! HTTP client adapter using Hyper with Rustls, plus the per-service
//! client pool.
//!
//! Responsibilities:
//! * One client per backend base address (`protocol://host:port`)
//! * Deadline on every outgoing call, derived from the service timeout
//! * `Connection: close` on every request — no keep-alive reuse, which
//!   keeps failure semantics trivial at some throughput cost
//! * No redirect following, so 3xx bodies flow through unchanged
//!
//! The adapter is intentionally minimal; retries and circuit breaking
//! belong to a different layer if they are ever needed.

use std::{
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode},
};
use bytes::Bytes;
use eyre::Result;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::timeout;

use crate::ports::http_client::{BackendClient, ClientError, ClientResult};

/// Hyper-backed [`BackendClient`] bound to one backend address.
pub struct HyperBackendClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    base: String,
    timeout: Duration,
}

impl HyperBackendClient {
    /// Create a client for `base` (e.g. `http://127.0.0.1:3000`) with the
    /// given per-request deadline.
    pub fn new(base: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add native certificate to the root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                errors = ?native_certs.errors,
                "some native certificates failed to load"
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);

        Ok(Self {
            client,
            base: base.into(),
            timeout: request_timeout,
        })
    }

    fn absolute(&self, relative_url: &str) -> String {
        format!("{}{}", self.base, relative_url)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Body,
        deadline: Duration,
    ) -> ClientResult<Response<Body>> {
        let mut builder = Request::builder().method(method).uri(url);
        if let Some(header_map) = builder.headers_mut() {
            for (key, value) in headers.iter() {
                header_map.append(key.clone(), value.clone());
            }
            // Close every connection once the exchange is done.
            header_map.insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        let request = builder
            .body(body)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        match timeout(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                // The body is re-framed downstream; drop the upstream
                // transfer framing header.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Ok(Err(err)) => Err(ClientError::Connection(err.to_string())),
            Err(_) => Err(ClientError::Timeout(deadline)),
        }
    }
}

#[async_trait]
impl BackendClient for HyperBackendClient {
    async fn do_request(
        &self,
        method: Method,
        relative_url: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> ClientResult<Response<Body>> {
        let url = self.absolute(relative_url);
        self.send(method, &url, headers, Body::from(body), self.timeout)
            .await
    }

    async fn pipe(
        &self,
        method: Method,
        relative_url: &str,
        headers: HeaderMap,
        body: Body,
    ) -> ClientResult<Response<Body>> {
        let url = self.absolute(relative_url);
        self.send(method, &url, headers, body, self.timeout).await
    }

    async fn probe(&self, url: &str, deadline: Duration) -> ClientResult<StatusCode> {
        let response = self
            .send(Method::GET, url, HeaderMap::new(), Body::empty(), deadline)
            .await?;
        Ok(response.status())
    }
}

type ClientFactory = Box<dyn Fn() -> std::sync::Arc<dyn BackendClient> + Send + Sync>;

/// Unbounded free list of clients for one service. Acquired clients must
/// not be retained across request boundaries.
pub struct ClientPool {
    free: Mutex<Vec<std::sync::Arc<dyn BackendClient>>>,
    factory: ClientFactory,
}

impl ClientPool {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            factory,
        }
    }

    pub fn acquire(&self) -> std::sync::Arc<dyn BackendClient> {
        self.free
            .lock()
            .expect("client pool lock poisoned")
            .pop()
            .unwrap_or_else(|| (self.factory)())
    }

    pub fn release(&self, client: std::sync::Arc<dyn BackendClient>) {
        self.free
            .lock()
            .expect("client pool lock poisoned")
            .push(client);
    }
}
