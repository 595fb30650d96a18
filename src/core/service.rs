//! Backend service descriptor, state machine and forwarding entry point.
//!
//! A service is one backend reached over HTTP(S) or gRPC, identified by a
//! unique name and URL prefix. Its reachability state is written by the
//! health loop (and the mark-available management endpoint) and read by
//! every forwarder; a stale read at worst produces a tolerated 503.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Body,
    http::{HeaderMap, Method, Response, StatusCode},
};
use bytes::Bytes;
use thiserror::Error;

use crate::{
    adapters::http_client::{ClientPool, HyperBackendClient},
    config::models::{ServiceConfig, ServiceKind},
    core::context::{RequestContext, MULTIPART_CONTENT_TYPE},
    ports::http_client::{BackendClient, ClientError},
};

pub const DEFAULT_STATUS_PATH: &str = "/api/status/health-check";
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for one health probe.
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

// Atomic encoding of the service state.
const STATE_REGISTERED: u8 = 0;
const STATE_UNKNOWN: u8 = 1;
const STATE_REFUSED: u8 = 2;
const STATE_AVAILABLE: u8 = 3;

/// Reachability of a backend. Only `Available` services are forwardable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Registered,
    Unknown,
    Refused,
    Available,
}

impl ServiceState {
    fn as_u8(self) -> u8 {
        match self {
            ServiceState::Registered => STATE_REGISTERED,
            ServiceState::Unknown => STATE_UNKNOWN,
            ServiceState::Refused => STATE_REFUSED,
            ServiceState::Available => STATE_AVAILABLE,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_REGISTERED => ServiceState::Registered,
            STATE_UNKNOWN => ServiceState::Unknown,
            STATE_REFUSED => ServiceState::Refused,
            _ => ServiceState::Available,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Registered => "registered",
            ServiceState::Unknown => "unknown",
            ServiceState::Refused => "refused",
            ServiceState::Available => "available",
        }
    }
}

/// Errors from service construction and the typed request helpers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("hostname cant be empty")]
    EmptyHost,

    #[error("name cant be empty")]
    EmptyName,

    #[error("port cant be empty")]
    EmptyPort,

    #[error("prefix cant be empty")]
    EmptyPrefix,

    #[error("[{0}]: is not a REST service")]
    NotRest(String),

    #[error("service is not available")]
    NotAvailable,

    #[error("building backend client: {0}")]
    ClientSetup(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Field-level validation of a service config.
pub fn validate_service(config: &ServiceConfig) -> Result<(), ServiceError> {
    if config.host.is_empty() {
        return Err(ServiceError::EmptyHost);
    }
    if config.name.is_empty() {
        return Err(ServiceError::EmptyName);
    }
    if config.port.is_empty() {
        return Err(ServiceError::EmptyPort);
    }
    if config.prefix.is_empty() {
        return Err(ServiceError::EmptyPrefix);
    }
    Ok(())
}

pub struct Service {
    config: ServiceConfig,
    timeout: Duration,
    status_path: String,
    state: AtomicU8,
    clients: ClientPool,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .field("status_path", &self.status_path)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

impl Service {
    /// Validate the config and build a service with a hyper-backed client
    /// pool. The initial state is `Unknown` until the first probe.
    pub fn new(config: &ServiceConfig) -> Result<Arc<Self>, ServiceError> {
        let timeout = if config.time_out_sec == 0 {
            DEFAULT_FORWARD_TIMEOUT
        } else {
            Duration::from_secs(config.time_out_sec)
        };

        let base = format!(
            "{}://{}:{}",
            config.protocol.as_str(),
            config.host,
            config.port
        );

        // Building one client up front surfaces setup errors here instead
        // of deep inside a request.
        let first = HyperBackendClient::new(base.clone(), timeout)
            .map_err(|e| ServiceError::ClientSetup(e.to_string()))?;

        let factory = Box::new(move || {
            Arc::new(
                HyperBackendClient::new(base.clone(), timeout)
                    .expect("client construction succeeded once already"),
            ) as Arc<dyn BackendClient>
        });

        let service = Self::with_client_factory(config, ClientPool::new(factory))?;
        service.clients.release(Arc::new(first));
        Ok(service)
    }

    /// Like [`Service::new`] but with an injected client pool; the seam the
    /// tests use to avoid real sockets.
    pub fn with_client_factory(
        config: &ServiceConfig,
        clients: ClientPool,
    ) -> Result<Arc<Self>, ServiceError> {
        validate_service(config)?;

        let timeout = if config.time_out_sec == 0 {
            DEFAULT_FORWARD_TIMEOUT
        } else {
            Duration::from_secs(config.time_out_sec)
        };
        let status_path = if config.status_path.is_empty() {
            DEFAULT_STATUS_PATH.to_string()
        } else {
            config.status_path.clone()
        };

        Ok(Arc::new(Self {
            config: config.clone(),
            timeout,
            status_path,
            state: AtomicU8::new(STATE_UNKNOWN),
            clients,
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn kind(&self) -> ServiceKind {
        self.config.service_type
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status_path(&self) -> &str {
        &self.status_path
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// `protocol://host:port`.
    pub fn address_with_protocol(&self) -> String {
        format!(
            "{}://{}:{}",
            self.config.protocol.as_str(),
            self.config.host,
            self.config.port
        )
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ServiceState) {
        self.state.store(state.as_u8(), Ordering::Release);
        crate::metrics::set_service_state(&self.config.name, state);
    }

    /// Force the service forwardable; used by the management endpoint that
    /// services call when they come back online.
    pub fn mark_available(&self) {
        self.set_state(ServiceState::Available);
    }

    /// Forward the context's request to this backend.
    pub async fn handle(&self, ctx: &mut RequestContext) {
        if self.config.service_type != ServiceKind::Rest {
            // gRPC traffic only lands here through misconfiguration; the
            // gRPC proxy is a separate listener.
            ctx.send_http_error(StatusCode::BAD_REQUEST);
            return;
        }

        if self.state() != ServiceState::Available {
            ctx.send_unavailable();
            return;
        }

        // Multipart uploads stream the original body; everything else uses
        // the already-buffered bytes.
        let body = if ctx.content_type().contains(MULTIPART_CONTENT_TYPE) {
            ctx.take_body()
        } else {
            match ctx.raw_body().await {
                Ok(bytes) => Body::from(bytes),
                Err(err) => {
                    ctx.log_error(&format!("reading request body: {err}"));
                    ctx.send_internal_server_error();
                    return;
                }
            }
        };

        let client = self.clients.acquire();
        let outcome = client
            .pipe(ctx.method(), &ctx.full_url(), ctx.request_headers(), body)
            .await;
        self.clients.release(client);

        match outcome {
            Ok(upstream) => {
                crate::metrics::record_forward(&self.config.name);
                ctx.pipe(upstream).await;
            }
            Err(err) => {
                self.set_state(ServiceState::Unknown);
                ctx.log_error(&format!("[handle]: {err}"));
                ctx.send_internal_server_error();
            }
        }
    }

    /// Probe the backend's health endpoint and update the state:
    /// 200 → `Available`, other status → `Refused`, transport error →
    /// `Refused`, deadline → `Unknown`. Non-REST services are skipped.
    pub async fn check_status(&self) -> ServiceState {
        if self.config.service_type != ServiceKind::Rest {
            return self.state();
        }

        let url = format!("{}{}", self.address_with_protocol(), self.status_path);
        let client = self.clients.acquire();
        let outcome = client.probe(&url, PROBE_DEADLINE).await;
        self.clients.release(client);

        let next = match outcome {
            Ok(StatusCode::OK) => ServiceState::Available,
            Ok(_) => ServiceState::Refused,
            Err(ClientError::Timeout(_)) => ServiceState::Unknown,
            Err(_) => ServiceState::Refused,
        };

        self.set_state(next);
        next
    }

    // ---- typed request helpers for in-process handlers -------------------

    pub async fn get(&self, url: &str, headers: HeaderMap) -> Result<Response<Body>, ServiceError> {
        self.do_request(Method::GET, url, Bytes::new(), headers)
            .await
    }

    pub async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<Response<Body>, ServiceError> {
        self.do_request(Method::POST, url, body, headers).await
    }

    pub async fn put(
        &self,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<Response<Body>, ServiceError> {
        self.do_request(Method::PUT, url, body, headers).await
    }

    pub async fn delete(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<Response<Body>, ServiceError> {
        self.do_request(Method::DELETE, url, Bytes::new(), headers)
            .await
    }

    async fn do_request(
        &self,
        method: Method,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<Response<Body>, ServiceError> {
        if self.config.service_type != ServiceKind::Rest {
            return Err(ServiceError::NotRest(self.config.name.clone()));
        }
        if self.state() != ServiceState::Available {
            return Err(ServiceError::NotAvailable);
        }

        let client = self.clients.acquire();
        let outcome = client.do_request(method, url, body, headers).await;
        self.clients.release(client);
        Ok(outcome?)
    }
}
