//! Gateway composition root: request entry point, dispatch, panic
//! recovery and lifecycle.
//!
//! One gateway exists per process. It owns a prefix tree of routes per
//! HTTP method, the service registry, the context pool and the global
//! middleware list. Dispatch order: exact route match → longest-prefix
//! service match → 404 handler.

use std::{
    collections::HashMap,
    ops::BitOr,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::Request as AxumRequest,
    http::{Method, Request, Response},
    routing::any,
    Router,
};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{
    admin::{
        handlers::{service_state_update_handler, system_info_handler},
        validate_gateway_secret,
    },
    adapters::grpc_proxy::GrpcProxy,
    config::models::{GatewayFileConfig, ServiceConfig, DEFAULT_ADDRESS},
    core::{
        context::{ContextPool, RequestContext},
        middleware::{
            assemble_chain, handler_fn, match_all, middleware_fn, HandlerFn, Middleware,
            MiddlewareFn, MiddlewarePhase,
        },
        registry::{ServiceRegistry, DEFAULT_HEALTH_CHECK_FREQUENCY},
        route::Route,
        tree::PrefixTree,
    },
    utils::GracefulShutdown,
};

pub const ROUTE_SYSTEM_PREFIX: &str = "/api/system";
pub const ROUTE_SYSTEM_INFO: &str = "/api/system/services/info";
pub const ROUTE_UPDATE_SERVICE_STATE: &str = "/api/system/services/update";

/// Orthogonal run-level bits: (dev|prod) and (mw-off|mw-on) compose
/// without breaking callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLevel(u8);

impl RunLevel {
    pub const DEV: RunLevel = RunLevel(1);
    pub const PROD: RunLevel = RunLevel(2);
    pub const MW_DISABLED: RunLevel = RunLevel(4);
    pub const MW_ENABLED: RunLevel = RunLevel(8);

    pub const DEFAULT: RunLevel = RunLevel(Self::PROD.0 | Self::MW_ENABLED.0);

    pub const fn empty() -> RunLevel {
        RunLevel(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, bits: RunLevel) -> bool {
        self.0 & bits.0 != 0
    }
}

impl BitOr for RunLevel {
    type Output = RunLevel;

    fn bitor(self, rhs: RunLevel) -> RunLevel {
        RunLevel(self.0 | rhs.0)
    }
}

/// Handler for panics recovered in production mode.
pub type PanicHandlerFn = Arc<dyn Fn(&mut RequestContext, &str) + Send + Sync>;

/// Immutable configuration snapshot owned by the gateway.
pub struct GatewayInfo {
    address: u16,
    run_level: RunLevel,
    secret_key: String,
    started_at: Instant,
    health_check_frequency: Duration,
    grpc_proxy_address: Option<u16>,
}

pub struct Gateway {
    info: GatewayInfo,
    method_trees: RwLock<HashMap<Method, PrefixTree<Arc<Route>>>>,
    registry: Arc<ServiceRegistry>,
    contexts: ContextPool,
    middlewares: Vec<Middleware>,
    not_found_handler: HandlerFn,
    options_handler: Option<HandlerFn>,
    panic_handler: PanicHandlerFn,
}

fn default_not_found_handler() -> HandlerFn {
    handler_fn(|ctx| {
        Box::pin(async move {
            ctx.send_not_found();
        })
    })
}

fn default_panic_handler() -> PanicHandlerFn {
    Arc::new(|ctx, message| {
        ctx.log_error(message);
        ctx.send_internal_server_error();
    })
}

/// The built-in post middleware: one access-log line per request, status
/// and latency included, regardless of outcome.
fn access_log_middleware() -> MiddlewareFn {
    middleware_fn(|ctx, next| {
        Box::pin(async move {
            let elapsed_ms = ctx.started_at().elapsed().as_millis();
            let status = ctx.response_status().as_u16();
            tracing::info!(
                target: "portico::access",
                "[{}]\t[{}]\t{}\t{}\t{}ms",
                ctx.id(),
                ctx.method(),
                ctx.full_url(),
                status,
                elapsed_ms,
            );
            crate::metrics::record_request(status);
            next(ctx).await;
        })
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Build a gateway from a JSON config file.
    pub fn from_config_file(path: &str) -> eyre::Result<Gateway> {
        let config = crate::config::loader::load_config(path)?;
        Ok(GatewayBuilder::from_file_config(&config).build())
    }

    pub fn address(&self) -> u16 {
        self.info.address
    }

    pub fn run_level(&self) -> RunLevel {
        self.info.run_level
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn health_check_frequency(&self) -> Duration {
        self.info.health_check_frequency
    }

    pub fn is_prod(&self) -> bool {
        self.info.run_level.contains(RunLevel::PROD)
    }

    pub fn are_middlewares_enabled(&self) -> bool {
        self.info.run_level.contains(RunLevel::MW_ENABLED)
    }

    /// Register a service at runtime. Validation failures drop the
    /// service and surface as an error for the caller to log.
    pub fn register_service(
        &self,
        config: &ServiceConfig,
    ) -> Result<(), crate::core::registry::RegistryError> {
        self.registry.add(config)?;
        Ok(())
    }

    /// Insert a named route under the given method. Tree rejections are
    /// logged and the route is skipped, mirroring startup semantics.
    pub fn register(&self, method: Method, route: Route) {
        let pattern = route.pattern().to_string();
        let mut trees = self.method_trees.write().expect("method trees lock poisoned");
        let tree = trees.entry(method.clone()).or_default();
        if let Err(err) = tree.insert(&pattern, Arc::new(route)) {
            tracing::warn!(
                method = %method,
                pattern = %pattern,
                error = %err,
                "skipping route registration"
            );
        }
    }

    pub fn get(&self, url: &str, handler: HandlerFn) {
        self.register(Method::GET, Route::new(url, handler));
    }

    pub fn post(&self, url: &str, handler: HandlerFn) {
        self.register(Method::POST, Route::new(url, handler));
    }

    pub fn put(&self, url: &str, handler: HandlerFn) {
        self.register(Method::PUT, Route::new(url, handler));
    }

    pub fn delete(&self, url: &str, handler: HandlerFn) {
        self.register(Method::DELETE, Route::new(url, handler));
    }

    pub fn head(&self, url: &str, handler: HandlerFn) {
        self.register(Method::HEAD, Route::new(url, handler));
    }

    /// Append a global middleware. The list is frozen once `start` runs.
    pub fn register_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    pub fn set_options_handler(&mut self, handler: HandlerFn) {
        self.options_handler = Some(handler);
    }

    pub fn set_panic_handler(&mut self, handler: PanicHandlerFn) {
        self.panic_handler = handler;
    }

    pub fn total_connections_served(&self) -> u64 {
        self.contexts.total_issued()
    }

    // ---- dispatch --------------------------------------------------------

    /// Serve one already-parsed request: acquire a context, dispatch it
    /// through the middleware chain, flush, release.
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let mut ctx = self.contexts.acquire(req);

        let outcome = AssertUnwindSafe(self.dispatch(&mut ctx)).catch_unwind().await;
        if let Err(panic) = outcome {
            if self.is_prod() {
                let message = panic_message(panic.as_ref());
                (self.panic_handler)(&mut ctx, &message);
            } else {
                // In dev the crash should be loud and visible.
                std::panic::resume_unwind(panic);
            }
        }

        let response = ctx.take_response();
        self.contexts.release(ctx);
        response
    }

    async fn dispatch(&self, ctx: &mut RequestContext) {
        if ctx.method() == Method::OPTIONS {
            if let Some(handler) = &self.options_handler {
                let handler = handler.clone();
                handler(ctx).await;
            }
            return;
        }

        let handler = self.matching_handler(ctx);
        let (pre, post) = self.matching_middlewares(ctx);
        let root = assemble_chain(&pre, handler, &post);
        root(ctx).await;
    }

    /// Route lookup first, then service lookup, then the 404 handler.
    fn matching_handler(&self, ctx: &mut RequestContext) -> HandlerFn {
        let url = ctx.url_without_query();

        let route_hit = {
            let trees = self.method_trees.read().expect("method trees lock poisoned");
            trees.get(&ctx.method()).and_then(|tree| tree.find(&url))
        };

        if let Some(hit) = route_hit {
            ctx.set_params(hit.params);
            let route = hit.value;
            // With globals disabled, plain routes run bare; the management
            // surface keeps its chain so secret validation cannot be
            // bypassed.
            if self.are_middlewares_enabled() || url.starts_with(ROUTE_SYSTEM_PREFIX) {
                return route.chain_head();
            }
            return route.handler();
        }

        if let Some(service) = self.registry.find(&url) {
            return handler_fn(move |ctx| {
                let service = service.clone();
                Box::pin(async move { service.handle(ctx).await })
            });
        }

        self.not_found_handler.clone()
    }

    fn matching_middlewares(&self, ctx: &RequestContext) -> (Vec<MiddlewareFn>, Vec<MiddlewareFn>) {
        let enabled = self.are_middlewares_enabled()
            || ctx.full_url().starts_with(ROUTE_SYSTEM_PREFIX);

        let mut pre = Vec::new();
        let mut post = Vec::new();

        for mw in &self.middlewares {
            if !mw.matches(ctx) {
                continue;
            }
            match mw.phase() {
                MiddlewarePhase::Pre => {
                    if enabled || mw.is_always_allowed() {
                        pre.push(mw.func());
                    }
                }
                MiddlewarePhase::Post => post.push(mw.func()),
            }
        }

        (pre, post)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Bind the listener and run until a shutdown signal fires. Launches
    /// the health loop and, when configured, the gRPC proxy alongside.
    pub async fn start(self: Arc<Self>) -> eyre::Result<()> {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();

        tokio::spawn(async move {
            if let Err(err) = shutdown.run_signal_handler().await {
                tracing::error!(error = %err, "signal handler failed");
            }
        });

        self.run(token).await
    }

    /// Like [`Gateway::start`] but driven by an externally owned token;
    /// embedding and tests control shutdown directly.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> eyre::Result<()> {
        crate::metrics::describe();

        tracing::info!(
            address = self.info.address,
            production = self.is_prod(),
            middlewares_enabled = self.are_middlewares_enabled(),
            "gateway starting"
        );

        let registry = self.registry.clone();
        let health_token = shutdown.child_token();
        tokio::spawn(async move {
            registry.run_health_loop(health_token).await;
        });

        if let Some(port) = self.info.grpc_proxy_address {
            let proxy = GrpcProxy::new(port, self.registry.clone());
            let proxy_token = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(err) = proxy.run(proxy_token).await {
                    tracing::error!(error = %err, "grpc proxy failed");
                }
            });
        }

        let gateway = self.clone();
        let serve_one = move |req: AxumRequest| {
            let gateway = gateway.clone();
            async move { gateway.serve(req).await }
        };

        let app = Router::new()
            .route("/", any(serve_one.clone()))
            .route("/{*path}", any(serve_one));

        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", self.info.address)).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("gateway stopped");
        Ok(())
    }
}

/// Builder mirroring the configuration surface: address, run level,
/// secret, services, health frequency and the optional gRPC proxy port.
pub struct GatewayBuilder {
    address: u16,
    production_level: Option<bool>,
    middlewares_enabled: Option<bool>,
    secret_key: String,
    health_check_frequency: Duration,
    grpc_proxy_address: Option<u16>,
    services: Vec<ServiceConfig>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            production_level: None,
            middlewares_enabled: None,
            secret_key: String::new(),
            health_check_frequency: DEFAULT_HEALTH_CHECK_FREQUENCY,
            grpc_proxy_address: None,
            services: Vec::new(),
        }
    }
}

impl GatewayBuilder {
    /// Translate a parsed config file into builder options.
    pub fn from_file_config(config: &GatewayFileConfig) -> Self {
        let mut builder = Self::default().with_address(config.address);

        if !config.secret_key.is_empty() {
            builder = builder.with_secret_key(&config.secret_key);
        }
        if let Some(flag) = config.middlewares_enabled {
            builder = builder.with_middlewares_enabled(flag != 0);
        }
        if let Some(flag) = config.production_level {
            builder = builder.with_production_level(flag != 0);
        }
        if let Some(grpc) = &config.grpc_proxy {
            builder = builder.with_grpc_proxy(grpc.address);
        }
        if let Some(interval) =
            crate::config::loader::parse_health_check_interval(&config.health_check_interval)
        {
            builder = builder.with_health_check_frequency(interval);
        }
        for service in &config.services {
            builder = builder.with_service(service.clone());
        }

        builder
    }

    pub fn with_address(mut self, address: u16) -> Self {
        self.address = address;
        self
    }

    pub fn with_production_level(mut self, production: bool) -> Self {
        self.production_level = Some(production);
        self
    }

    pub fn with_middlewares_enabled(mut self, enabled: bool) -> Self {
        self.middlewares_enabled = Some(enabled);
        self
    }

    pub fn with_secret_key(mut self, key: &str) -> Self {
        self.secret_key = key.to_string();
        self
    }

    pub fn with_health_check_frequency(mut self, frequency: Duration) -> Self {
        self.health_check_frequency = frequency;
        self
    }

    pub fn with_grpc_proxy(mut self, port: u16) -> Self {
        self.grpc_proxy_address = Some(port);
        self
    }

    pub fn with_service(mut self, config: ServiceConfig) -> Self {
        self.services.push(config);
        self
    }

    fn resolve_run_level(&self) -> RunLevel {
        let prod = match self.production_level {
            Some(false) => RunLevel::DEV,
            _ => RunLevel::PROD,
        };
        let middlewares = match self.middlewares_enabled {
            Some(false) => RunLevel::MW_DISABLED,
            _ => RunLevel::MW_ENABLED,
        };
        prod | middlewares
    }

    /// Construct the gateway: registry, context pool, default handlers,
    /// management routes behind the shared secret and the built-in access
    /// log.
    pub fn build(self) -> Gateway {
        let run_level = self.resolve_run_level();
        let registry = Arc::new(ServiceRegistry::new(self.health_check_frequency));

        for config in &self.services {
            if let Err(err) = registry.add(config) {
                tracing::warn!(
                    service = %config.name,
                    error = %err,
                    "dropping service from startup config"
                );
            }
        }

        let info = GatewayInfo {
            address: self.address,
            run_level,
            secret_key: self.secret_key,
            started_at: Instant::now(),
            health_check_frequency: self.health_check_frequency,
            grpc_proxy_address: self.grpc_proxy_address,
        };

        let mut gateway = Gateway {
            info,
            method_trees: RwLock::new(HashMap::new()),
            registry: registry.clone(),
            contexts: ContextPool::new(),
            middlewares: Vec::new(),
            not_found_handler: default_not_found_handler(),
            options_handler: None,
            panic_handler: default_panic_handler(),
        };

        let secret = gateway.info.secret_key.clone();

        let mut info_route = Route::new(
            ROUTE_SYSTEM_INFO,
            system_info_handler(registry.clone(), run_level, gateway.info.started_at),
        );
        info_route.register_middleware(validate_gateway_secret(secret.clone()));
        gateway.register(Method::POST, info_route);

        let mut update_route = Route::new(
            ROUTE_UPDATE_SERVICE_STATE,
            service_state_update_handler(registry),
        );
        update_route.register_middleware(validate_gateway_secret(secret));
        gateway.register(Method::POST, update_route);

        gateway.register_middleware(Middleware::post(access_log_middleware(), match_all()));

        gateway
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_level_bits_compose() {
        let level = RunLevel::DEV | RunLevel::MW_DISABLED;
        assert!(level.contains(RunLevel::DEV));
        assert!(level.contains(RunLevel::MW_DISABLED));
        assert!(!level.contains(RunLevel::PROD));
        assert!(!level.contains(RunLevel::MW_ENABLED));

        assert!(RunLevel::DEFAULT.contains(RunLevel::PROD));
        assert!(RunLevel::DEFAULT.contains(RunLevel::MW_ENABLED));
        assert!(RunLevel::empty().is_empty());
    }

    #[test]
    fn builder_defaults() {
        let gateway = Gateway::builder().build();

        assert_eq!(gateway.address(), DEFAULT_ADDRESS);
        assert!(gateway.is_prod());
        assert!(gateway.are_middlewares_enabled());
        assert_eq!(gateway.total_connections_served(), 0);
    }

    #[test]
    fn builder_translates_file_config() {
        let config = GatewayFileConfig {
            address: 9100,
            middlewares_enabled: Some(0),
            production_level: Some(0),
            secret_key: "s3cret".into(),
            health_check_interval: "30s".into(),
            ..GatewayFileConfig::default()
        };

        let gateway = GatewayBuilder::from_file_config(&config).build();
        assert_eq!(gateway.address(), 9100);
        assert!(!gateway.is_prod());
        assert!(!gateway.are_middlewares_enabled());
        assert_eq!(
            gateway.registry().health_check_frequency(),
            Duration::from_secs(30)
        );
    }
}
