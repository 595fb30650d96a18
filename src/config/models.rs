//! Configuration data structures.
//!
//! These types map directly to the JSON configuration file (camelCase
//! field names, numeric service kinds). They are serde-friendly and carry
//! defaults so a minimal config stays concise.

use serde::{Deserialize, Serialize};

/// Whether a backend speaks plain REST over HTTP or gRPC.
///
/// Stored as a number in the config file: `0` = REST, `1` = gRPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum ServiceKind {
    #[default]
    Rest,
    Grpc,
}

impl TryFrom<u8> for ServiceKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceKind::Rest),
            1 => Ok(ServiceKind::Grpc),
            other => Err(format!("unsupported service type: {other}")),
        }
    }
}

impl From<ServiceKind> for u8 {
    fn from(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Rest => 0,
            ServiceKind::Grpc => 1,
        }
    }
}

/// Scheme used to reach a backend. Only plain HTTP and HTTPS exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// One backend service entry from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub service_type: ServiceKind,
    pub name: String,
    pub prefix: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: String,
    /// Per-request forward timeout; `0` means the 3 s default.
    pub time_out_sec: u64,
    /// Health probe path; empty means the built-in default.
    pub status_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceKind::Rest,
            name: String::new(),
            prefix: String::new(),
            protocol: Protocol::Http,
            host: String::new(),
            port: String::new(),
            time_out_sec: 0,
            status_path: String::new(),
        }
    }
}

/// Log classes that can be masked from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogClass {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggerConfig {
    pub disabled_loggers: Vec<LogClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcProxyConfig {
    pub address: u16,
}

/// Top-level configuration record handed to the gateway builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayFileConfig {
    /// TCP port for the HTTP listener.
    pub address: u16,
    /// `0`/`1` toggle for global pre-middlewares; absent means enabled.
    pub middlewares_enabled: Option<u8>,
    /// `0`/`1`; in production panics are caught, in dev they propagate.
    pub production_level: Option<u8>,
    /// Shared secret for the management endpoints.
    pub secret_key: String,
    /// `<number>[s|m]`; empty or malformed falls back to the default.
    pub health_check_interval: String,
    pub logger_config: Option<LoggerConfig>,
    pub grpc_proxy: Option<GrpcProxyConfig>,
    pub services: Vec<ServiceConfig>,
}

pub const DEFAULT_ADDRESS: u16 = 8000;

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            middlewares_enabled: None,
            production_level: None,
            secret_key: String::new(),
            health_check_interval: String::new(),
            logger_config: None,
            grpc_proxy: None,
            services: Vec::new(),
        }
    }
}
