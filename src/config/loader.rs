//! Configuration file loading.
//!
//! The config is one JSON document (see [`GatewayFileConfig`]); reading
//! and deserializing it is deliberately boring. The health-check interval
//! uses the compact `<number>[s|m]` form — anything else falls back to
//! the built-in default frequency.

use std::time::Duration;

use eyre::{Result, WrapErr};

use crate::config::models::GatewayFileConfig;

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Read and parse the JSON config at `path`.
pub fn load_config(path: &str) -> Result<GatewayFileConfig> {
    let raw = std::fs::read(path).wrap_err_with(|| format!("reading config file {path}"))?;
    parse_config(&raw)
}

pub fn parse_config(raw: &[u8]) -> Result<GatewayFileConfig> {
    serde_json::from_slice(raw).wrap_err("deserializing gateway config")
}

/// Parse `<number>[s|m]` into a duration. Empty or malformed input yields
/// `None`, which callers treat as "use the default".
pub fn parse_health_check_interval(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }

    let (number, unit) = value.split_at(value.len() - 1);
    let amount: u64 = number.parse().ok()?;

    match unit {
        "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::{Protocol, ServiceKind};

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_health_check_interval("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_health_check_interval("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_health_check_interval(""), None);
        assert_eq!(parse_health_check_interval("s"), None);
        assert_eq!(parse_health_check_interval("10x"), None);
        assert_eq!(parse_health_check_interval("abcm"), None);
    }

    #[test]
    fn load_full_config_file() {
        let json = r#"
        {
            "address": 8080,
            "middlewaresEnabled": 1,
            "productionLevel": 1,
            "secretKey": "key",
            "healthCheckInterval": "45s",
            "grpcProxy": { "address": 50051 },
            "loggerConfig": { "disabledLoggers": ["info"] },
            "services": [
                {
                    "serviceType": 0,
                    "name": "users",
                    "prefix": "/api/users",
                    "protocol": "http",
                    "host": "127.0.0.1",
                    "port": "3100",
                    "timeOutSec": 5,
                    "statusPath": "/healthz"
                },
                {
                    "serviceType": 1,
                    "name": "events",
                    "prefix": "/event.EventService",
                    "protocol": "http",
                    "host": "127.0.0.1",
                    "port": "3200"
                }
            ]
        }
        "#;

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.address, 8080);
        assert_eq!(config.secret_key, "key");
        assert_eq!(config.grpc_proxy.as_ref().unwrap().address, 50051);
        assert_eq!(config.services.len(), 2);

        let users = &config.services[0];
        assert_eq!(users.service_type, ServiceKind::Rest);
        assert_eq!(users.protocol, Protocol::Http);
        assert_eq!(users.time_out_sec, 5);
        assert_eq!(users.status_path, "/healthz");

        assert_eq!(config.services[1].service_type, ServiceKind::Grpc);
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(parse_config(b"{ not json").is_err());
        assert!(load_config("/definitely/not/a/real/path.json").is_err());
    }
}
