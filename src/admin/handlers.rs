//! Handlers behind the `/api/system` management routes.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    config::models::ServiceConfig,
    core::{
        gateway::RunLevel,
        middleware::{handler_fn, HandlerFn},
        registry::ServiceRegistry,
    },
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceInfo {
    #[serde(flatten)]
    config: ServiceConfig,
    state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    total_connection_served: u64,
    is_prod: bool,
    are_middlewares_enabled: bool,
    uptime: String,
    services: Vec<ServiceInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct UpdateServiceStateRequest {
    service_name: String,
}

fn format_uptime(started_at: Instant) -> String {
    let total = started_at.elapsed().as_secs();
    let (hours, rem) = (total / 3600, total % 3600);
    format!("{}h{}m{}s", hours, rem / 60, rem % 60)
}

/// `POST /api/system/services/info` — gateway snapshot: uptime, flags and
/// every registered service with its current state.
pub(crate) fn system_info_handler(
    registry: Arc<ServiceRegistry>,
    run_level: RunLevel,
    started_at: Instant,
) -> HandlerFn {
    handler_fn(move |ctx| {
        let registry = registry.clone();
        Box::pin(async move {
            let services = registry
                .all()
                .iter()
                .map(|s| ServiceInfo {
                    config: s.config().clone(),
                    state: s.state().as_str().to_string(),
                })
                .collect();

            let response = InfoResponse {
                total_connection_served: ctx.id(),
                is_prod: run_level.contains(RunLevel::PROD),
                are_middlewares_enabled: run_level.contains(RunLevel::MW_ENABLED),
                uptime: format_uptime(started_at),
                services,
            };

            ctx.send_json(&response);
        })
    })
}

/// `POST /api/system/services/update` — a service announcing it is back
/// online. The body names the service; an empty name is treated like a
/// failed authentication.
pub(crate) fn service_state_update_handler(registry: Arc<ServiceRegistry>) -> HandlerFn {
    handler_fn(move |ctx| {
        let registry = registry.clone();
        Box::pin(async move {
            let body = match ctx.raw_body().await {
                Ok(body) => body,
                Err(_) => {
                    ctx.send_unauthorized();
                    return;
                }
            };

            let request: UpdateServiceStateRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(_) => {
                    ctx.send_unauthorized();
                    return;
                }
            };

            if request.service_name.is_empty() {
                ctx.send_unauthorized();
                return;
            }

            if !registry.mark_available(&request.service_name) {
                ctx.log_warning(&format!(
                    "state update for unknown service: {}",
                    request.service_name
                ));
            }
            ctx.send_ok();
        })
    })
}
