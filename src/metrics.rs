//! Lightweight metrics helpers.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is
//! embedded; the application can install any compatible recorder. Metric
//! families:
//! * `portico_requests_total` (counter, label: status)
//! * `portico_forwards_total` (counter, label: service)
//! * `portico_service_state` (gauge per service, 1 = available)
//! * `portico_grpc_streams_total` (counter, label: service)

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::core::service::ServiceState;

pub const REQUESTS_TOTAL: &str = "portico_requests_total";
pub const FORWARDS_TOTAL: &str = "portico_forwards_total";
pub const SERVICE_STATE: &str = "portico_service_state";
pub const GRPC_STREAMS_TOTAL: &str = "portico_grpc_streams_total";

/// Register descriptions with the installed recorder. Safe to call more
/// than once.
pub fn describe() {
    describe_counter!(
        REQUESTS_TOTAL,
        "Total number of HTTP requests dispatched by the gateway."
    );
    describe_counter!(
        FORWARDS_TOTAL,
        "Total number of requests forwarded to a backend service."
    );
    describe_gauge!(
        SERVICE_STATE,
        "Reachability of a backend service (1 available, 0 otherwise)."
    );
    describe_counter!(
        GRPC_STREAMS_TOTAL,
        "Total number of gRPC streams bridged to a backend."
    );
}

pub fn record_request(status: u16) {
    counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn record_forward(service: &str) {
    counter!(FORWARDS_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn record_grpc_stream(service: &str) {
    counter!(GRPC_STREAMS_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn set_service_state(service: &str, state: ServiceState) {
    let value = if state == ServiceState::Available {
        1.0
    } else {
        0.0
    };
    gauge!(SERVICE_STATE, "service" => service.to_string()).set(value);
}
