//! Management-endpoint tests: shared-secret validation and the two
//! `/api/system` routes, driven through `Gateway::serve`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, Response, StatusCode},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use portico::{
    adapters::http_client::ClientPool,
    config::models::ServiceConfig,
    core::{service::ServiceState, Gateway, Service},
    ports::http_client::{BackendClient, ClientResult},
};
use sha2::{Digest, Sha256};

const SECRET: &str = "shared-secret";

struct IdleBackend;

#[async_trait]
impl BackendClient for IdleBackend {
    async fn do_request(
        &self,
        _method: Method,
        _relative_url: &str,
        _body: Bytes,
        _headers: HeaderMap,
    ) -> ClientResult<Response<Body>> {
        Ok(Response::new(Body::empty()))
    }

    async fn pipe(
        &self,
        _method: Method,
        _relative_url: &str,
        _headers: HeaderMap,
        _body: Body,
    ) -> ClientResult<Response<Body>> {
        Ok(Response::new(Body::empty()))
    }

    async fn probe(&self, _url: &str, _deadline: Duration) -> ClientResult<StatusCode> {
        Ok(StatusCode::OK)
    }
}

fn mock_service(name: &str, prefix: &str) -> Arc<Service> {
    let config = ServiceConfig {
        name: name.into(),
        prefix: prefix.into(),
        host: "127.0.0.1".into(),
        port: "3100".into(),
        ..ServiceConfig::default()
    };
    let pool = ClientPool::new(Box::new(|| Arc::new(IdleBackend) as Arc<dyn BackendClient>));
    Service::with_client_factory(&config, pool).unwrap()
}

/// The client side of the shared-secret protocol: strip spaces and
/// newlines, hash body + secret, hex-encode.
fn gateway_key(body: &str, secret: &str) -> String {
    let cleaned: Vec<u8> = body
        .bytes()
        .filter(|b| *b != b' ' && *b != b'\n')
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(&cleaned);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn signed_post(uri: &str, body: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-GATEWAY-KEY", key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn gateway_with_service() -> (Gateway, Arc<Service>) {
    let gateway = Gateway::builder().with_secret_key(SECRET).build();
    let service = mock_service("s1", "/api/s1");
    gateway.registry().insert(service.clone()).unwrap();
    (gateway, service)
}

#[tokio::test]
async fn update_marks_service_available() {
    let (gateway, service) = gateway_with_service();
    assert_eq!(service.state(), ServiceState::Unknown);

    let body = r#"{"serviceName":"s1"}"#;
    let req = signed_post(
        "/api/system/services/update",
        body,
        &gateway_key(body, SECRET),
    );

    let res = gateway.serve(req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(service.state(), ServiceState::Available);
}

#[tokio::test]
async fn whitespace_in_body_does_not_change_the_key() {
    let (gateway, service) = gateway_with_service();

    let body = "{ \"serviceName\":\n \"s1\" }";
    let req = signed_post(
        "/api/system/services/update",
        body,
        &gateway_key(body, SECRET),
    );

    let res = gateway.serve(req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(service.state(), ServiceState::Available);
}

#[tokio::test]
async fn flipped_key_bit_is_rejected() {
    let (gateway, service) = gateway_with_service();

    let body = r#"{"serviceName":"s1"}"#;
    let mut key = gateway_key(body, SECRET).into_bytes();
    key[0] = if key[0] == b'0' { b'1' } else { b'0' };
    let key = String::from_utf8(key).unwrap();

    let res = gateway
        .serve(signed_post("/api/system/services/update", body, &key))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(service.state(), ServiceState::Unknown);
}

#[tokio::test]
async fn missing_key_is_rejected() {
    let (gateway, service) = gateway_with_service();

    let body = r#"{"serviceName":"s1"}"#;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/system/services/update")
        .body(Body::from(body))
        .unwrap();

    let res = gateway.serve(req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(service.state(), ServiceState::Unknown);
}

#[tokio::test]
async fn missing_service_name_is_rejected() {
    let (gateway, _service) = gateway_with_service();

    let body = r#"{}"#;
    let req = signed_post(
        "/api/system/services/update",
        body,
        &gateway_key(body, SECRET),
    );

    let res = gateway.serve(req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn secret_gate_survives_disabled_middlewares() {
    let gateway = Gateway::builder()
        .with_secret_key(SECRET)
        .with_middlewares_enabled(false)
        .build();
    gateway.registry().insert(mock_service("s1", "/api/s1")).unwrap();

    // Even with globals off, /api/system keeps its validation chain.
    let body = r#"{"serviceName":"s1"}"#;
    let res = gateway
        .serve(signed_post("/api/system/services/update", body, "bogus"))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn info_reports_services_and_flags() {
    let (gateway, service) = gateway_with_service();
    service.mark_available();

    let body = "{}";
    let req = signed_post(
        "/api/system/services/info",
        body,
        &gateway_key(body, SECRET),
    );

    let res = gateway.serve(req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let info: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(info["isProd"], true);
    assert_eq!(info["areMiddlewaresEnabled"], true);
    assert!(info["totalConnectionServed"].as_u64().unwrap() >= 1);
    assert!(info["uptime"].is_string());

    let services = info["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["name"], "s1");
    assert_eq!(services[0]["prefix"], "/api/s1");
    assert_eq!(services[0]["state"], "available");
}
