//! Per-request carrier and its pool.
//!
//! A [`RequestContext`] travels through the whole middleware chain: it holds
//! the parsed request, the buffered response, bound path params, a strictly
//! monotonic request id and a typed key-value bag. Contexts are pooled —
//! acquired on entry, scrubbed and released on exit — so steady-state
//! request handling does not allocate a fresh carrier.
//!
//! The response side is write-once: the first `send_*` call marks the
//! buffer written and every later call is a no-op. Flushing (turning the
//! buffer into the wire response) happens at most once, driven by the
//! terminal post middleware.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Instant,
};

use axum::{
    body::Body,
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request, Response, StatusCode},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const XML_CONTENT_TYPE: &str = "application/xml";
pub const TEXT_HTML_CONTENT_TYPE: &str = "text/html";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/";

/// Errors surfaced to handlers from body access.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ContextError {
    #[error("incoming body is not {JSON_CONTENT_TYPE}")]
    NotJsonContentType,

    #[error("reading request body: {0}")]
    BodyRead(String),

    #[error("decoding request body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One bound `{name}` → segment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    pub key: String,
    pub value: String,
}

enum BodyState {
    Pending(Body),
    Buffered(Bytes),
    Empty,
}

/// Buffered response: status, headers and body are accumulated here and
/// written to the wire in one go.
#[derive(Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    written: bool,
    simple_error: bool,
}

impl ResponseBuffer {
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    fn clear(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body.clear();
        self.written = false;
        self.simple_error = false;
    }

    fn to_response(&mut self) -> Response<Body> {
        if self.simple_error {
            let status = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let reason = status.canonical_reason().unwrap_or("");
            let mut res = Response::new(Body::from(reason.to_string()));
            *res.status_mut() = status;
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            return res;
        }

        let mut res = Response::new(Body::from(std::mem::take(&mut self.body)));
        *res.status_mut() = self.status_code();
        *res.headers_mut() = std::mem::take(&mut self.headers);
        res
    }
}

/// The single-request carrier handed to every middleware and handler.
pub struct RequestContext {
    id: u64,
    started_at: Instant,
    parts: Option<Parts>,
    body: BodyState,
    params: Vec<PathParam>,
    buffer: ResponseBuffer,
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    flushed: Option<Response<Body>>,
}

impl RequestContext {
    fn fresh() -> Self {
        Self {
            id: 0,
            started_at: Instant::now(),
            parts: None,
            body: BodyState::Empty,
            params: Vec::new(),
            buffer: ResponseBuffer::default(),
            values: HashMap::new(),
            flushed: None,
        }
    }

    fn reset(&mut self, req: Request<Body>, id: u64) {
        let (parts, body) = req.into_parts();
        self.id = id;
        self.started_at = Instant::now();
        self.parts = Some(parts);
        self.body = BodyState::Pending(body);
        self.params.clear();
        self.buffer.clear();
        self.values.clear();
        self.flushed = None;
    }

    /// Drop request references and scrub response state before the context
    /// goes back to the pool. Allocations are kept for reuse.
    fn scrub(&mut self) {
        self.parts = None;
        self.body = BodyState::Empty;
        self.params.clear();
        self.buffer.clear();
        self.values.clear();
        self.flushed = None;
    }

    // ---- inspection -----------------------------------------------------

    /// Monotonic id of this request within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn request_parts(&self) -> Option<&Parts> {
        self.parts.as_ref()
    }

    pub fn method(&self) -> Method {
        self.parts
            .as_ref()
            .map(|p| p.method.clone())
            .unwrap_or_default()
    }

    /// Path plus query string, as received.
    pub fn full_url(&self) -> String {
        self.parts
            .as_ref()
            .and_then(|p| p.uri.path_and_query())
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default()
    }

    /// Path only, query string stripped.
    pub fn url_without_query(&self) -> String {
        self.parts
            .as_ref()
            .map(|p| p.uri.path().to_string())
            .unwrap_or_default()
    }

    /// Path split into its non-empty segments.
    pub fn url_parts(&self) -> Vec<String> {
        self.url_without_query()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        let query = self
            .parts
            .as_ref()
            .and_then(|p| p.uri.query())
            .unwrap_or_default();

        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn request_headers(&self) -> HeaderMap {
        self.parts
            .as_ref()
            .map(|p| p.headers.clone())
            .unwrap_or_default()
    }

    pub fn request_header(&self, key: &str) -> Option<String> {
        self.parts
            .as_ref()
            .and_then(|p| p.headers.get(key))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn content_type(&self) -> String {
        self.request_header(header::CONTENT_TYPE.as_str())
            .unwrap_or_default()
    }

    /// Read the request body once; repeated calls return the cached bytes.
    pub async fn raw_body(&mut self) -> Result<Bytes, ContextError> {
        match std::mem::replace(&mut self.body, BodyState::Empty) {
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes.clone());
                Ok(bytes)
            }
            BodyState::Pending(body) => {
                let bytes = body
                    .collect()
                    .await
                    .map_err(|e| ContextError::BodyRead(e.to_string()))?
                    .to_bytes();
                self.body = BodyState::Buffered(bytes.clone());
                Ok(bytes)
            }
            BodyState::Empty => Ok(Bytes::new()),
        }
    }

    /// Hand out the raw body stream, e.g. to pipe a multipart upload
    /// through without buffering. The body can no longer be read after.
    pub fn take_body(&mut self) -> Body {
        match std::mem::replace(&mut self.body, BodyState::Empty) {
            BodyState::Pending(body) => body,
            BodyState::Buffered(bytes) => Body::from(bytes),
            BodyState::Empty => Body::empty(),
        }
    }

    /// Decode the JSON body into `T`. Rejected outright when the request
    /// does not declare `application/json`.
    pub async fn decode_json_body<T: DeserializeOwned>(&mut self) -> Result<T, ContextError> {
        if !self.content_type().contains(JSON_CONTENT_TYPE) {
            return Err(ContextError::NotJsonContentType);
        }
        let body = self.raw_body().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    // ---- path params ----------------------------------------------------

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params
            .into_iter()
            .map(|(key, value)| PathParam { key, value })
            .collect();
    }

    pub fn params(&self) -> &[PathParam] {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    // ---- typed value bag ------------------------------------------------

    pub fn bind_value<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get_value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    // ---- response production --------------------------------------------

    /// Write body bytes, status and headers into the buffer. No-op when
    /// something was already written.
    pub fn send_raw(&mut self, body: &[u8], status: StatusCode, headers: HeaderMap) {
        if self.buffer.written {
            return;
        }
        self.buffer.written = true;
        self.buffer.status = Some(status);
        self.buffer.body.clear();
        self.buffer.body.extend_from_slice(body);
        self.append_headers(headers);
    }

    pub fn send_json<T: Serialize>(&mut self, data: &T) {
        match serde_json::to_vec(data) {
            Ok(body) => self.send_raw(&body, StatusCode::OK, content_type(JSON_CONTENT_TYPE)),
            Err(err) => tracing::error!(error = %err, "serializing json response"),
        }
    }

    pub fn send_xml<T: Serialize>(&mut self, data: &T) {
        match quick_xml::se::to_string(data) {
            Ok(body) => {
                self.send_raw(body.as_bytes(), StatusCode::OK, content_type(XML_CONTENT_TYPE))
            }
            Err(err) => tracing::error!(error = %err, "serializing xml response"),
        }
    }

    pub fn send_ok(&mut self) {
        self.send_raw(&[], StatusCode::OK, HeaderMap::new());
    }

    pub fn send_not_found(&mut self) {
        self.send_http_error(StatusCode::NOT_FOUND);
    }

    pub fn send_internal_server_error(&mut self) {
        self.send_http_error(StatusCode::INTERNAL_SERVER_ERROR);
    }

    pub fn send_unauthorized(&mut self) {
        self.send_http_error(StatusCode::UNAUTHORIZED);
    }

    pub fn send_unavailable(&mut self) {
        self.send_http_error(StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Emit a bare HTTP error: status line plus the canonical reason
    /// phrase as the body, nothing else.
    pub fn send_http_error(&mut self, status: StatusCode) {
        if self.buffer.written {
            return;
        }
        self.buffer.written = true;
        self.buffer.simple_error = true;
        self.buffer.status = Some(status);
    }

    /// A 400 with a `text/html` message body.
    pub fn send_error(&mut self, msg: &str) {
        self.send_raw(
            msg.as_bytes(),
            StatusCode::BAD_REQUEST,
            content_type(TEXT_HTML_CONTENT_TYPE),
        );
    }

    /// Copy an upstream response — status, headers and body — into the
    /// buffer.
    pub async fn pipe(&mut self, upstream: Response<Body>) {
        if self.buffer.written {
            return;
        }

        let (parts, body) = upstream.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::error!(error = %err, "reading upstream response body");
                self.send_internal_server_error();
                return;
            }
        };

        self.buffer.written = true;
        self.buffer.status = Some(parts.status);
        self.buffer.body.clear();
        self.buffer.body.extend_from_slice(&bytes);
        self.append_headers(parts.headers);
    }

    fn append_headers(&mut self, headers: HeaderMap) {
        for (key, value) in headers.iter() {
            self.buffer.headers.append(key.clone(), value.clone());
        }
    }

    pub fn response_status(&self) -> StatusCode {
        self.buffer.status_code()
    }

    /// Response headers, mutable until the flush; post middlewares use
    /// this to amend what the handler produced.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.buffer.headers
    }

    /// Buffered response body, mutable until the flush.
    pub fn response_body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer.body
    }

    pub fn is_written(&self) -> bool {
        self.buffer.is_written()
    }

    // ---- flushing -------------------------------------------------------

    /// Freeze the buffer into the wire response. Later flushes are no-ops.
    pub(crate) fn flush(&mut self) {
        if self.flushed.is_none() {
            self.flushed = Some(self.buffer.to_response());
        }
    }

    pub(crate) fn take_response(&mut self) -> Response<Body> {
        self.flush();
        self.flushed
            .take()
            .expect("flush populates the response slot")
    }

    // ---- per-request logging --------------------------------------------

    pub fn log_info(&self, msg: &str) {
        tracing::info!(request_id = self.id, "[{}] message: {}", self.id, msg);
    }

    pub fn log_warning(&self, msg: &str) {
        tracing::warn!(request_id = self.id, "[{}] message: {}", self.id, msg);
    }

    pub fn log_error(&self, msg: &str) {
        tracing::error!(request_id = self.id, "[{}] message: {}", self.id, msg);
    }
}

fn content_type(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
    headers
}

/// Free list of contexts plus the monotonic id source. The id counter is a
/// plain atomic: a single shared source, never derived from the clock.
pub(crate) struct ContextPool {
    free: Mutex<Vec<RequestContext>>,
    next_id: AtomicU64,
}

impl ContextPool {
    pub(crate) fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn acquire(&self, req: Request<Body>) -> RequestContext {
        let mut ctx = self
            .free
            .lock()
            .expect("context pool lock poisoned")
            .pop()
            .unwrap_or_else(RequestContext::fresh);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.reset(req, id);
        ctx
    }

    pub(crate) fn release(&self, mut ctx: RequestContext) {
        ctx.scrub();
        self.free
            .lock()
            .expect("context pool lock poisoned")
            .push(ctx);
    }

    /// Total ids handed out so far, i.e. connections served.
    pub(crate) fn total_issued(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn ids_strictly_increase_across_resets() {
        let pool = ContextPool::new();

        let mut last = 0;
        for _ in 0..5 {
            let ctx = pool.acquire(request(Method::GET, "/x", ""));
            assert!(ctx.id() > last);
            last = ctx.id();
            pool.release(ctx);
        }
        assert_eq!(pool.total_issued(), 5);
    }

    #[tokio::test]
    async fn url_accessors() {
        let pool = ContextPool::new();
        let ctx = pool.acquire(request(Method::GET, "/api/users?x=1&y=two", ""));

        assert_eq!(ctx.full_url(), "/api/users?x=1&y=two");
        assert_eq!(ctx.url_without_query(), "/api/users");
        assert_eq!(ctx.url_parts(), vec!["api".to_string(), "users".to_string()]);
        assert_eq!(ctx.query_param("x").as_deref(), Some("1"));
        assert_eq!(ctx.query_param("y").as_deref(), Some("two"));
        assert_eq!(ctx.query_param("z"), None);
    }

    #[tokio::test]
    async fn raw_body_is_cached() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::POST, "/x", "hello"));

        assert_eq!(&ctx.raw_body().await.unwrap()[..], b"hello");
        // Second read hits the cache instead of the consumed stream.
        assert_eq!(&ctx.raw_body().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn decode_json_rejects_wrong_content_type() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::POST, "/x", r#"{"a":1}"#));

        let err = ctx
            .decode_json_body::<serde_json::Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::NotJsonContentType));
    }

    #[tokio::test]
    async fn decode_json_roundtrips_sent_json() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            name: String,
            count: u32,
        }

        let payload = Payload {
            name: "svc".into(),
            count: 3,
        };

        let pool = ContextPool::new();
        let mut sender = pool.acquire(request(Method::GET, "/x", ""));
        sender.send_json(&payload);
        let body = sender.take_response().into_body();
        let bytes = body.collect().await.unwrap().to_bytes();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/x")
            .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Body::from(bytes))
            .unwrap();
        let mut receiver = pool.acquire(req);
        let decoded: Payload = receiver.decode_json_body().await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn first_send_wins() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::GET, "/x", ""));

        ctx.send_raw(b"first", StatusCode::OK, HeaderMap::new());
        ctx.send_raw(b"second", StatusCode::BAD_GATEWAY, HeaderMap::new());
        ctx.send_http_error(StatusCode::NOT_FOUND);

        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"first");
    }

    #[tokio::test]
    async fn simple_error_body_is_reason_phrase() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::GET, "/x", ""));

        ctx.send_http_error(StatusCode::SERVICE_UNAVAILABLE);
        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"Service Unavailable");
    }

    #[tokio::test]
    async fn unwritten_buffer_flushes_as_200() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::GET, "/x", ""));

        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pipe_copies_upstream_response() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::GET, "/x", ""));

        let upstream = Response::builder()
            .status(StatusCode::CREATED)
            .header("x-upstream", "yes")
            .body(Body::from("payload"))
            .unwrap();
        ctx.pipe(upstream).await;

        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers().get("x-upstream").unwrap(), "yes");
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"payload");
    }

    #[tokio::test]
    async fn value_bag_is_typed() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::GET, "/x", ""));

        assert!(ctx.get_value::<Marker>().is_none());
        ctx.bind_value(Marker(7));
        assert_eq!(ctx.get_value::<Marker>(), Some(&Marker(7)));
    }

    #[tokio::test]
    async fn scrub_clears_request_state() {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(request(Method::POST, "/x?a=1", "body"));
        ctx.set_params(vec![("id".into(), "1".into())]);
        ctx.send_ok();
        pool.release(ctx);

        let ctx = pool.acquire(request(Method::GET, "/fresh", ""));
        assert!(ctx.params().is_empty());
        assert!(!ctx.is_written());
        assert_eq!(ctx.url_without_query(), "/fresh");
    }
}
