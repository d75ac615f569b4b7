//! Request/response tracing.
//!
//! A [`Tracer`] observes every logical request twice: once after the request
//! is fully built and before it is written, and once after the full response
//! has been read. It comes in two flavours:
//!
//! - [`Tracer::Basic`] receives a [`TraceKind`] and the HTTP/1.1 wire rendering
//!   of the request or response.
//! - [`Tracer::Enhanced`] receives a structured [`TraceMessage`].
//!
//! Tracers only ever see shared references, so they cannot alter what they
//! observe. An error returned by a tracer aborts the call it was observing.
//!
//! ```
//! # use docdb_connection::trace::{TraceKind, Tracer};
//! let tracer = Tracer::basic(|kind: TraceKind, payload: &str| {
//!     println!("{}: {} bytes", kind, payload.len());
//!     Ok(())
//! });
//! assert!(!tracer.is_enhanced());
//! ```

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;

use crate::endpoint::Endpoint;
use crate::request::{Method, Request};
use crate::response::Response;
use crate::BoxError;

/// Direction of a basic trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    /// The request is about to be written.
    Send,

    /// The response has been read.
    Receive,
}

impl TraceKind {
    /// `send` or `receive`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Send => "send",
            TraceKind::Receive => "receive",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer receiving raw wire renderings.
pub trait BasicTracer: Send + Sync {
    /// Observe one event.
    fn trace(&self, kind: TraceKind, payload: &str) -> Result<(), BoxError>;
}

impl<F> BasicTracer for F
where
    F: Fn(TraceKind, &str) -> Result<(), BoxError> + Send + Sync,
{
    fn trace(&self, kind: TraceKind, payload: &str) -> Result<(), BoxError> {
        (self)(kind, payload)
    }
}

/// Observer receiving structured messages.
pub trait EnhancedTracer: Send + Sync {
    /// Observe one message.
    fn trace(&self, message: &TraceMessage) -> Result<(), BoxError>;
}

impl<F> EnhancedTracer for F
where
    F: Fn(&TraceMessage) -> Result<(), BoxError> + Send + Sync,
{
    fn trace(&self, message: &TraceMessage) -> Result<(), BoxError> {
        (self)(message)
    }
}

/// A structured trace message.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceMessage {
    /// The request about to be written.
    Request(TraceRequest),

    /// The response that was read.
    Response(TraceResponse),
}

impl TraceMessage {
    /// Headers of the traced message, in the order they were sent or received.
    pub fn headers(&self) -> &[(String, String)] {
        match self {
            TraceMessage::Request(request) => request.headers(),
            TraceMessage::Response(response) => response.headers(),
        }
    }

    /// Body of the traced message.
    pub fn body(&self) -> &str {
        match self {
            TraceMessage::Request(request) => request.body(),
            TraceMessage::Response(response) => response.body(),
        }
    }

    /// `request` or `response`.
    pub fn kind(&self) -> &'static str {
        match self {
            TraceMessage::Request(request) => request.kind(),
            TraceMessage::Response(response) => response.kind(),
        }
    }
}

/// Structured view of an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl TraceRequest {
    pub(crate) fn new(request: &Request, endpoint: &Endpoint) -> Self {
        Self {
            method: request.method(),
            url: format!("{}{}", endpoint.base_url(), request.path()),
            headers: header_pairs(request.headers()),
            body: String::from_utf8_lossy(request.body()).into_owned(),
        }
    }

    /// HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Full target URL, including the database prefix.
    pub fn request_url(&self) -> &str {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Request body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Always `request`.
    pub fn kind(&self) -> &'static str {
        "request"
    }
}

/// Structured view of a received response.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceResponse {
    status: u16,
    definition: &'static str,
    headers: Vec<(String, String)>,
    body: String,
    time_taken: f64,
}

impl TraceResponse {
    pub(crate) fn new(response: &Response, elapsed: Duration) -> Self {
        Self {
            status: response.http_code(),
            definition: response.status_definition(),
            headers: header_pairs(response.headers()),
            body: response.text().into_owned(),
            time_taken: elapsed.as_secs_f64(),
        }
    }

    /// HTTP status code.
    pub fn http_code(&self) -> u16 {
        self.status
    }

    /// Reason phrase of the status code, e.g. `OK`.
    pub fn http_code_definition(&self) -> &'static str {
        self.definition
    }

    /// Seconds between writing the request and reading the full response.
    pub fn time_taken(&self) -> f64 {
        self.time_taken
    }

    /// Response headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Response body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Always `response`.
    pub fn kind(&self) -> &'static str {
        "response"
    }
}

/// The tracer installed on a connection.
#[derive(Clone)]
pub enum Tracer {
    /// Receives wire renderings.
    Basic(Arc<dyn BasicTracer>),

    /// Receives structured messages.
    Enhanced(Arc<dyn EnhancedTracer>),
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tracer::Basic(_) => f.write_str("Tracer::Basic"),
            Tracer::Enhanced(_) => f.write_str("Tracer::Enhanced"),
        }
    }
}

impl Tracer {
    /// A basic tracer from a closure.
    ///
    /// Types implementing [`BasicTracer`] directly can be wrapped with
    /// [`Tracer::Basic`].
    pub fn basic<F>(tracer: F) -> Self
    where
        F: Fn(TraceKind, &str) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Tracer::Basic(Arc::new(tracer))
    }

    /// An enhanced tracer from a closure.
    pub fn enhanced<F>(tracer: F) -> Self
    where
        F: Fn(&TraceMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Tracer::Enhanced(Arc::new(tracer))
    }

    /// Whether this tracer receives structured messages.
    pub fn is_enhanced(&self) -> bool {
        matches!(self, Tracer::Enhanced(_))
    }

    /// Whether both handles point at the same tracer.
    pub(crate) fn same(&self, other: &Tracer) -> bool {
        match (self, other) {
            (Tracer::Basic(a), Tracer::Basic(b)) => Arc::ptr_eq(a, b),
            (Tracer::Enhanced(a), Tracer::Enhanced(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn on_send(&self, request: &Request, endpoint: &Endpoint) -> Result<(), BoxError> {
        match self {
            Tracer::Basic(tracer) => tracer.trace(TraceKind::Send, &render_request(request)),
            Tracer::Enhanced(tracer) => tracer.trace(&TraceMessage::Request(TraceRequest::new(
                request, endpoint,
            ))),
        }
    }

    pub(crate) fn on_receive(
        &self,
        response: &Response,
        elapsed: Duration,
    ) -> Result<(), BoxError> {
        match self {
            Tracer::Basic(tracer) => tracer.trace(TraceKind::Receive, &render_response(response)),
            Tracer::Enhanced(tracer) => tracer.trace(&TraceMessage::Response(
                TraceResponse::new(response, elapsed),
            )),
        }
    }
}

/// Render a request as it is written on the wire.
pub(crate) fn render_request(request: &Request) -> String {
    let mut raw = format!("{} {} HTTP/1.1\r\n", request.method(), request.path());
    write_headers(&mut raw, request.headers());
    raw.push_str(&String::from_utf8_lossy(request.body()));
    raw
}

/// Render a response as it was read from the wire.
pub(crate) fn render_response(response: &Response) -> String {
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\n",
        response.http_code(),
        response.status_definition()
    );
    write_headers(&mut raw, response.headers());
    raw.push_str(&response.text());
    raw
}

fn write_headers(raw: &mut String, headers: &HeaderMap) {
    for (name, value) in header_pairs(headers) {
        let _ = write!(raw, "{name}: {value}\r\n");
    }
    raw.push_str("\r\n");
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                title_case(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// `content-type` becomes `Content-Type`, matching what hyper writes with
/// title-case headers enabled.
pub(crate) fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::header::{CONNECTION, CONTENT_TYPE};
    use http::{HeaderValue, StatusCode};

    use super::*;

    fn request() -> Request {
        Request::post("/_db/_system/_api/collection")
            .with_body(r#"{"name":"test"}"#)
            .header(CONNECTION, HeaderValue::from_static("Close"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    fn response() -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Response::new(StatusCode::OK, headers, Bytes::from_static(b"{\"ok\":true}"))
    }

    #[test]
    fn title_case_names() {
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("authorization"), "Authorization");
        assert_eq!(title_case("x-docdb-async"), "X-Docdb-Async");
    }

    #[test]
    fn renders_request_wire_format() {
        let raw = render_request(&request());
        assert_eq!(
            raw,
            "POST /_db/_system/_api/collection HTTP/1.1\r\n\
             Connection: Close\r\n\
             Content-Type: application/json\r\n\
             \r\n\
             {\"name\":\"test\"}"
        );
    }

    #[test]
    fn renders_response_wire_format() {
        let raw = render_response(&response());
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.ends_with("\r\n\r\n{\"ok\":true}"));
    }

    #[test]
    fn basic_tracer_receives_kind_and_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracer = Tracer::basic(move |kind: TraceKind, payload: &str| {
            sink.lock().unwrap().push((kind, payload.to_owned()));
            Ok(())
        });

        let endpoint = Endpoint::tcp("127.0.0.1", 8529);
        tracer.on_send(&request(), &endpoint).unwrap();
        tracer
            .on_receive(&response(), Duration::from_millis(5))
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, TraceKind::Send);
        assert_eq!(seen[1].0, TraceKind::Receive);
        assert!(seen[0].1.contains("Connection: Close"));
    }

    #[test]
    fn enhanced_tracer_receives_structured_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracer = Tracer::enhanced(move |message: &TraceMessage| {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        });
        assert!(tracer.is_enhanced());

        let endpoint = Endpoint::tcp("127.0.0.1", 8529);
        tracer.on_send(&request(), &endpoint).unwrap();
        tracer
            .on_receive(&response(), Duration::from_millis(250))
            .unwrap();

        let seen = seen.lock().unwrap();
        match &seen[0] {
            TraceMessage::Request(request) => {
                assert_eq!(request.method(), Method::Post);
                assert_eq!(
                    request.request_url(),
                    "http://127.0.0.1:8529/_db/_system/_api/collection"
                );
                assert_eq!(request.kind(), "request");
                assert!(!request.headers().is_empty());
            }
            other => panic!("expected request, got {other:?}"),
        }
        match &seen[1] {
            TraceMessage::Response(response) => {
                assert_eq!(response.http_code(), 200);
                assert_eq!(response.http_code_definition(), "OK");
                assert_eq!(response.kind(), "response");
                assert!((response.time_taken() - 0.25).abs() < f64::EPSILON);
                assert_eq!(response.body(), "{\"ok\":true}");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn tracer_errors_propagate() {
        let tracer = Tracer::basic(|_: TraceKind, _: &str| Err("boom".into()));
        let endpoint = Endpoint::tcp("127.0.0.1", 8529);
        let error = tracer.on_send(&request(), &endpoint).unwrap_err();
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn same_tracer_identity() {
        let tracer = Tracer::basic(|_: TraceKind, _: &str| Ok(()));
        let other = Tracer::basic(|_: TraceKind, _: &str| Ok(()));
        assert!(tracer.same(&tracer.clone()));
        assert!(!tracer.same(&other));
    }
}
