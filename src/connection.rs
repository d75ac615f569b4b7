//! The connection: options, transport and tracer put together.
//!
//! Every logical call goes through the same steps:
//!
//! 1. *Building*: the path gets its `/_db/<database>` prefix and the
//!    connection's headers are attached. Invalid input fails here, before any
//!    socket is touched.
//! 2. *Sent*: a socket is made ready, the `Host` header is set for the endpoint
//!    in use, and the tracer observes the final request.
//! 3. *Awaiting response*: the transport writes the request and reads the full
//!    response within the configured timeout.
//! 4. *Completed* or *Failed*: the tracer observes the response, and statuses
//!    of 400 and above become [`ServerError`]s.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::{
    ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT,
};
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderValue};
use tracing::{debug, trace, Instrument as _};

use crate::endpoint::Endpoint;
use crate::error::{Error, ServerError};
use crate::options::{OptionKey, OptionUpdate, OptionValue, Options};
use crate::request::{Method, Request};
use crate::response::Response;
use crate::transport::{HttpTransport, SendPolicy};

const USER_AGENT_VALUE: &str = concat!("docdb-connection/", env!("CARGO_PKG_VERSION"));

/// Where a logical call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    Sent,
    AwaitingResponse,
    Completed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Building => "building",
            Phase::Sent => "sent",
            Phase::AwaitingResponse => "awaiting-response",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A connection to a document-database server.
///
/// Calls take `&mut self`: a connection serves one caller at a time, and a
/// kept socket is never shared between requests in flight. Use one connection
/// per concurrent caller.
///
/// ```no_run
/// # use docdb_connection::{Connection, Options};
/// # async fn run() -> Result<(), docdb_connection::Error> {
/// let options = Options::builder("tcp://127.0.0.1:8529")
///     .auth("root", "")
///     .build()?;
/// let mut connection = Connection::new(options)?;
///
/// let version = connection.get("/_api/version").await?;
/// println!("{}", version.text());
///
/// connection.set_database("analytics")?;
/// connection.post("/_api/collection", r#"{"name":"events"}"#).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection {
    options: Options,
    transport: HttpTransport,
}

impl Connection {
    /// Create a connection. No socket is opened until the first request.
    pub fn new(options: Options) -> Result<Self, Error> {
        let transport = HttpTransport::new(&options)?;
        Ok(Self { options, transport })
    }

    /// The current options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Read one option.
    pub fn get_option(&self, key: OptionKey) -> OptionValue {
        self.options.get(key)
    }

    /// Change one option. The change applies from the next request on.
    pub fn set_option(&mut self, update: OptionUpdate) -> Result<(), Error> {
        let key = update.key();
        self.options.set(update)?;
        debug!(option = %key, "option changed");
        Ok(())
    }

    /// The selected database.
    pub fn database(&self) -> &str {
        self.options.database()
    }

    /// Select the database used to prefix request paths.
    pub fn set_database(&mut self, database: impl Into<String>) -> Result<(), Error> {
        self.set_option(OptionUpdate::Database(database.into()))
    }

    /// The endpoint in use, or the one the next connection will try first.
    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    /// Whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Close the open socket, if any. The next request opens a new one.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Send a `GET` request.
    pub async fn get(&mut self, path: &str) -> Result<Response, Error> {
        self.send(Request::get(path)).await
    }

    /// Send a `POST` request.
    pub async fn post(&mut self, path: &str, body: impl Into<Bytes>) -> Result<Response, Error> {
        self.send(Request::post(path).with_body(body)).await
    }

    /// Send a `PUT` request.
    pub async fn put(&mut self, path: &str, body: impl Into<Bytes>) -> Result<Response, Error> {
        self.send(Request::put(path).with_body(body)).await
    }

    /// Send a `PATCH` request.
    pub async fn patch(&mut self, path: &str, body: impl Into<Bytes>) -> Result<Response, Error> {
        self.send(Request::patch(path).with_body(body)).await
    }

    /// Send a `DELETE` request.
    pub async fn delete(&mut self, path: &str) -> Result<Response, Error> {
        self.send(Request::delete(path)).await
    }

    /// Send a `HEAD` request.
    pub async fn head(&mut self, path: &str) -> Result<Response, Error> {
        self.send(Request::head(path)).await
    }

    /// Send a request assembled from its parts.
    pub async fn call(
        &mut self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Result<Response, Error> {
        let mut request = Request::new(method, path).with_body(body);
        *request.headers_mut() = headers;
        self.send(request).await
    }

    /// Send a request and return its response.
    pub async fn send(&mut self, request: Request) -> Result<Response, Error> {
        let span = tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.path()
        );
        self.dispatch(request).instrument(span).await
    }

    /// Send requests one after the other and return their responses in order.
    ///
    /// Stops at the first failure and returns it.
    pub async fn batch<I>(&mut self, requests: I) -> Result<Vec<Response>, Error>
    where
        I: IntoIterator<Item = Request>,
    {
        let requests = requests.into_iter();
        let mut responses = Vec::with_capacity(requests.size_hint().0);
        for request in requests {
            responses.push(self.send(request).await?);
        }
        Ok(responses)
    }

    async fn dispatch(&mut self, request: Request) -> Result<Response, Error> {
        trace!(phase = %Phase::Building);
        let policy = self.policy(request.method());
        let request = self.build(request)?;

        let outcome = self.exchange(request, &policy).await;
        match &outcome {
            Ok(response) => trace!(phase = %Phase::Completed, status = response.http_code()),
            Err(error) => debug!(phase = %Phase::Failed, %error),
        }
        outcome
    }

    async fn exchange(
        &mut self,
        mut request: Request,
        policy: &SendPolicy,
    ) -> Result<Response, Error> {
        let endpoint = self.transport.ready(policy).await?;
        let host = HeaderValue::from_str(&endpoint.authority())
            .map_err(|error| Error::InvalidRequest(format!("invalid host: {error}")))?;
        request.headers_mut().insert(HOST, host);

        trace!(phase = %Phase::Sent, %endpoint);
        if let Some(tracer) = self.options.tracer() {
            if let Err(error) = tracer.on_send(&request, &endpoint) {
                if !policy.reuse {
                    self.transport.close();
                }
                return Err(Error::Trace(error));
            }
        }

        trace!(phase = %Phase::AwaitingResponse, timeout = ?policy.timeout);
        let started = Instant::now();
        let response = self.transport.send(&request, policy).await?;
        let elapsed = started.elapsed();

        if let Some(tracer) = self.options.tracer() {
            tracer.on_receive(&response, elapsed).map_err(Error::Trace)?;
        }

        if !response.is_success() {
            return Err(ServerError::from_response(&response).into());
        }
        Ok(response)
    }

    fn policy(&self, method: Method) -> SendPolicy {
        SendPolicy {
            timeout: self.options.timeout(),
            reuse: self.options.reuses_socket(),
            retry: method.is_idempotent() || self.options.retry_non_idempotent(),
        }
    }

    /// Attach the path prefix and the connection's headers.
    fn build(&self, mut request: Request) -> Result<Request, Error> {
        let path = prefixed_path(self.options.database(), request.path());
        PathAndQuery::from_str(&path)
            .map_err(|error| Error::InvalidRequest(format!("invalid path `{path}`: {error}")))?;
        request.set_path(path);

        let method = request.method();
        let length = request.body().len();
        let headers = request.headers_mut();

        headers.insert(
            CONNECTION,
            HeaderValue::from_static(self.options.connection().as_str()),
        );

        if let Some((user, passwd)) = self.options.credentials() {
            let token = STANDARD.encode(format!("{user}:{passwd}"));
            let mut value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|_| Error::InvalidRequest("credentials are not a valid header".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));

        if length > 0 {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
        }
        if length > 0 || method.has_body() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        Ok(request)
    }
}

/// `/_api/version` becomes `/_db/<database>/_api/version`. Paths already
/// addressing a database are left alone.
fn prefixed_path(database: &str, path: &str) -> String {
    if path.starts_with("/_db/") {
        return path.to_owned();
    }

    if path.starts_with('/') {
        format!("/_db/{database}{path}")
    } else {
        format!("/_db/{database}/{path}")
    }
}
