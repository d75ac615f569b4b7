//! HTTP/1.1 transport.
//!
//! [`HttpTransport`] owns the configured endpoints and at most one live hyper
//! connection. Each exchange is bounded by the policy's timeout: once for
//! connecting (including the TLS handshake) and once for writing the request
//! and reading the whole response.
//!
//! When a reused keep-alive socket turns out to be dead, the exchange is retried
//! exactly once on a fresh socket, provided the policy allows it.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use http::header::HOST;
use http::HeaderValue;
use http_body_util::{BodyExt as _, Full};
use hyper::client::conn::http1;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower::{ServiceBuilder, ServiceExt as _};
use tracing::{debug, trace};

use crate::bridge::io::TokioIo;
use crate::endpoint::Endpoint;
use crate::error::ClientErrorKind;
use crate::options::{ConfigError, Options};
use crate::request::Request;
use crate::response::Response;
use crate::service::TimeoutLayer;
use crate::BoxError;

use self::tcp::{Connector, TcpConfig};

mod stream;
mod tcp;

#[cfg(feature = "tls")]
pub(crate) mod tls;

/// Transport-level failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// A phase did not complete within the timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No socket could be opened to the endpoint.
    #[error("failed to connect to {endpoint}")]
    Connect {
        /// The endpoint that was tried.
        endpoint: Endpoint,
        /// The socket error.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed")]
    Tls {
        /// The endpoint that was tried.
        endpoint: Endpoint,
        /// The handshake error.
        #[source]
        source: io::Error,
    },

    /// The HTTP exchange failed.
    #[error("http exchange failed")]
    Http(#[source] hyper::Error),

    /// The request could not be handed to hyper.
    #[error("invalid request")]
    Request(#[source] BoxError),
}

impl TransportError {
    /// The client error category this failure is reported as.
    pub fn kind(&self) -> ClientErrorKind {
        match self {
            TransportError::Timeout(_) => ClientErrorKind::Timeout,
            TransportError::Connect { .. } => ClientErrorKind::Connect,
            TransportError::Tls { .. } => ClientErrorKind::Tls,
            TransportError::Http(error) if error.is_parse() || error.is_parse_status() => {
                ClientErrorKind::MalformedResponse
            }
            TransportError::Http(_) | TransportError::Request(_) => ClientErrorKind::Io,
        }
    }

    /// Whether the failure looks like the server dropped an idle socket, so the
    /// request may be resent on a fresh one.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(error) => {
                error.is_incomplete_message()
                    || error.is_canceled()
                    || error.is_closed()
                    || io_source(error).is_some_and(|error| {
                        matches!(
                            error.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
            }
            _ => false,
        }
    }

    /// Whether the next endpoint should be tried after this failure.
    fn is_failover(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. } | TransportError::Timeout(_)
        )
    }
}

fn io_source(error: &hyper::Error) -> Option<&io::Error> {
    let mut source = std::error::Error::source(error);
    while let Some(error) = source {
        if let Some(io) = error.downcast_ref::<io::Error>() {
            return Some(io);
        }
        source = error.source();
    }
    None
}

/// How one exchange is carried out.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendPolicy {
    /// Bound on connecting, and separately on the request/response exchange.
    pub(crate) timeout: Duration,

    /// Keep the socket for the next exchange.
    pub(crate) reuse: bool,

    /// Resend once on a fresh socket if a reused one turns out dead.
    pub(crate) retry: bool,
}

/// A live hyper connection and the task driving it.
#[derive(Debug)]
struct LiveConnection {
    sender: http1::SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    endpoint: usize,
    served: usize,
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Owns the endpoints and at most one open connection.
#[derive(Debug)]
pub(crate) struct HttpTransport {
    endpoints: Vec<Endpoint>,
    current: usize,
    live: Option<LiveConnection>,

    #[cfg(feature = "tls")]
    tls: Option<std::sync::Arc<rustls::ClientConfig>>,
}

impl HttpTransport {
    /// Create a transport for the configured endpoints. No socket is opened.
    pub(crate) fn new(options: &Options) -> Result<Self, ConfigError> {
        #[cfg(feature = "tls")]
        let tls = if options.endpoints().iter().any(Endpoint::is_tls) {
            Some(tls::client_config(options)?)
        } else {
            None
        };

        Ok(Self {
            endpoints: options.endpoints().to_vec(),
            current: 0,
            live: None,
            #[cfg(feature = "tls")]
            tls,
        })
    }

    /// The endpoint in use, or the one the next connection will try first.
    pub(crate) fn endpoint(&self) -> &Endpoint {
        let index = self.live.as_ref().map_or(self.current, |live| live.endpoint);
        &self.endpoints[index]
    }

    /// Whether a socket is currently open.
    pub(crate) fn is_connected(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| !live.sender.is_closed())
    }

    /// Close the open socket, if any.
    pub(crate) fn close(&mut self) {
        if let Some(live) = self.live.take() {
            debug!(
                endpoint = %self.endpoints[live.endpoint],
                served = live.served,
                "closing connection"
            );
        }
    }

    /// Make sure a usable connection is open and return its endpoint.
    ///
    /// A kept socket is reused when the policy allows it and hyper has not
    /// seen it close; otherwise a new one is opened.
    pub(crate) async fn ready(&mut self, policy: &SendPolicy) -> Result<Endpoint, TransportError> {
        if let Some(live) = &self.live {
            if policy.reuse && !live.sender.is_closed() {
                trace!(served = live.served, "reusing connection");
                return Ok(self.endpoints[live.endpoint].clone());
            }
            self.close();
        }

        self.connect(policy).await?;
        Ok(self.endpoint().clone())
    }

    /// Send a request and read the full response.
    pub(crate) async fn send(
        &mut self,
        request: &Request,
        policy: &SendPolicy,
    ) -> Result<Response, TransportError> {
        let reused = self.live.as_ref().is_some_and(|live| live.served > 0);

        match self.exchange(request, policy).await {
            Err(error) if reused && policy.retry && error.is_retryable() => {
                debug!(%error, "kept connection failed, retrying once on a new connection");
                let endpoint = self.ready(policy).await?;

                let host = HeaderValue::from_str(&endpoint.authority())
                    .map_err(|error| TransportError::Request(error.into()))?;
                let mut request = request.clone();
                request.headers_mut().insert(HOST, host);
                self.exchange(&request, policy).await
            }
            outcome => outcome,
        }
    }

    async fn exchange(
        &mut self,
        request: &Request,
        policy: &SendPolicy,
    ) -> Result<Response, TransportError> {
        if self.live.is_none() {
            self.connect(policy).await?;
        }
        let Some(live) = self.live.as_mut() else {
            return Err(TransportError::Request("no connection available".into()));
        };

        let outgoing = request
            .to_http()
            .map_err(|error| TransportError::Request(error.into()))?;

        let sender = &mut live.sender;
        let roundtrip = async {
            sender.ready().await?;
            let response = sender.send_request(outgoing).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, hyper::Error>(Response::new(parts.status, parts.headers, body))
        };

        let outcome = tokio::time::timeout(policy.timeout, roundtrip).await;
        live.served += 1;

        match outcome {
            Err(_) => {
                debug!(timeout = ?policy.timeout, "response not received in time");
                self.close();
                Err(TransportError::Timeout(policy.timeout))
            }
            Ok(Err(error)) => {
                debug!(%error, "http exchange failed");
                self.close();
                Err(TransportError::Http(error))
            }
            Ok(Ok(response)) => {
                if !policy.reuse || response.wants_close() {
                    self.close();
                }
                Ok(response)
            }
        }
    }

    /// Open a connection, trying each endpoint in turn from the current one.
    async fn connect(&mut self, policy: &SendPolicy) -> Result<(), TransportError> {
        let connector = ServiceBuilder::new()
            .layer(TimeoutLayer::new(TransportError::Timeout, policy.timeout))
            .service(self.connector(policy));

        let count = self.endpoints.len();
        let mut last_error = None;

        for offset in 0..count {
            let index = (self.current + offset) % count;
            let endpoint = self.endpoints[index].clone();

            match connector.clone().oneshot(endpoint.clone()).await {
                Ok(stream) => {
                    debug!(%endpoint, kind = stream.kind(), "connected");
                    self.current = index;
                    self.live = Some(handshake(stream, index).await?);
                    return Ok(());
                }
                Err(error) if error.is_failover() && offset + 1 < count => {
                    debug!(%endpoint, %error, "connect failed, trying next endpoint");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or(TransportError::Timeout(policy.timeout)))
    }

    fn connector(&self, policy: &SendPolicy) -> Connector {
        let connector = Connector::new(TcpConfig {
            keepalive: policy.reuse,
            ..TcpConfig::default()
        });

        #[cfg(feature = "tls")]
        let connector = connector.with_tls(self.tls.clone());

        connector
    }
}

async fn handshake(
    stream: stream::Stream,
    endpoint: usize,
) -> Result<LiveConnection, TransportError> {
    let (sender, conn) = http1::Builder::new()
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await
        .map_err(TransportError::Http)?;

    let driver = tokio::spawn(async move {
        if let Err(error) = conn.await {
            debug!(%error, "connection driver finished with error");
        }
    });

    Ok(LiveConnection {
        sender,
        driver,
        endpoint,
        served: 0,
    })
}
