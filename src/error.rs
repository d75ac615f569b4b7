//! Errors surfaced by a [`Connection`](crate::Connection).
//!
//! Every failed call produces exactly one [`Error`]. The variant tells the caller
//! where the failure originated: the local configuration, the client side of the
//! wire (timeouts, sockets, TLS, unparseable responses), the server, or the
//! configured tracer.

use std::fmt;

use thiserror::Error;

use crate::options::ConfigError;
use crate::transport::TransportError;
use crate::BoxError;

/// Error type for connection calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid option, or an illegal mutation of an immutable option.
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// The request could not be built from the caller's input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Local or transport-level failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The server answered with a status of 400 or above.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The tracer rejected a request or response it observed.
    #[error("tracer: {0}")]
    Trace(#[source] BoxError),
}

impl Error {
    /// Numeric code for client and server errors.
    ///
    /// Client errors report a fixed code per [`ClientErrorKind`], server errors
    /// report the HTTP status.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Client(error) => Some(error.code()),
            Error::Server(error) => Some(error.status()),
            _ => None,
        }
    }

    /// Whether this error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Client(error) if error.kind() == ClientErrorKind::Timeout)
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        Error::Client(error.into())
    }
}

/// Categories of client-side failure, each with a fixed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ClientErrorKind {
    /// Connecting or reading did not finish within the configured timeout.
    Timeout,

    /// No socket could be opened to any endpoint.
    Connect,

    /// The TLS handshake failed.
    Tls,

    /// The server sent something that is not a valid HTTP/1.1 response.
    MalformedResponse,

    /// The socket failed while the request was in flight.
    Io,
}

impl ClientErrorKind {
    /// The code reported for this kind of failure.
    pub const fn code(self) -> u16 {
        match self {
            ClientErrorKind::Timeout => 408,
            ClientErrorKind::Connect => 503,
            ClientErrorKind::Tls => 525,
            ClientErrorKind::MalformedResponse => 502,
            ClientErrorKind::Io => 500,
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErrorKind::Timeout => f.write_str("timeout"),
            ClientErrorKind::Connect => f.write_str("connect"),
            ClientErrorKind::Tls => f.write_str("tls"),
            ClientErrorKind::MalformedResponse => f.write_str("malformed response"),
            ClientErrorKind::Io => f.write_str("io"),
        }
    }
}

/// A failure on the client side of the wire.
#[derive(Debug, Error)]
#[error("{kind} error (code {code}): {source}", code = .kind.code())]
pub struct ClientError {
    kind: ClientErrorKind,
    #[source]
    source: BoxError,
}

impl ClientError {
    /// Create a new client error of the given kind.
    pub fn new<E>(kind: ClientErrorKind, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    /// The fixed code for this failure, `408` for timeouts.
    pub fn code(&self) -> u16 {
        self.kind.code()
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        ClientError::new(error.kind(), error)
    }
}

/// The server answered with an error status.
///
/// Carries the HTTP status verbatim, and when the server sent its structured
/// error document, the server-side error number and message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server error {status}: {message}")]
pub struct ServerError {
    status: u16,
    error_num: Option<i64>,
    message: String,
}

impl ServerError {
    /// Create a server error from its parts.
    pub fn new(status: u16, error_num: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            status,
            error_num,
            message: message.into(),
        }
    }

    /// The HTTP status of the response.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The server's own error number, if the body carried one.
    pub fn error_num(&self) -> Option<i64> {
        self.error_num
    }

    /// The server's message, or the raw body when it was not structured.
    pub fn message(&self) -> &str {
        &self.message
    }
}
