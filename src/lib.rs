//! docdb-connection
//!
//! Client-side connection to a document-database server over HTTP/1.1.
//!
//! A [`Connection`] owns validated [`Options`], at most one open socket, and an
//! optional [`Tracer`]. It builds each request (database path prefix,
//! `Connection`, `Authorization` and content headers), sends it within the
//! configured timeout, and maps the outcome to a [`Response`] or a typed
//! [`Error`]:
//!
//! - [`Error::Configuration`] for invalid options, raised before any network
//!   activity,
//! - [`Error::Client`] for timeouts (code 408), connect, TLS and socket
//!   failures,
//! - [`Error::Server`] for responses with a status of 400 or above,
//! - [`Error::Trace`] when the tracer rejects what it observed.
//!
//! The async [`Connection`] runs on tokio; [`blocking::Connection`] wraps it
//! for synchronous callers.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod blocking;
#[doc(hidden)]
pub mod bridge;
mod connection;
pub mod endpoint;
pub mod error;
pub mod options;
pub mod request;
pub mod response;
mod service;
pub mod trace;
pub mod transport;

pub use connection::Connection;
pub use endpoint::Endpoint;
pub use error::{ClientError, ClientErrorKind, Error, ServerError};
pub use options::{ConfigError, ConnectionMode, OptionKey, OptionUpdate, OptionValue, Options};
pub use request::{Method, Request};
pub use response::Response;
pub use trace::{TraceKind, TraceMessage, Tracer};

/// Boxed error type used for error sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
