//! A blocking connection.
//!
//! [`Connection`] wraps the async [`crate::Connection`] together with a
//! current-thread tokio runtime, and runs every call to completion on it. It
//! must not be used from within an async context.

use bytes::Bytes;
use http::HeaderMap;
use tokio::runtime::{Builder, Runtime};

use crate::endpoint::Endpoint;
use crate::error::{ClientError, ClientErrorKind, Error};
use crate::options::{OptionKey, OptionUpdate, OptionValue, Options};
use crate::request::{Method, Request};
use crate::response::Response;

/// A connection whose calls block the current thread.
#[derive(Debug)]
pub struct Connection {
    inner: crate::Connection,
    runtime: Runtime,
}

impl Connection {
    /// Create a connection and the runtime driving it.
    pub fn new(options: Options) -> Result<Self, Error> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| ClientError::new(ClientErrorKind::Io, error))?;

        Ok(Self {
            inner: crate::Connection::new(options)?,
            runtime,
        })
    }

    /// The current options.
    pub fn options(&self) -> &Options {
        self.inner.options()
    }

    /// Read one option.
    pub fn get_option(&self, key: OptionKey) -> OptionValue {
        self.inner.get_option(key)
    }

    /// Change one option.
    pub fn set_option(&mut self, update: OptionUpdate) -> Result<(), Error> {
        self.inner.set_option(update)
    }

    /// The selected database.
    pub fn database(&self) -> &str {
        self.inner.database()
    }

    /// Select the database.
    pub fn set_database(&mut self, database: impl Into<String>) -> Result<(), Error> {
        self.inner.set_database(database)
    }

    /// The endpoint in use.
    pub fn endpoint(&self) -> &Endpoint {
        self.inner.endpoint()
    }

    /// Whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Close the open socket, if any.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Send a `GET` request.
    pub fn get(&mut self, path: &str) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.get(path))
    }

    /// Send a `POST` request.
    pub fn post(&mut self, path: &str, body: impl Into<Bytes>) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.post(path, body))
    }

    /// Send a `PUT` request.
    pub fn put(&mut self, path: &str, body: impl Into<Bytes>) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.put(path, body))
    }

    /// Send a `PATCH` request.
    pub fn patch(&mut self, path: &str, body: impl Into<Bytes>) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.patch(path, body))
    }

    /// Send a `DELETE` request.
    pub fn delete(&mut self, path: &str) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.delete(path))
    }

    /// Send a `HEAD` request.
    pub fn head(&mut self, path: &str) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.head(path))
    }

    /// Send a request assembled from its parts.
    pub fn call(
        &mut self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Result<Response, Error> {
        self.runtime
            .block_on(self.inner.call(method, path, headers, body))
    }

    /// Send a request.
    pub fn send(&mut self, request: Request) -> Result<Response, Error> {
        self.runtime.block_on(self.inner.send(request))
    }

    /// Send requests in order, stopping at the first failure.
    pub fn batch<I>(&mut self, requests: I) -> Result<Vec<Response>, Error>
    where
        I: IntoIterator<Item = Request>,
    {
        self.runtime.block_on(self.inner.batch(requests))
    }
}
