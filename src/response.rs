//! Responses returned by a [`Connection`](crate::Connection).

use std::borrow::Cow;

use bytes::Bytes;
use http::header::{AsHeaderName, CONNECTION};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ServerError;

/// A fully read response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Create a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The numeric status code.
    pub fn http_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The canonical reason phrase for the status, `Unknown` for unregistered codes.
    pub fn status_definition(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown")
    }

    /// Whether the status is below 400.
    pub fn is_success(&self) -> bool {
        self.status.as_u16() < 400
    }

    /// The headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A single header value.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// The raw body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Whether the server asked for the socket to be closed after this response.
    pub(crate) fn wants_close(&self) -> bool {
        self.headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("close"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDocument {
    error_num: Option<i64>,
    error_message: Option<String>,
}

impl ServerError {
    /// Build a server error from an error response.
    ///
    /// Uses the server's structured error document when the body carries one,
    /// otherwise the raw body, or the reason phrase when the body is empty.
    pub fn from_response(response: &Response) -> Self {
        let status = response.http_code();

        if let Ok(document) = serde_json::from_slice::<ErrorDocument>(response.body()) {
            if let Some(message) = document.error_message {
                return ServerError::new(status, document.error_num, message);
            }
            if document.error_num.is_some() {
                return ServerError::new(
                    status,
                    document.error_num,
                    response.status_definition(),
                );
            }
        }

        let text = response.text();
        let message = if text.trim().is_empty() {
            response.status_definition().to_owned()
        } else {
            text.into_owned()
        };
        ServerError::new(status, None, message)
    }
}
