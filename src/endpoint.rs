//! Server endpoints.
//!
//! An endpoint names the protocol and address of a database server:
//!
//! - `tcp://host:port` and `http://host:port` for plain TCP,
//! - `ssl://host:port` and `https://host:port` for TLS over TCP,
//! - `unix:///path/to/socket` for a Unix-domain socket.
//!
//! The port defaults to [`DEFAULT_PORT`] when omitted. IPv6 literals must be
//! bracketed, as in `tcp://[::1]:8529`.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};

use crate::options::ConfigError;

/// Port used when an endpoint does not name one.
pub const DEFAULT_PORT: u16 = 8529;

/// The network address part of an [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A host name or IP literal with a port.
    Tcp {
        /// Host name or IP literal, without brackets.
        host: String,
        /// TCP port.
        port: u16,
    },

    /// Path to a Unix-domain socket.
    Unix(Utf8PathBuf),
}

/// A parsed server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    address: Address,
    tls: bool,
}

impl Endpoint {
    /// A plain TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: Address::Tcp {
                host: host.into(),
                port,
            },
            tls: false,
        }
    }

    /// A TLS endpoint.
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: Address::Tcp {
                host: host.into(),
                port,
            },
            tls: true,
        }
    }

    /// A Unix-domain socket endpoint.
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            address: Address::Unix(path.into()),
            tls: false,
        }
    }

    /// The network address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Whether connections to this endpoint use TLS.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// The host name, `localhost` for Unix-domain sockets.
    pub fn host(&self) -> &str {
        match &self.address {
            Address::Tcp { host, .. } => host,
            Address::Unix(_) => "localhost",
        }
    }

    /// The TCP port, if this is a TCP endpoint.
    pub fn port(&self) -> Option<u16> {
        match &self.address {
            Address::Tcp { port, .. } => Some(*port),
            Address::Unix(_) => None,
        }
    }

    /// The socket path, if this is a Unix-domain socket endpoint.
    pub fn path(&self) -> Option<&Utf8Path> {
        match &self.address {
            Address::Tcp { .. } => None,
            Address::Unix(path) => Some(path),
        }
    }

    /// Value for the `Host` header of requests sent to this endpoint.
    pub fn authority(&self) -> String {
        match &self.address {
            Address::Tcp { host, port } if host.contains(':') => format!("[{host}]:{port}"),
            Address::Tcp { host, port } => format!("{host}:{port}"),
            Address::Unix(_) => "localhost".to_owned(),
        }
    }

    /// Base URL used when reporting request targets, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.address {
            Address::Tcp { .. } if self.tls => format!("https://{}", self.authority()),
            Address::Tcp { .. } => format!("http://{}", self.authority()),
            Address::Unix(path) => format!("unix://{path}"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Tcp { .. } if self.tls => write!(f, "ssl://{}", self.authority()),
            Address::Tcp { .. } => write!(f, "tcp://{}", self.authority()),
            Address::Unix(path) => write!(f, "unix://{path}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            endpoint: s.to_owned(),
            reason: reason.to_owned(),
        };

        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        let tls = match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "http" => false,
            "ssl" | "https" => true,
            "unix" => {
                if !rest.starts_with('/') {
                    return Err(invalid("unix socket path must be absolute"));
                }
                return Ok(Endpoint::unix(rest));
            }
            _ => return Err(invalid("unsupported scheme")),
        };

        let authority = rest.strip_suffix('/').unwrap_or(rest);
        if authority.contains('/') {
            return Err(invalid("endpoints cannot carry a path"));
        }

        let (host, port) = split_host_port(authority).map_err(invalid)?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Endpoint {
            address: Address::Tcp {
                host: host.to_owned(),
                port,
            },
            tls,
        })
    }
}

fn split_host_port(authority: &str) -> Result<(&str, u16), &'static str> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or("unterminated IPv6 literal")?;
        match rest {
            "" => (host, None),
            _ => (
                host,
                Some(rest.strip_prefix(':').ok_or("expected `:` after IPv6 literal")?),
            ),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => return Err("IPv6 literals must be bracketed"),
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    let port = match port {
        None => DEFAULT_PORT,
        Some(port) => match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err("invalid port"),
            Ok(port) => port,
        },
    };

    Ok((host, port))
}
