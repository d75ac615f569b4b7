//! Connector opening sockets to endpoints.
//!
//! [`Connector`] is a [`tower::Service`] taking an [`Endpoint`] and returning a
//! connected [`Stream`]. TCP sockets are created with socket2 so their options
//! are set before connecting; TLS endpoints complete the handshake before the
//! stream is returned.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn, Instrument};

use super::stream::Stream;
use super::TransportError;
use crate::endpoint::{Address, Endpoint};

#[cfg(feature = "tls")]
use std::sync::Arc;

type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Socket options applied to every TCP connection.
#[derive(Debug, Clone)]
pub(crate) struct TcpConfig {
    /// Whether to disable Nagle's algorithm.
    pub(crate) nodelay: bool,

    /// Whether to enable `SO_KEEPALIVE`, set for sockets that outlive a request.
    pub(crate) keepalive: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: false,
        }
    }
}

/// Opens a [`Stream`] to an [`Endpoint`].
#[derive(Debug, Clone)]
pub(crate) struct Connector {
    config: TcpConfig,

    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl Connector {
    pub(crate) fn new(config: TcpConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn with_tls(mut self, tls: Option<Arc<rustls::ClientConfig>>) -> Self {
        self.tls = tls;
        self
    }

    async fn connect(self, endpoint: Endpoint) -> Result<Stream, TransportError> {
        let connect_error = |source: io::Error| TransportError::Connect {
            endpoint: endpoint.clone(),
            source,
        };

        match endpoint.address() {
            Address::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, &self.config)
                    .await
                    .map_err(connect_error)?;

                if let Ok(peer_addr) = stream.peer_addr() {
                    trace!(peer.addr = %peer_addr, "tcp connected");
                }

                if endpoint.is_tls() {
                    return self.handshake(&endpoint, host, stream).await;
                }
                Ok(stream.into())
            }

            #[cfg(unix)]
            Address::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(connect_error)?;
                trace!(%path, "unix socket connected");
                Ok(stream.into())
            }

            #[cfg(not(unix))]
            Address::Unix(_) => Err(connect_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            ))),
        }
    }

    #[cfg(feature = "tls")]
    async fn handshake(
        &self,
        endpoint: &Endpoint,
        host: &str,
        stream: TcpStream,
    ) -> Result<Stream, TransportError> {
        let tls_error = |source: io::Error| TransportError::Tls {
            endpoint: endpoint.clone(),
            source,
        };

        let config = self.tls.clone().ok_or_else(|| {
            tls_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "no TLS configuration for this transport",
            ))
        })?;

        let domain = rustls::pki_types::ServerName::try_from(host.to_owned())
            .map_err(|error| tls_error(io::Error::new(io::ErrorKind::InvalidInput, error)))?;

        let stream = tokio_rustls::TlsConnector::from(config)
            .connect(domain, stream)
            .await
            .map_err(tls_error)?;

        let (_, session) = stream.get_ref();
        trace!(
            version = ?session.protocol_version(),
            suite = ?session.negotiated_cipher_suite().map(|suite| suite.suite()),
            "tls handshake complete"
        );
        Ok(stream.into())
    }

    #[cfg(not(feature = "tls"))]
    async fn handshake(
        &self,
        endpoint: &Endpoint,
        _host: &str,
        _stream: TcpStream,
    ) -> Result<Stream, TransportError> {
        Err(TransportError::Tls {
            endpoint: endpoint.clone(),
            source: io::Error::new(io::ErrorKind::Unsupported, "TLS support is not enabled"),
        })
    }
}

impl tower::Service<Endpoint> for Connector {
    type Response = Stream;
    type Error = TransportError;
    type Future = BoxFuture<'static, Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, endpoint: Endpoint) -> Self::Future {
        let connector = self.clone();
        let span = tracing::trace_span!("connect", %endpoint);
        Box::pin(connector.connect(endpoint).instrument(span))
    }
}

/// Resolve `host` and connect to the first address that accepts.
async fn connect_tcp(host: &str, port: u16, config: &TcpConfig) -> io::Result<TcpStream> {
    let addrs = tokio::net::lookup_host((host, port)).await?;

    let mut last_error = None;
    for addr in addrs {
        match connect_addr(addr, config)?.await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                trace!(%addr, %error, "tcp connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {host}"),
        )
    }))
}

#[tracing::instrument(skip(config), level = "trace")]
fn connect_addr(
    addr: SocketAddr,
    config: &TcpConfig,
) -> io::Result<impl Future<Output = io::Result<TcpStream>>> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // Tokio requires O_NONBLOCK on sockets it adopts.
    socket.set_nonblocking(true)?;

    if config.nodelay {
        if let Err(error) = socket.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", error);
        }
    }

    if config.keepalive {
        if let Err(error) = socket.set_keepalive(true) {
            warn!("tcp set_keepalive error: {}", error);
        }
    }

    let socket = TcpSocket::from_std_stream(socket.into());
    Ok(socket.connect(addr))
}
