//! In-process servers for integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use docdb_connection::bridge::io::TokioIo;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct State {
    accepted: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
    credentials: Option<(String, String)>,
}

/// HTTP/1.1 server answering a handful of database API routes.
///
/// Routes (after the optional `/_db/<name>` prefix):
///
/// - `GET|HEAD /_api/version`
/// - `GET /_admin/sleep?duration=<seconds>`
/// - `POST /_api/collection`, `DELETE /_api/collection/<name>`
/// - `* /_api/echo` returns the method, database and body it received
///
/// Anything else is a 404 with the server's error document.
#[derive(Debug)]
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::spawn(State::default()).await
    }

    /// Require `Authorization: Basic` with these credentials on every request.
    pub async fn with_credentials(user: &str, passwd: &str) -> Self {
        Self::spawn(State {
            credentials: Some((user.to_owned(), passwd.to_owned())),
            ..Default::default()
        })
        .await
    }

    async fn spawn(state: State) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);

        let handle = tokio::spawn(accept_loop(listener, state.clone()));
        Self {
            addr,
            state,
            handle,
        }
    }

    /// Serve on a Unix-domain socket at `path` instead of TCP.
    #[cfg(unix)]
    pub async fn start_unix(path: &std::path::Path) -> Self {
        let listener = tokio::net::UnixListener::bind(path).unwrap();
        let mut server = Self::start().await;
        server.handle.abort();

        let state = server.state.clone();
        server.handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                state.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, state.clone()));
            }
        });
        server
    }

    /// Serve over TLS with `config`, on the same routes.
    #[cfg(feature = "tls")]
    pub async fn start_tls(config: Arc<rustls::ServerConfig>) -> Self {
        let acceptor = tokio_rustls::TlsAcceptor::from(config);
        let mut server = Self::start().await;
        server.handle.abort();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.addr = listener.local_addr().unwrap();
        let state = server.state.clone();
        server.handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                state.accepted.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    if let Ok(stream) = acceptor.accept(stream).await {
                        serve(stream, state).await;
                    }
                });
            }
        });
        server
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// `host:port` as sent in the `Host` header.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Recorded {
        self.requests().pop().expect("no request recorded")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        state.accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(stream, state.clone()));
    }
}

async fn serve<S>(stream: S, state: Arc<State>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |req| handle(state.clone(), req));
    let _ = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

async fn handle(
    state: Arc<State>,
    req: http::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    state.requests.lock().unwrap().push(Recorded {
        method: parts.method.clone(),
        path: parts.uri.path().to_owned(),
        headers: parts.headers.clone(),
        body: body.clone(),
    });

    if let Some((user, passwd)) = &state.credentials {
        let expected = format!("Basic {}", STANDARD.encode(format!("{user}:{passwd}")));
        let given = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return Ok(error(
                StatusCode::UNAUTHORIZED,
                11,
                "not authorized to execute this request",
            ));
        }
    }

    let (database, route) = split_database(parts.uri.path());

    let response = match (&parts.method, route.as_str()) {
        (&Method::GET, "/_api/version") => json(
            StatusCode::OK,
            r#"{"server":"docdb","version":"3.11.0","license":"community"}"#.to_owned(),
        ),
        (&Method::HEAD, "/_api/version") => json(StatusCode::OK, String::new()),
        (&Method::GET, "/_admin/sleep") => {
            let seconds = parts
                .uri
                .query()
                .and_then(|query| query.strip_prefix("duration="))
                .and_then(|value| value.parse::<f64>().ok())
                .unwrap_or(0.0);
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            json(StatusCode::OK, r#"{"result":true}"#.to_owned())
        }
        (&Method::POST, "/_api/collection") => {
            let document: serde_json::Value =
                serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
            json(
                StatusCode::OK,
                serde_json::json!({ "name": document["name"], "database": database }).to_string(),
            )
        }
        (&Method::DELETE, route) if route.starts_with("/_api/collection/") => {
            json(StatusCode::OK, r#"{"error":false,"code":200}"#.to_owned())
        }
        (method, "/_api/echo") => json(
            StatusCode::OK,
            serde_json::json!({
                "method": method.as_str(),
                "database": database,
                "body": String::from_utf8_lossy(&body),
            })
            .to_string(),
        ),
        _ => error(StatusCode::NOT_FOUND, 1203, "collection or view not found"),
    };

    Ok(response)
}

fn split_database(path: &str) -> (String, String) {
    match path.strip_prefix("/_db/") {
        Some(rest) => match rest.split_once('/') {
            Some((database, route)) => (database.to_owned(), format!("/{route}")),
            None => (rest.to_owned(), "/".to_owned()),
        },
        None => ("_system".to_owned(), path.to_owned()),
    }
}

fn json(status: StatusCode, body: String) -> http::Response<Full<Bytes>> {
    http::Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn error(status: StatusCode, error_num: i64, message: &str) -> http::Response<Full<Bytes>> {
    json(
        status,
        serde_json::json!({
            "error": true,
            "code": status.as_u16(),
            "errorNum": error_num,
            "errorMessage": message,
        })
        .to_string(),
    )
}

/// A raw HTTP/1.1 server whose first connection answers one request and then
/// hangs up on the second after reading it. Later connections answer every
/// request.
#[derive(Debug)]
pub struct FlakyServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FlakyServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let index = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = serve_flaky(stream, index == 0).await;
                });
            }
        });

        Self {
            addr,
            accepted,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Host header value for requests to this server.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FlakyServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_flaky(stream: TcpStream, hang_up_on_second: bool) -> Result<(), BoxError> {
    let mut stream = BufReader::new(stream);
    let mut served = 0;

    loop {
        let mut content_length = 0usize;
        let mut line = String::new();
        let mut saw_request = false;

        loop {
            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            saw_request = true;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some((name, value)) = trimmed.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse()?;
                }
            }
        }

        if !saw_request {
            return Ok(());
        }

        let mut body = vec![0; content_length];
        stream.read_exact(&mut body).await?;

        if hang_up_on_second && served == 1 {
            return Ok(());
        }

        let payload = r#"{"result":true}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            payload.len(),
            payload
        );
        stream.get_mut().write_all(response.as_bytes()).await?;
        served += 1;
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
