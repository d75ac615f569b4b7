use std::time::Duration;

use docdb_connection::{
    ClientErrorKind, Connection, Error, Method, OptionKey, OptionUpdate, OptionValue, Options,
    Request,
};
use http::header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use serde::Deserialize;

mod common;

use common::{closed_port, MockServer};

fn connect(server: &MockServer) -> Connection {
    let options = Options::builder(server.endpoint())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    Connection::new(options).unwrap()
}

#[derive(Debug, Deserialize)]
struct Version {
    server: String,
    version: String,
}

#[tokio::test]
async fn get_version() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let response = connection.get("/_api/version").await.unwrap();
    assert_eq!(response.http_code(), 200);
    let version: Version = response.json().unwrap();
    assert_eq!(version.server, "docdb");
    assert_eq!(version.version, "3.11.0");

    let request = server.last_request();
    assert_eq!(request.method, http::Method::GET);
    assert_eq!(request.path, "/_db/_system/_api/version");
    assert_eq!(request.headers[HOST], server.authority().as_str());
    assert_eq!(request.headers[CONNECTION], "Close");
    assert!(request.headers.contains_key(USER_AGENT));
    assert!(!request.headers.contains_key(AUTHORIZATION));
}

#[tokio::test]
async fn database_switch_applies_to_next_request() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    connection.set_database("foobar").unwrap();
    assert_eq!(connection.database(), "foobar");
    assert_eq!(
        connection.get_option(OptionKey::Database),
        OptionValue::Text("foobar".into())
    );

    let response = connection.get("/_api/echo").await.unwrap();
    let echo: serde_json::Value = response.json().unwrap();
    assert_eq!(echo["database"], "foobar");
    assert_eq!(server.last_request().path, "/_db/foobar/_api/echo");

    connection.set_database("_system").unwrap();
    connection.get("/_api/echo").await.unwrap();
    assert_eq!(server.last_request().path, "/_db/_system/_api/echo");
}

#[tokio::test]
async fn basic_auth_accepted() {
    let server = MockServer::with_credentials("root", "secret").await;
    let options = Options::builder(server.endpoint())
        .auth("root", "secret")
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    connection.get("/_api/version").await.unwrap();
    assert_eq!(
        server.last_request().headers[AUTHORIZATION],
        "Basic cm9vdDpzZWNyZXQ="
    );
}

#[tokio::test]
async fn invalid_credentials_are_a_server_error() {
    let server = MockServer::with_credentials("root", "secret").await;
    let options = Options::builder(server.endpoint())
        .auth("root", "wrong")
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    let error = connection.get("/_api/version").await.unwrap_err();
    assert_eq!(error.code(), Some(401));
    match error {
        Error::Server(error) => {
            assert_eq!(error.error_num(), Some(11));
            assert_eq!(error.message(), "not authorized to execute this request");
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[tokio::test]
async fn credentials_can_change_between_requests() {
    let server = MockServer::with_credentials("root", "secret").await;
    let mut connection = connect(&server);

    let error = connection.get("/_api/version").await.unwrap_err();
    assert_eq!(error.code(), Some(401));

    connection
        .set_option(OptionUpdate::AuthUser("root".into()))
        .unwrap();
    connection
        .set_option(OptionUpdate::AuthPasswd("secret".into()))
        .unwrap();
    connection.get("/_api/version").await.unwrap();
}

#[tokio::test]
async fn not_found_carries_server_error_number() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let error = connection.get("/_api/collection/missing").await.unwrap_err();
    assert_eq!(error.code(), Some(404));
    let Error::Server(error) = error else {
        panic!("expected a server error");
    };
    assert_eq!(error.error_num(), Some(1203));
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    let options = Options::builder(server.endpoint())
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    let error = connection
        .get("/_admin/sleep?duration=2")
        .await
        .unwrap_err();
    assert!(error.is_timeout(), "{error:?}");
    assert_eq!(error.code(), Some(408));
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn response_within_timeout_succeeds() {
    let server = MockServer::start().await;
    let options = Options::builder(server.endpoint())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    let response = connection.get("/_admin/sleep?duration=0.1").await.unwrap();
    assert_eq!(response.http_code(), 200);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn timeout_change_applies_to_next_request() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    connection
        .set_option(OptionUpdate::Timeout(Duration::from_millis(100)))
        .unwrap();
    let error = connection
        .get("/_admin/sleep?duration=1")
        .await
        .unwrap_err();
    assert!(error.is_timeout());

    connection
        .set_option(OptionUpdate::Timeout(Duration::from_secs(5)))
        .unwrap();
    connection.get("/_admin/sleep?duration=0.05").await.unwrap();
}

#[tokio::test]
async fn refused_connection_is_a_client_error() {
    let port = closed_port().await;
    let options = Options::builder(format!("tcp://127.0.0.1:{port}"))
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    let error = connection.get("/_api/version").await.unwrap_err();
    assert_eq!(error.code(), Some(503));
    match error {
        Error::Client(error) => assert_eq!(error.kind(), ClientErrorKind::Connect),
        other => panic!("expected a client error, got {other:?}"),
    }
}

#[tokio::test]
async fn fails_over_to_next_endpoint() {
    let server = MockServer::start().await;
    let port = closed_port().await;

    let options = Options::builder(format!("tcp://127.0.0.1:{port}"))
        .endpoint(server.endpoint())
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    connection.get("/_api/version").await.unwrap();
    assert_eq!(connection.endpoint().port(), Some(server.addr().port()));
    assert_eq!(server.last_request().headers[HOST], server.authority().as_str());
}

#[tokio::test]
async fn immutable_option_fails_without_network() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let error = connection
        .set_option(OptionUpdate::VerifyCert(true))
        .unwrap_err();
    assert!(matches!(error, Error::Configuration(_)));
    assert_eq!(error.code(), None);

    let error = connection
        .set_option(OptionUpdate::Endpoint("tcp://127.0.0.1:1".into()))
        .unwrap_err();
    assert!(matches!(error, Error::Configuration(_)));

    assert_eq!(server.accepted(), 0);
}

#[tokio::test]
async fn invalid_path_fails_without_network() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let error = connection.get("/_api/not a path").await.unwrap_err();
    assert!(matches!(error, Error::InvalidRequest(_)));
    assert_eq!(server.accepted(), 0);
}

#[tokio::test]
async fn body_headers() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let response = connection
        .post("/_api/collection", r#"{"name":"things"}"#)
        .await
        .unwrap();
    let created: serde_json::Value = response.json().unwrap();
    assert_eq!(created["name"], "things");

    let request = server.last_request();
    assert_eq!(request.headers[CONTENT_TYPE], "application/json");
    assert_eq!(request.headers[CONTENT_LENGTH], "17");
    assert_eq!(request.body.as_ref(), br#"{"name":"things"}"#);
}

#[tokio::test]
async fn every_verb_reaches_the_server() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    connection.get("/_api/echo").await.unwrap();
    connection.post("/_api/echo", "{}").await.unwrap();
    connection.put("/_api/echo", "{}").await.unwrap();
    connection.patch("/_api/echo", "{}").await.unwrap();
    connection.delete("/_api/echo").await.unwrap();
    let head = connection.head("/_api/version").await.unwrap();
    assert!(head.body().is_empty());

    let methods: Vec<_> = server
        .requests()
        .into_iter()
        .map(|request| request.method)
        .collect();
    assert_eq!(
        methods,
        vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
            http::Method::HEAD,
        ]
    );
}

#[tokio::test]
async fn call_with_caller_headers() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let mut headers = HeaderMap::new();
    headers.insert("x-docdb-async", HeaderValue::from_static("store"));

    let response = connection
        .call(Method::Put, "/_api/echo", headers, "payload")
        .await
        .unwrap();
    let echo: serde_json::Value = response.json().unwrap();
    assert_eq!(echo["method"], "PUT");
    assert_eq!(echo["body"], "payload");
    assert_eq!(server.last_request().headers["x-docdb-async"], "store");
}

#[tokio::test]
async fn batch_preserves_order() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let requests = (0..3).map(|n| Request::post("/_api/echo").with_body(format!("request {n}")));
    let responses = connection.batch(requests).await.unwrap();

    let bodies: Vec<String> = responses
        .iter()
        .map(|response| response.json::<serde_json::Value>().unwrap()["body"].to_string())
        .collect();
    assert_eq!(
        bodies,
        vec![
            "\"request 0\"".to_owned(),
            "\"request 1\"".to_owned(),
            "\"request 2\"".to_owned(),
        ]
    );
}

#[tokio::test]
async fn batch_stops_at_first_failure() {
    let server = MockServer::start().await;
    let mut connection = connect(&server);

    let requests = vec![
        Request::get("/_api/version"),
        Request::get("/_api/missing"),
        Request::get("/_api/version"),
    ];
    let error = connection.batch(requests).await.unwrap_err();
    assert_eq!(error.code(), Some(404));
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn options_from_json() {
    let server = MockServer::start().await;
    let options = Options::from_json(serde_json::json!({
        "endpoint": server.endpoint(),
        "timeout": 5,
        "connection": "Keep-Alive",
        "database": "foobar",
    }))
    .unwrap();
    let mut connection = Connection::new(options).unwrap();

    connection.get("/_api/version").await.unwrap();
    let request = server.last_request();
    assert_eq!(request.path, "/_db/foobar/_api/version");
    assert_eq!(request.headers[CONNECTION], "Keep-Alive");
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docdb.sock");
    let server = MockServer::start_unix(&path).await;

    let options = Options::builder(format!("unix://{}", path.display()))
        .connection(docdb_connection::ConnectionMode::KeepAlive)
        .build()
        .unwrap();
    let mut connection = Connection::new(options).unwrap();

    connection.get("/_api/version").await.unwrap();
    connection.get("/_api/version").await.unwrap();

    assert_eq!(server.accepted(), 1);
    assert_eq!(server.last_request().headers[HOST], "localhost");
    assert_eq!(connection.endpoint().path().map(|p| p.as_str()), path.to_str());
}
