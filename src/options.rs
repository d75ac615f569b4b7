//! Connection options.
//!
//! [`Options`] is the validated configuration of a [`Connection`](crate::Connection).
//! Every option has a fixed [`Mutability`]: some may be changed at any time
//! through [`Options::set`], some are fixed once the options are built, and a
//! few are derived from other options and can only be read.
//!
//! Options are created through [`Options::builder`] or from a JSON object with
//! [`Options::from_json`], whose keys are the option names listed on
//! [`OptionKey`].
//!
//! ```
//! # use std::time::Duration;
//! # use docdb_connection::options::{ConnectionMode, OptionKey, OptionUpdate, OptionValue, Options};
//! let mut options = Options::builder("tcp://127.0.0.1:8529")
//!     .timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//!
//! options.set(OptionUpdate::Connection(ConnectionMode::KeepAlive)).unwrap();
//! assert_eq!(options.get(OptionKey::Connection), OptionValue::Mode(ConnectionMode::KeepAlive));
//!
//! // The endpoint is fixed once the options are built.
//! assert!(options.set(OptionUpdate::Endpoint("tcp://10.0.0.1:8529".into())).is_err());
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::trace::Tracer;

/// Database selected when none is configured.
pub const DEFAULT_DATABASE: &str = "_system";

/// Timeout applied to connecting and to reading a response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cipher selection that enables every suite the TLS provider supports.
pub const DEFAULT_CIPHERS: &str = "DEFAULT";

const MAX_DATABASE_NAME: usize = 64;

/// Errors raised while validating or mutating options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The option name is not recognized.
    #[error("unknown option `{0}`")]
    UnknownOption(String),

    /// The option cannot be changed once the options are built.
    #[error("option `{0}` cannot be changed after construction")]
    Immutable(OptionKey),

    /// The option is computed from other options and cannot be set.
    #[error("option `{0}` is derived from other options and cannot be set")]
    Derived(OptionKey),

    /// The value is out of range or of the wrong type.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The offending option.
        key: OptionKey,
        /// Why the value was rejected.
        reason: String,
    },

    /// An endpoint could not be parsed.
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint {
        /// The endpoint as given.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The options document is not a JSON object of the expected shape.
    #[error("malformed options: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: OptionKey, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}

/// Whether the socket is closed after each request or kept for the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionMode {
    /// Send `Connection: Close` and open a new socket per request.
    #[default]
    Close,

    /// Send `Connection: Keep-Alive` and reuse the socket across requests.
    KeepAlive,
}

impl ConnectionMode {
    /// The value sent in the `Connection` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Close => "Close",
            ConnectionMode::KeepAlive => "Keep-Alive",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("close") {
            Ok(ConnectionMode::Close)
        } else if s.eq_ignore_ascii_case("keep-alive") {
            Ok(ConnectionMode::KeepAlive)
        } else {
            Err(ConfigError::invalid(
                OptionKey::Connection,
                format!("expected `Close` or `Keep-Alive`, got `{s}`"),
            ))
        }
    }
}

/// HTTP authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum AuthType {
    /// `Authorization: Basic base64(user:password)`.
    #[default]
    Basic,
}

impl FromStr for AuthType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("basic") {
            Ok(AuthType::Basic)
        } else {
            Err(ConfigError::invalid(
                OptionKey::AuthType,
                format!("unsupported authentication type `{s}`"),
            ))
        }
    }
}

/// When an option may be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    /// May be changed at any time; takes effect with the next request.
    Mutable,

    /// Fixed once the options are built.
    Immutable,

    /// Read-only view computed from other options.
    Derived,
}

/// Names of the recognized options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// `endpoint`: one or more server endpoints.
    Endpoint,
    /// `host`: host of the first endpoint.
    Host,
    /// `port`: port of the first endpoint.
    Port,
    /// `timeout`: connect and read timeout.
    Timeout,
    /// `connection`: `Close` or `Keep-Alive`.
    Connection,
    /// `reconnect`: open a new socket for every request.
    Reconnect,
    /// `database`: database prefixed to every request path.
    Database,
    /// `verify_cert`: validate the server's certificate chain.
    VerifyCert,
    /// `allow_self_signed`: accept self-signed leaf certificates.
    AllowSelfSigned,
    /// `ciphers`: TLS cipher suite selection.
    Ciphers,
    /// `auth_type`: HTTP authentication scheme.
    AuthType,
    /// `auth_user`: user name for authentication.
    AuthUser,
    /// `auth_passwd`: password for authentication.
    AuthPasswd,
    /// `trace`: the tracer observing requests and responses.
    Trace,
    /// `enhanced_trace`: whether the tracer receives structured messages.
    EnhancedTrace,
    /// `retry_non_idempotent`: also retry non-idempotent requests on a dropped socket.
    RetryNonIdempotent,
}

impl OptionKey {
    /// Every recognized option.
    pub const ALL: [OptionKey; 16] = [
        OptionKey::Endpoint,
        OptionKey::Host,
        OptionKey::Port,
        OptionKey::Timeout,
        OptionKey::Connection,
        OptionKey::Reconnect,
        OptionKey::Database,
        OptionKey::VerifyCert,
        OptionKey::AllowSelfSigned,
        OptionKey::Ciphers,
        OptionKey::AuthType,
        OptionKey::AuthUser,
        OptionKey::AuthPasswd,
        OptionKey::Trace,
        OptionKey::EnhancedTrace,
        OptionKey::RetryNonIdempotent,
    ];

    /// The option's name.
    pub fn name(self) -> &'static str {
        match self {
            OptionKey::Endpoint => "endpoint",
            OptionKey::Host => "host",
            OptionKey::Port => "port",
            OptionKey::Timeout => "timeout",
            OptionKey::Connection => "connection",
            OptionKey::Reconnect => "reconnect",
            OptionKey::Database => "database",
            OptionKey::VerifyCert => "verify_cert",
            OptionKey::AllowSelfSigned => "allow_self_signed",
            OptionKey::Ciphers => "ciphers",
            OptionKey::AuthType => "auth_type",
            OptionKey::AuthUser => "auth_user",
            OptionKey::AuthPasswd => "auth_passwd",
            OptionKey::Trace => "trace",
            OptionKey::EnhancedTrace => "enhanced_trace",
            OptionKey::RetryNonIdempotent => "retry_non_idempotent",
        }
    }

    /// When this option may be changed.
    pub fn mutability(self) -> Mutability {
        match self {
            OptionKey::Endpoint
            | OptionKey::VerifyCert
            | OptionKey::AllowSelfSigned
            | OptionKey::Ciphers
            | OptionKey::AuthType => Mutability::Immutable,
            OptionKey::Host | OptionKey::Port | OptionKey::EnhancedTrace => Mutability::Derived,
            OptionKey::Timeout
            | OptionKey::Connection
            | OptionKey::Reconnect
            | OptionKey::Database
            | OptionKey::AuthUser
            | OptionKey::AuthPasswd
            | OptionKey::Trace
            | OptionKey::RetryNonIdempotent => Mutability::Mutable,
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptionKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OptionKey::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| ConfigError::UnknownOption(s.to_owned()))
    }
}

/// The current value of an option, as returned by [`Options::get`].
#[derive(Debug, Clone)]
pub enum OptionValue {
    /// Endpoint list.
    Endpoints(Vec<Endpoint>),
    /// Text options: host, database, ciphers, credentials.
    Text(String),
    /// Port of the first endpoint, `None` for Unix-domain sockets.
    Port(Option<u16>),
    /// Timeout.
    Timeout(Duration),
    /// Connection mode.
    Mode(ConnectionMode),
    /// Boolean options.
    Flag(bool),
    /// Authentication scheme.
    Auth(AuthType),
    /// The configured tracer, if any.
    Tracer(Option<Tracer>),
}

impl PartialEq for OptionValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OptionValue::Endpoints(a), OptionValue::Endpoints(b)) => a == b,
            (OptionValue::Text(a), OptionValue::Text(b)) => a == b,
            (OptionValue::Port(a), OptionValue::Port(b)) => a == b,
            (OptionValue::Timeout(a), OptionValue::Timeout(b)) => a == b,
            (OptionValue::Mode(a), OptionValue::Mode(b)) => a == b,
            (OptionValue::Flag(a), OptionValue::Flag(b)) => a == b,
            (OptionValue::Auth(a), OptionValue::Auth(b)) => a == b,
            (OptionValue::Tracer(a), OptionValue::Tracer(b)) => match (a, b) {
                (Some(a), Some(b)) => a.same(b),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// A typed change to one option, applied with [`Options::set`].
#[derive(Debug, Clone)]
pub enum OptionUpdate {
    /// Replace the endpoint. Always rejected after construction.
    Endpoint(String),
    /// Replace the host. Always rejected.
    Host(String),
    /// Replace the port. Always rejected.
    Port(u16),
    /// Set the connect and read timeout.
    Timeout(Duration),
    /// Set the connection mode.
    Connection(ConnectionMode),
    /// Force a fresh socket per request.
    Reconnect(bool),
    /// Select the database.
    Database(String),
    /// Change certificate verification. Always rejected after construction.
    VerifyCert(bool),
    /// Change self-signed acceptance. Always rejected after construction.
    AllowSelfSigned(bool),
    /// Change the cipher selection. Always rejected after construction.
    Ciphers(String),
    /// Change the authentication scheme. Always rejected after construction.
    AuthType(AuthType),
    /// Set the user name.
    AuthUser(String),
    /// Set the password.
    AuthPasswd(String),
    /// Install or remove the tracer.
    Trace(Option<Tracer>),
    /// Switch the tracer mode. Always rejected: the mode follows the tracer.
    EnhancedTrace(bool),
    /// Allow the dropped-socket retry for non-idempotent methods.
    RetryNonIdempotent(bool),
}

impl OptionUpdate {
    /// The option this update targets.
    pub fn key(&self) -> OptionKey {
        match self {
            OptionUpdate::Endpoint(_) => OptionKey::Endpoint,
            OptionUpdate::Host(_) => OptionKey::Host,
            OptionUpdate::Port(_) => OptionKey::Port,
            OptionUpdate::Timeout(_) => OptionKey::Timeout,
            OptionUpdate::Connection(_) => OptionKey::Connection,
            OptionUpdate::Reconnect(_) => OptionKey::Reconnect,
            OptionUpdate::Database(_) => OptionKey::Database,
            OptionUpdate::VerifyCert(_) => OptionKey::VerifyCert,
            OptionUpdate::AllowSelfSigned(_) => OptionKey::AllowSelfSigned,
            OptionUpdate::Ciphers(_) => OptionKey::Ciphers,
            OptionUpdate::AuthType(_) => OptionKey::AuthType,
            OptionUpdate::AuthUser(_) => OptionKey::AuthUser,
            OptionUpdate::AuthPasswd(_) => OptionKey::AuthPasswd,
            OptionUpdate::Trace(_) => OptionKey::Trace,
            OptionUpdate::EnhancedTrace(_) => OptionKey::EnhancedTrace,
            OptionUpdate::RetryNonIdempotent(_) => OptionKey::RetryNonIdempotent,
        }
    }
}

/// Validated connection options.
#[derive(Clone)]
pub struct Options {
    endpoints: Vec<Endpoint>,
    timeout: Duration,
    connection: ConnectionMode,
    reconnect: bool,
    database: String,
    verify_cert: bool,
    allow_self_signed: bool,
    ciphers: String,
    auth_type: AuthType,
    auth_user: String,
    auth_passwd: String,
    tracer: Option<Tracer>,
    retry_non_idempotent: bool,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .field("connection", &self.connection)
            .field("reconnect", &self.reconnect)
            .field("database", &self.database)
            .field("verify_cert", &self.verify_cert)
            .field("allow_self_signed", &self.allow_self_signed)
            .field("ciphers", &self.ciphers)
            .field("auth_type", &self.auth_type)
            .field("auth_user", &self.auth_user)
            .field("auth_passwd", &"<redacted>")
            .field("tracer", &self.tracer)
            .field("retry_non_idempotent", &self.retry_non_idempotent)
            .finish()
    }
}

impl Options {
    /// Start building options for the given endpoint.
    pub fn builder(endpoint: impl Into<String>) -> OptionsBuilder {
        OptionsBuilder::new(endpoint)
    }

    /// Build options from a JSON object keyed by option name.
    ///
    /// `endpoint` may be a string or an array of strings. `host` and `port` may
    /// stand in for `endpoint`, or must agree with it. `trace` cannot be
    /// expressed in JSON and is rejected, as is any unknown key.
    pub fn from_json(document: serde_json::Value) -> Result<Self, ConfigError> {
        let object = document
            .as_object()
            .ok_or_else(|| ConfigError::Malformed("expected a JSON object".into()))?;

        for key in object.keys() {
            let key: OptionKey = key.parse()?;
            if matches!(key, OptionKey::Trace | OptionKey::EnhancedTrace) {
                return Err(ConfigError::invalid(key, "tracers cannot be configured from JSON"));
            }
        }

        let raw: RawOptions = serde_json::from_value(document)
            .map_err(|error| ConfigError::Malformed(error.to_string()))?;
        raw.into_builder()?.build()
    }

    /// Read the current value of an option.
    pub fn get(&self, key: OptionKey) -> OptionValue {
        match key {
            OptionKey::Endpoint => OptionValue::Endpoints(self.endpoints.clone()),
            OptionKey::Host => OptionValue::Text(self.host().to_owned()),
            OptionKey::Port => OptionValue::Port(self.port()),
            OptionKey::Timeout => OptionValue::Timeout(self.timeout),
            OptionKey::Connection => OptionValue::Mode(self.connection),
            OptionKey::Reconnect => OptionValue::Flag(self.reconnect),
            OptionKey::Database => OptionValue::Text(self.database.clone()),
            OptionKey::VerifyCert => OptionValue::Flag(self.verify_cert),
            OptionKey::AllowSelfSigned => OptionValue::Flag(self.allow_self_signed),
            OptionKey::Ciphers => OptionValue::Text(self.ciphers.clone()),
            OptionKey::AuthType => OptionValue::Auth(self.auth_type),
            OptionKey::AuthUser => OptionValue::Text(self.auth_user.clone()),
            OptionKey::AuthPasswd => OptionValue::Text(self.auth_passwd.clone()),
            OptionKey::Trace => OptionValue::Tracer(self.tracer.clone()),
            OptionKey::EnhancedTrace => OptionValue::Flag(self.enhanced_trace()),
            OptionKey::RetryNonIdempotent => OptionValue::Flag(self.retry_non_idempotent),
        }
    }

    /// Apply a change to a mutable option.
    ///
    /// Fails without changing anything if the option is immutable or derived,
    /// whatever the value, or if the value is invalid.
    pub fn set(&mut self, update: OptionUpdate) -> Result<(), ConfigError> {
        match update {
            OptionUpdate::Timeout(timeout) => self.timeout = validate_timeout(timeout)?,
            OptionUpdate::Connection(mode) => self.connection = mode,
            OptionUpdate::Reconnect(reconnect) => self.reconnect = reconnect,
            OptionUpdate::Database(database) => self.database = validate_database(database)?,
            OptionUpdate::AuthUser(user) => self.auth_user = validate_user(user)?,
            OptionUpdate::AuthPasswd(passwd) => self.auth_passwd = passwd,
            OptionUpdate::Trace(tracer) => self.tracer = tracer,
            OptionUpdate::RetryNonIdempotent(retry) => self.retry_non_idempotent = retry,
            fixed => {
                let key = fixed.key();
                return Err(match key.mutability() {
                    Mutability::Derived => ConfigError::Derived(key),
                    _ => ConfigError::Immutable(key),
                });
            }
        }

        Ok(())
    }

    /// Configured endpoints, in failover order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Host of the first endpoint.
    pub fn host(&self) -> &str {
        self.endpoints[0].host()
    }

    /// Port of the first endpoint, `None` for Unix-domain sockets.
    pub fn port(&self) -> Option<u16> {
        self.endpoints[0].port()
    }

    /// Connect and read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connection mode.
    pub fn connection(&self) -> ConnectionMode {
        self.connection
    }

    /// Whether a fresh socket is opened for every request.
    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    /// Selected database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether the server's certificate chain is validated.
    pub fn verify_cert(&self) -> bool {
        self.verify_cert
    }

    /// Whether self-signed leaf certificates are accepted.
    pub fn allow_self_signed(&self) -> bool {
        self.allow_self_signed
    }

    /// TLS cipher suite selection.
    pub fn ciphers(&self) -> &str {
        &self.ciphers
    }

    /// Authentication scheme.
    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// Credentials, when a user name is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.auth_user.is_empty() {
            None
        } else {
            Some((&self.auth_user, &self.auth_passwd))
        }
    }

    /// The configured tracer.
    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Whether the tracer receives structured messages.
    pub fn enhanced_trace(&self) -> bool {
        self.tracer.as_ref().is_some_and(Tracer::is_enhanced)
    }

    /// Whether non-idempotent requests are also retried on a dropped socket.
    pub fn retry_non_idempotent(&self) -> bool {
        self.retry_non_idempotent
    }

    /// Whether the socket should be kept for the next request.
    pub fn reuses_socket(&self) -> bool {
        self.connection == ConnectionMode::KeepAlive && !self.reconnect
    }
}

/// Builder for [`Options`].
#[derive(Debug)]
pub struct OptionsBuilder {
    endpoints: Vec<String>,
    timeout: Duration,
    connection: ConnectionMode,
    reconnect: bool,
    database: String,
    verify_cert: bool,
    allow_self_signed: bool,
    ciphers: String,
    auth_type: AuthType,
    auth_user: String,
    auth_passwd: String,
    tracer: Option<Tracer>,
    retry_non_idempotent: bool,
}

impl OptionsBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            timeout: DEFAULT_TIMEOUT,
            connection: ConnectionMode::default(),
            reconnect: false,
            database: DEFAULT_DATABASE.to_owned(),
            verify_cert: false,
            allow_self_signed: true,
            ciphers: DEFAULT_CIPHERS.to_owned(),
            auth_type: AuthType::default(),
            auth_user: String::new(),
            auth_passwd: String::new(),
            tracer: None,
            retry_non_idempotent: false,
        }
    }

    /// Add a failover endpoint, tried after the ones already configured.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Set the connect and read timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connection mode.
    pub fn connection(mut self, mode: ConnectionMode) -> Self {
        self.connection = mode;
        self
    }

    /// Force a fresh socket per request.
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Select the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Validate the server's certificate chain.
    pub fn verify_cert(mut self, verify: bool) -> Self {
        self.verify_cert = verify;
        self
    }

    /// Accept self-signed leaf certificates.
    pub fn allow_self_signed(mut self, allow: bool) -> Self {
        self.allow_self_signed = allow;
        self
    }

    /// Select TLS cipher suites.
    pub fn ciphers(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphers = ciphers.into();
        self
    }

    /// Set the authentication scheme.
    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// Set the credentials.
    pub fn auth(mut self, user: impl Into<String>, passwd: impl Into<String>) -> Self {
        self.auth_user = user.into();
        self.auth_passwd = passwd.into();
        self
    }

    /// Install a tracer.
    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Allow the dropped-socket retry for non-idempotent methods.
    pub fn retry_non_idempotent(mut self, retry: bool) -> Self {
        self.retry_non_idempotent = retry;
        self
    }

    /// Validate every option and build.
    pub fn build(self) -> Result<Options, ConfigError> {
        let endpoints = self
            .endpoints
            .iter()
            .map(|endpoint| endpoint.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(not(feature = "tls"))]
        if let Some(endpoint) = endpoints.iter().find(|endpoint| endpoint.is_tls()) {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "TLS support is not enabled".into(),
            });
        }

        if self.ciphers.trim().is_empty() {
            return Err(ConfigError::invalid(OptionKey::Ciphers, "must not be empty"));
        }

        #[cfg(feature = "tls")]
        crate::transport::tls::validate_ciphers(&self.ciphers)?;

        Ok(Options {
            endpoints,
            timeout: validate_timeout(self.timeout)?,
            connection: self.connection,
            reconnect: self.reconnect,
            database: validate_database(self.database)?,
            verify_cert: self.verify_cert,
            allow_self_signed: self.allow_self_signed,
            ciphers: self.ciphers,
            auth_type: self.auth_type,
            auth_user: validate_user(self.auth_user)?,
            auth_passwd: self.auth_passwd,
            tracer: self.tracer,
            retry_non_idempotent: self.retry_non_idempotent,
        })
    }
}

fn validate_timeout(timeout: Duration) -> Result<Duration, ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::invalid(OptionKey::Timeout, "must be positive"));
    }
    Ok(timeout)
}

fn validate_database(name: String) -> Result<String, ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    };

    if !valid || name.len() > MAX_DATABASE_NAME {
        return Err(ConfigError::invalid(
            OptionKey::Database,
            format!("`{name}` is not a valid database name"),
        ));
    }
    Ok(name)
}

fn validate_user(user: String) -> Result<String, ConfigError> {
    if user.contains(':') {
        return Err(ConfigError::invalid(OptionKey::AuthUser, "must not contain `:`"));
    }
    Ok(user)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEndpoints {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawOptions {
    endpoint: Option<RawEndpoints>,
    host: Option<String>,
    port: Option<u16>,
    timeout: Option<f64>,
    connection: Option<String>,
    reconnect: Option<bool>,
    database: Option<String>,
    verify_cert: Option<bool>,
    allow_self_signed: Option<bool>,
    ciphers: Option<String>,
    auth_type: Option<String>,
    auth_user: Option<String>,
    auth_passwd: Option<String>,
    retry_non_idempotent: Option<bool>,
}

impl RawOptions {
    fn into_builder(self) -> Result<OptionsBuilder, ConfigError> {
        let mut endpoints = match self.endpoint {
            Some(RawEndpoints::One(endpoint)) => vec![endpoint],
            Some(RawEndpoints::Many(endpoints)) => endpoints,
            None => match (&self.host, self.port) {
                (Some(host), Some(port)) => vec![format!("tcp://{host}:{port}")],
                (Some(host), None) => vec![format!("tcp://{host}")],
                (None, _) => {
                    return Err(ConfigError::invalid(OptionKey::Endpoint, "no endpoint given"))
                }
            },
        }
        .into_iter();

        let first = endpoints
            .next()
            .ok_or_else(|| ConfigError::invalid(OptionKey::Endpoint, "no endpoint given"))?;

        let primary: Endpoint = first.parse()?;
        if let Some(host) = &self.host {
            if host != primary.host() {
                return Err(ConfigError::invalid(
                    OptionKey::Host,
                    format!("`{host}` does not match endpoint `{primary}`"),
                ));
            }
        }
        if let Some(port) = self.port {
            if Some(port) != primary.port() {
                return Err(ConfigError::invalid(
                    OptionKey::Port,
                    format!("{port} does not match endpoint `{primary}`"),
                ));
            }
        }

        let mut builder = OptionsBuilder::new(first);
        for endpoint in endpoints {
            builder = builder.endpoint(endpoint);
        }

        if let Some(seconds) = self.timeout {
            let timeout = Duration::try_from_secs_f64(seconds)
                .map_err(|error| ConfigError::invalid(OptionKey::Timeout, error.to_string()))?;
            builder = builder.timeout(timeout);
        }
        if let Some(mode) = self.connection {
            builder = builder.connection(mode.parse()?);
        }
        if let Some(reconnect) = self.reconnect {
            builder = builder.reconnect(reconnect);
        }
        if let Some(database) = self.database {
            builder = builder.database(database);
        }
        if let Some(verify) = self.verify_cert {
            builder = builder.verify_cert(verify);
        }
        if let Some(allow) = self.allow_self_signed {
            builder = builder.allow_self_signed(allow);
        }
        if let Some(ciphers) = self.ciphers {
            builder = builder.ciphers(ciphers);
        }
        if let Some(auth_type) = self.auth_type {
            builder = builder.auth_type(auth_type.parse()?);
        }
        builder.auth_user = self.auth_user.unwrap_or_default();
        builder.auth_passwd = self.auth_passwd.unwrap_or_default();
        if let Some(retry) = self.retry_non_idempotent {
            builder = builder.retry_non_idempotent(retry);
        }

        Ok(builder)
    }
}
