//! Connection configuration models.
//!
//! A [`ConnectionConfig`] is built per call from either a raw connection
//! string or an explicit `(server, database)` pair, and is never persisted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::errors::{AppError, AppResult};

/// Leading `scheme://` of a URL-style connection string.
static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("url scheme pattern is valid"));

/// SQL dialect implemented by a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum Dialect {
    /// Microsoft SQL Server.
    SqlServer,
    /// MySQL / MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
    /// SQLite (server = database file path).
    Sqlite,
}

impl Dialect {
    /// Lowercase identifier, also used as the cache directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "sqlserver",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Returns the default port for this dialect.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::SqlServer => Some(1433),
            Dialect::MySql => Some(3306),
            Dialect::Postgres => Some(5432),
            Dialect::Sqlite => None,
        }
    }

    /// Catalog every server of this dialect is expected to expose; used for probes.
    pub fn default_catalog(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "master",
            Dialect::MySql => "information_schema",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "main",
        }
    }

    /// Registry name of the default (unnamed) instance, when the platform has one.
    pub fn default_instance_name(&self) -> Option<&'static str> {
        match self {
            Dialect::SqlServer => Some("MSSQLSERVER"),
            _ => None,
        }
    }

    /// Named instance tried first by the fallback probe list.
    pub fn fallback_instance_name(&self) -> Option<&'static str> {
        match self {
            Dialect::SqlServer => Some("SQLEXPRESS"),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::SqlServer => write!(f, "SqlServer"),
            Dialect::MySql => write!(f, "MySql"),
            Dialect::Postgres => write!(f, "Postgres"),
            Dialect::Sqlite => write!(f, "Sqlite"),
        }
    }
}

impl FromStr for Dialect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlserver" | "mssql" | "tsql" => Ok(Dialect::SqlServer),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(AppError::Configuration(format!("unknown dialect `{}`", other))),
        }
    }
}

/// Immutable, validated connection parameters.
///
/// Invariant: `server` is never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    connection_string: String,
    server: String,
    database: String,
    connect_timeout: Duration,
    user_id: Option<String>,
    password: Option<String>,
    integrated_security: bool,
    port: Option<u16>,
}

/// Recognized connection-string keys, after synonym folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Server,
    Database,
    Timeout,
    User,
    Password,
    IntegratedSecurity,
    Port,
    Other,
}

impl Key {
    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "data source" | "server" | "address" | "addr" | "network address" => Key::Server,
            "initial catalog" | "database" => Key::Database,
            "connect timeout" | "connection timeout" | "timeout" => Key::Timeout,
            "user id" | "uid" | "user" | "username" | "user name" => Key::User,
            "password" | "pwd" => Key::Password,
            "integrated security" | "trusted_connection" => Key::IntegratedSecurity,
            "port" => Key::Port,
            _ => Key::Other,
        }
    }
}

impl ConnectionConfig {
    /// Parses a raw connection string.
    ///
    /// Accepts `key=value;` strings (values may be single- or double-quoted,
    /// doubled quotes escape) and URL strings such as
    /// `postgres://user:pw@host:5432/db`. An explicit `timeout` overrides any
    /// timeout in the string.
    ///
    /// # Errors
    /// `AppError::Configuration` if the string is blank, malformed, or has no
    /// data-source component.
    pub fn from_connection_string(s: &str, timeout: Option<Duration>) -> AppResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AppError::Configuration("connection string is required".into()));
        }
        if URL_SCHEME.is_match(s) || has_sqlite_scheme(s) {
            return Self::from_url(s, timeout);
        }

        let mut config = Self::empty(s.to_string());
        let mut timeout_from_string = None;

        for (name, value) in parse_pairs(s)? {
            match Key::from_name(&name) {
                Key::Server => config.server = value.trim().to_string(),
                Key::Database => config.database = value.trim().to_string(),
                Key::Timeout => {
                    let secs: u64 = value.trim().parse().map_err(|_| {
                        AppError::Configuration(format!("invalid connect timeout `{}`", value))
                    })?;
                    timeout_from_string = Some(Duration::from_secs(secs));
                }
                Key::User => config.user_id = non_blank(value),
                Key::Password => config.password = Some(value),
                Key::IntegratedSecurity => {
                    config.integrated_security = matches!(
                        value.trim().to_lowercase().as_str(),
                        "true" | "yes" | "sspi"
                    )
                }
                Key::Port => {
                    config.port = Some(value.trim().parse().map_err(|_| {
                        AppError::Configuration(format!("invalid port `{}`", value))
                    })?)
                }
                Key::Other => {}
            }
        }

        if config.server.is_empty() {
            return Err(AppError::Configuration(
                "connection string has no data source".into(),
            ));
        }
        config.connect_timeout = timeout
            .or(timeout_from_string)
            .unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
        Ok(config)
    }

    /// Builds an integrated-security configuration for `database` on `server`.
    ///
    /// # Errors
    /// `AppError::Configuration` if either argument is blank.
    pub fn from_server_database(
        server: &str,
        database: &str,
        timeout: Option<Duration>,
    ) -> AppResult<Self> {
        if database.trim().is_empty() {
            return Err(AppError::Configuration("database is required".into()));
        }
        Self::for_server(server, Some(database), timeout)
    }

    /// Builds an integrated-security configuration for `server`, optionally
    /// pinned to `catalog`. Used for probes and database listings.
    pub fn for_server(server: &str, catalog: Option<&str>, timeout: Option<Duration>) -> AppResult<Self> {
        let server = server.trim();
        if server.is_empty() {
            return Err(AppError::Configuration("server is required".into()));
        }

        let mut config = Self::empty(String::new());
        config.server = server.to_string();
        config.database = catalog.map(str::trim).unwrap_or_default().to_string();
        config.integrated_security = true;
        config.connect_timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
        config.connection_string = config.render();
        Ok(config)
    }

    /// Same credentials and server, different database.
    pub fn with_database(&self, database: &str) -> Self {
        let mut config = self.clone();
        config.database = database.trim().to_string();
        config.connection_string = config.render();
        config
    }

    fn from_url(s: &str, timeout: Option<Duration>) -> AppResult<Self> {
        let mut config = Self::empty(s.to_string());
        config.connect_timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));

        if has_sqlite_scheme(s) {
            let rest = &s["sqlite:".len()..];
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            let path = rest.split('?').next().unwrap_or_default().trim();
            if path.is_empty() {
                return Err(AppError::Configuration("sqlite url has no file path".into()));
            }
            config.server = path.to_string();
            return Ok(config);
        }

        let url = url::Url::parse(s)
            .map_err(|e| AppError::Configuration(format!("invalid connection url: {}", e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AppError::Configuration("connection url has no host".into()))?;

        config.server = host.to_string();
        config.port = url.port();
        config.database = url.path().trim_start_matches('/').to_string();
        config.user_id = non_blank(decode(url.username()));
        config.password = url.password().map(decode);
        config.integrated_security = config.user_id.is_none();
        Ok(config)
    }

    fn empty(connection_string: String) -> Self {
        Self {
            connection_string,
            server: String::new(),
            database: String::new(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_id: None,
            password: None,
            integrated_security: false,
            port: None,
        }
    }

    /// Renders the canonical `key=value;` form of this configuration.
    fn render(&self) -> String {
        let mut parts = vec![format!("Server={}", quote(&self.server))];
        if !self.database.is_empty() {
            parts.push(format!("Database={}", quote(&self.database)));
        }
        if let Some(port) = self.port {
            parts.push(format!("Port={}", port));
        }
        if let Some(user) = &self.user_id {
            parts.push(format!("User ID={}", quote(user)));
        }
        if let Some(password) = &self.password {
            parts.push(format!("Password={}", quote(password)));
        }
        if self.integrated_security {
            parts.push("Integrated Security=True".to_string());
        }
        parts.push(format!("Connect Timeout={}", self.connect_timeout.as_secs()));
        parts.join(";")
    }

    /// The raw connection string.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Server name, as given (`host[\instance][,port]` or a file path for SQLite).
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Database name; empty when the connection targets the server default.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Explicit user, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Explicit password, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Whether the connection relies on the platform identity.
    pub fn integrated_security(&self) -> bool {
        self.integrated_security
    }

    /// Network host with instance and port stripped; local aliases resolve to `localhost`.
    pub fn host(&self) -> String {
        let (host, _, _) = split_server(&self.server);
        match host.to_lowercase().as_str() {
            "." | "(local)" | "(localdb)" | "localhost" => "localhost".to_string(),
            _ => host.to_string(),
        }
    }

    /// Named instance part of the server, if any.
    pub fn instance(&self) -> Option<&str> {
        split_server(&self.server).1
    }

    /// Port from the `Port` key or the `host,port` server suffix.
    pub fn port(&self) -> Option<u16> {
        self.port.or_else(|| split_server(&self.server).2)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("integrated_security", &self.integrated_security)
            .finish()
    }
}

/// Splits `[tcp:]host[\instance][,port]`.
fn split_server(server: &str) -> (&str, Option<&str>, Option<u16>) {
    let server = server.trim();
    let server = match server.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("tcp:") => &server[4..],
        _ => server,
    };

    let (rest, port) = match server.rsplit_once(',') {
        Some((rest, port)) => match port.trim().parse::<u16>() {
            Ok(port) => (rest.trim(), Some(port)),
            Err(_) => (server, None),
        },
        None => (server, None),
    };

    match rest.split_once('\\') {
        Some((host, instance)) if !instance.is_empty() => (host, Some(instance), port),
        _ => (rest, None, port),
    }
}

/// Splits a `key=value;` string into raw pairs.
fn parse_pairs(s: &str) -> AppResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ';') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        let mut saw_equals = false;
        for c in chars.by_ref() {
            if c == '=' {
                saw_equals = true;
                break;
            }
            if c == ';' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if !saw_equals || key.is_empty() {
            return Err(AppError::Configuration(format!(
                "malformed connection string segment `{}`",
                key
            )));
        }

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        if chars.peek() == Some(&quote) {
                            chars.next();
                            value.push(quote);
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        value.push(c);
                    }
                }
                if !closed {
                    return Err(AppError::Configuration(format!(
                        "unterminated quoted value for `{}`",
                        key
                    )));
                }
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    if !c.is_whitespace() {
                        return Err(AppError::Configuration(format!(
                            "unexpected text after quoted value for `{}`",
                            key
                        )));
                    }
                }
            }
            _ => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value = value.trim().to_string();
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}

/// Quotes a value when it would not survive an unquoted round trip.
fn quote(value: &str) -> String {
    let needs_quotes = value.contains(';')
        || value.starts_with('"')
        || value.starts_with('\'')
        || value.trim() != value;
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn has_sqlite_scheme(s: &str) -> bool {
    s.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("sqlite:"))
}

/// Percent-decodes URL userinfo.
fn decode(value: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(value.as_bytes())).into_owned()
}
