//! Application configuration.
//!
//! Loaded from environment variables. Every setting has a default, so
//! loading never fails; unparsable values are logged and replaced by the
//! default.
//!
//! | variable | default |
//! |---|---|
//! | `DBPROVIDER_DIALECT` | `postgres` |
//! | `DBPROVIDER_CACHE_DIR` | `<user cache dir>/db-provider` |
//! | `DBPROVIDER_CACHE_TTL_DAYS` | `7` |
//! | `DBPROVIDER_CONNECT_TIMEOUT_SECS` | `15` |
//! | `DBPROVIDER_INSTANCES_FILE` | `<cache dir>/instances.json` |
//! | `LOG_FORMAT` | `text` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::connection::Dialect;

/// Default cache validity window.
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 7;

/// Default connect timeout applied when a connection string does not set one.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Dialect served by this provider instance.
    pub dialect: Dialect,
    /// Root of the on-disk cache. Each dialect gets its own subdirectory.
    pub cache_dir: PathBuf,
    /// Cache validity window in days.
    pub cache_ttl_days: i64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Instance list read by the config-file server locator.
    pub instances_file: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        let cache_dir = default_cache_dir();
        Self {
            dialect: Dialect::Postgres,
            instances_file: cache_dir.join("instances.json"),
            cache_dir,
            cache_ttl_days: DEFAULT_CACHE_TTL_DAYS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let dialect = parse_or(&lookup, "DBPROVIDER_DIALECT", defaults.dialect);
        let cache_dir = lookup("DBPROVIDER_CACHE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);
        let instances_file = lookup("DBPROVIDER_INSTANCES_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("instances.json"));
        let cache_ttl_days = parse_or(&lookup, "DBPROVIDER_CACHE_TTL_DAYS", defaults.cache_ttl_days);
        let cache_ttl_days = if ttl_from_days(cache_ttl_days).is_some() {
            cache_ttl_days
        } else {
            tracing::warn!(
                key = "DBPROVIDER_CACHE_TTL_DAYS",
                value = cache_ttl_days,
                "Cache TTL must be a positive number of days, using default"
            );
            defaults.cache_ttl_days
        };
        let connect_timeout_secs = parse_or(
            &lookup,
            "DBPROVIDER_CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout_secs,
        );
        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            dialect,
            cache_dir,
            cache_ttl_days,
            connect_timeout_secs,
            instances_file,
            log_format,
        }
    }

    /// Cache validity window.
    ///
    /// Out-of-range values fall back to the default window.
    pub fn cache_ttl(&self) -> chrono::Duration {
        ttl_from_days(self.cache_ttl_days)
            .unwrap_or_else(|| chrono::Duration::days(DEFAULT_CACHE_TTL_DAYS))
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

/// A TTL of `days`, if positive and representable.
fn ttl_from_days(days: i64) -> Option<chrono::Duration> {
    (days > 0).then(|| chrono::Duration::try_days(days)).flatten()
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("db-provider")
}
