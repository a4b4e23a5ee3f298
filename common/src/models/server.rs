//! Server and database listing models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::connection::Dialect;

/// Marker for counts that could not be determined.
pub const UNKNOWN_COUNT: i64 = -1;

/// A reachable (or at least registered) database server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name as used in connection strings (`machine` or `machine\instance`).
    pub name: String,
    /// Dialect served.
    pub dialect: Dialect,
    /// Number of live user databases, or `-1` when the probe failed.
    pub running_database_count: i64,
}

impl ServerInfo {
    /// Creates a new server entry.
    pub fn new(name: impl Into<String>, dialect: Dialect, running_database_count: i64) -> Self {
        Self {
            name: name.into(),
            dialect,
            running_database_count,
        }
    }

    /// Whether the database count is known.
    pub fn is_reachable(&self) -> bool {
        self.running_database_count != UNKNOWN_COUNT
    }
}

/// A database on a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Number of base tables, or `-1` when unknown.
    pub table_count: i64,
}

impl DatabaseInfo {
    /// Creates a new database entry.
    pub fn new(name: impl Into<String>, table_count: i64) -> Self {
        Self {
            name: name.into(),
            table_count,
        }
    }
}

/// Persisted server discovery result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CachedServers {
    /// When discovery ran.
    pub timestamp_utc: DateTime<Utc>,
    /// Discovered servers.
    pub servers: Vec<ServerInfo>,
}
