//! Shared data models.

pub mod connection;
pub mod query;
pub mod schema;
pub mod server;

// Re-export commonly used types
pub use connection::{ConnectionConfig, Dialect};
pub use query::{ExecuteRequest, ExecutionMode, ExecutionResult, ParameterEcho};
pub use schema::{ColumnInfo, RelationInfo, SchemaCacheMap, SchemaModel, TableInfo};
pub use server::{CachedServers, DatabaseInfo, ServerInfo, UNKNOWN_COUNT};
