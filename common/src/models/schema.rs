//! Relational schema snapshot models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Schema snapshot of one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaModel {
    /// Database name.
    pub database: String,
    /// Base tables, ordered by schema and name.
    pub tables: Vec<TableInfo>,
    /// Foreign-key relations.
    pub relations: Vec<RelationInfo>,
    /// When this snapshot entered the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at_utc: Option<DateTime<Utc>>,
}

impl SchemaModel {
    /// Snapshot of a database with no tables.
    pub fn empty(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Finds a table by schema and name (case-insensitive).
    pub fn table(&self, schema: &str, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.schema.eq_ignore_ascii_case(schema) && t.name.eq_ignore_ascii_case(name))
    }
}

/// A base table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Finds a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A table column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    /// Referenced table for foreign-key columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references_table: Option<String>,
    /// Referenced column for foreign-key columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references_column: Option<String>,
}

/// A foreign-key relation between two columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationInfo {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: String,
}

/// Persisted schema snapshots keyed by `server|database` (or `server`).
pub type SchemaCacheMap = BTreeMap<String, SchemaModel>;
