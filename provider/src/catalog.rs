//! Catalog metadata queries per dialect.
//!
//! Every query aliases its columns to the same lowercase names so the driver
//! can read the rows without knowing which dialect produced them. Counts are
//! always returned as 64-bit integers and flags as `0`/`1` integers.

use common::models::Dialect;
use common::{AppError, AppResult};

/// Catalog SQL for one dialect.
#[derive(Debug)]
pub struct CatalogQueries {
    /// Base tables: `table_schema`, `table_name`.
    pub tables: &'static str,
    /// Columns in ordinal order: `table_schema`, `table_name`, `column_name`,
    /// `data_type`, `is_nullable`.
    pub columns: &'static str,
    /// Primary-key columns: `table_schema`, `table_name`, `column_name`.
    pub primary_keys: &'static str,
    /// Foreign-key column pairs: `from_schema`, `from_table`, `from_column`,
    /// `to_schema`, `to_table`, `to_column`.
    pub foreign_keys: &'static str,
    /// Live user databases on the server: `database_count`.
    pub database_count: &'static str,
    /// Databases on the server: `name`, plus `table_count` when
    /// `databases_include_counts` is set.
    pub databases: &'static str,
    pub databases_include_counts: bool,
    /// Base tables in the connected database: `table_count`.
    pub table_count: &'static str,
}

impl CatalogQueries {
    /// Catalog SQL for `dialect`.
    ///
    /// # Errors
    /// `AppError::UnsupportedDialect` for dialects without a driver.
    pub fn for_dialect(dialect: Dialect) -> AppResult<&'static CatalogQueries> {
        match dialect {
            Dialect::Postgres => Ok(&POSTGRES),
            Dialect::MySql => Ok(&MYSQL),
            Dialect::Sqlite => Ok(&SQLITE),
            Dialect::SqlServer => Err(AppError::UnsupportedDialect(dialect.to_string())),
        }
    }
}

/// A base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// A primary-key member column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumnRow {
    pub schema: String,
    pub table: String,
    pub column: String,
}

/// One column pair of a foreign-key constraint. `to_column` is empty when
/// the constraint references the target's primary key implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRow {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: String,
}

/// Raw catalog rows read on one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub tables: Vec<TableRow>,
    pub columns: Vec<ColumnRow>,
    pub primary_keys: Vec<KeyColumnRow>,
    pub foreign_keys: Vec<ForeignKeyRow>,
}

static POSTGRES: CatalogQueries = CatalogQueries {
    tables: "SELECT table_schema::text AS table_schema, table_name::text AS table_name
             FROM information_schema.tables
             WHERE table_type = 'BASE TABLE'
               AND table_schema NOT IN ('pg_catalog', 'information_schema')
             ORDER BY table_schema, table_name",
    columns: "SELECT table_schema::text AS table_schema, table_name::text AS table_name,
                     column_name::text AS column_name, data_type::text AS data_type,
                     (CASE WHEN is_nullable = 'YES' THEN 1 ELSE 0 END)::bigint AS is_nullable
              FROM information_schema.columns
              WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
              ORDER BY table_schema, table_name, ordinal_position",
    primary_keys: "SELECT kcu.table_schema::text AS table_schema, kcu.table_name::text AS table_name,
                          kcu.column_name::text AS column_name
                   FROM information_schema.table_constraints tc
                   JOIN information_schema.key_column_usage kcu
                     ON tc.constraint_name = kcu.constraint_name
                    AND tc.constraint_schema = kcu.constraint_schema
                    AND tc.table_name = kcu.table_name
                   WHERE tc.constraint_type = 'PRIMARY KEY'
                   ORDER BY kcu.table_schema, kcu.table_name, kcu.ordinal_position",
    foreign_keys: "SELECT src_ns.nspname::text AS from_schema, src.relname::text AS from_table,
                          src_col.attname::text AS from_column, dst_ns.nspname::text AS to_schema,
                          dst.relname::text AS to_table, dst_col.attname::text AS to_column
                   FROM pg_constraint con
                   CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(src_attnum, dst_attnum)
                   JOIN pg_class src ON src.oid = con.conrelid
                   JOIN pg_namespace src_ns ON src_ns.oid = src.relnamespace
                   JOIN pg_attribute src_col ON src_col.attrelid = con.conrelid AND src_col.attnum = k.src_attnum
                   JOIN pg_class dst ON dst.oid = con.confrelid
                   JOIN pg_namespace dst_ns ON dst_ns.oid = dst.relnamespace
                   JOIN pg_attribute dst_col ON dst_col.attrelid = con.confrelid AND dst_col.attnum = k.dst_attnum
                   WHERE con.contype = 'f'
                   ORDER BY 1, 2, con.conname",
    database_count: "SELECT COUNT(*)::bigint AS database_count
                     FROM pg_database
                     WHERE NOT datistemplate AND datallowconn AND datname <> 'postgres'",
    databases: "SELECT datname::text AS name
                FROM pg_database
                WHERE NOT datistemplate AND datallowconn
                ORDER BY datname",
    databases_include_counts: false,
    table_count: "SELECT COUNT(*)::bigint AS table_count
                  FROM information_schema.tables
                  WHERE table_type = 'BASE TABLE'
                    AND table_schema NOT IN ('pg_catalog', 'information_schema')",
};

static MYSQL: CatalogQueries = CatalogQueries {
    tables: "SELECT CAST(TABLE_SCHEMA AS CHAR) AS table_schema, CAST(TABLE_NAME AS CHAR) AS table_name
             FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
             ORDER BY TABLE_SCHEMA, TABLE_NAME",
    columns: "SELECT CAST(TABLE_SCHEMA AS CHAR) AS table_schema, CAST(TABLE_NAME AS CHAR) AS table_name,
                     CAST(COLUMN_NAME AS CHAR) AS column_name, CAST(DATA_TYPE AS CHAR) AS data_type,
                     CAST(CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS SIGNED) AS is_nullable
              FROM information_schema.COLUMNS
              WHERE TABLE_SCHEMA = DATABASE()
              ORDER BY TABLE_NAME, ORDINAL_POSITION",
    primary_keys: "SELECT CAST(TABLE_SCHEMA AS CHAR) AS table_schema, CAST(TABLE_NAME AS CHAR) AS table_name,
                          CAST(COLUMN_NAME AS CHAR) AS column_name
                   FROM information_schema.KEY_COLUMN_USAGE
                   WHERE TABLE_SCHEMA = DATABASE() AND CONSTRAINT_NAME = 'PRIMARY'
                   ORDER BY TABLE_NAME, ORDINAL_POSITION",
    foreign_keys: "SELECT CAST(TABLE_SCHEMA AS CHAR) AS from_schema, CAST(TABLE_NAME AS CHAR) AS from_table,
                          CAST(COLUMN_NAME AS CHAR) AS from_column,
                          CAST(REFERENCED_TABLE_SCHEMA AS CHAR) AS to_schema,
                          CAST(REFERENCED_TABLE_NAME AS CHAR) AS to_table,
                          CAST(REFERENCED_COLUMN_NAME AS CHAR) AS to_column
                   FROM information_schema.KEY_COLUMN_USAGE
                   WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME IS NOT NULL
                   ORDER BY TABLE_NAME, CONSTRAINT_NAME, ORDINAL_POSITION",
    database_count: "SELECT COUNT(*) AS database_count
                     FROM information_schema.SCHEMATA
                     WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')",
    databases: "SELECT CAST(s.SCHEMA_NAME AS CHAR) AS name, COUNT(t.TABLE_NAME) AS table_count
                FROM information_schema.SCHEMATA s
                LEFT JOIN information_schema.TABLES t
                  ON s.SCHEMA_NAME = t.TABLE_SCHEMA AND t.TABLE_TYPE = 'BASE TABLE'
                WHERE s.SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
                GROUP BY s.SCHEMA_NAME
                ORDER BY s.SCHEMA_NAME",
    databases_include_counts: true,
    table_count: "SELECT COUNT(*) AS table_count
                  FROM information_schema.TABLES
                  WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'",
};

static SQLITE: CatalogQueries = CatalogQueries {
    tables: "SELECT 'main' AS table_schema, name AS table_name
             FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
    columns: "SELECT 'main' AS table_schema, m.name AS table_name, p.name AS column_name,
                     p.type AS data_type,
                     CASE WHEN p.\"notnull\" = 0 AND p.pk = 0 THEN 1 ELSE 0 END AS is_nullable
              FROM sqlite_master m
              JOIN pragma_table_info(m.name) p
              WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
              ORDER BY m.name, p.cid",
    primary_keys: "SELECT 'main' AS table_schema, m.name AS table_name, p.name AS column_name
                   FROM sqlite_master m
                   JOIN pragma_table_info(m.name) p
                   WHERE m.type = 'table' AND p.pk > 0
                   ORDER BY m.name, p.pk",
    foreign_keys: "SELECT 'main' AS from_schema, m.name AS from_table, f.\"from\" AS from_column,
                          'main' AS to_schema, f.\"table\" AS to_table,
                          COALESCE(f.\"to\", '') AS to_column
                   FROM sqlite_master m
                   JOIN pragma_foreign_key_list(m.name) f
                   WHERE m.type = 'table'
                   ORDER BY m.name, f.id, f.seq",
    database_count: "SELECT COUNT(*) AS database_count FROM pragma_database_list WHERE name <> 'temp'",
    databases: "SELECT 'main' AS name, COUNT(*) AS table_count
                FROM sqlite_master
                WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    databases_include_counts: true,
    table_count: "SELECT COUNT(*) AS table_count
                  FROM sqlite_master
                  WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
};
