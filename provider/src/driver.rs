//! Database driver port.
//!
//! [`SqlDriver`] is the only place the provider performs database I/O.
//! [`SqlxDriver`] implements it on sqlx's `Any` driver for MySQL, PostgreSQL
//! and SQLite. Every call opens its own connection and closes it before
//! returning; dropping the future closes it as well.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::models::{ConnectionConfig, DatabaseInfo, Dialect, ExecutionResult, UNKNOWN_COUNT};
use common::{AppError, AppResult};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Column, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use url::Url;

use crate::catalog::{
    CatalogQueries, CatalogSnapshot, ColumnRow, ForeignKeyRow, KeyColumnRow, TableRow,
};
use crate::params::{BoundParameter, ParamValue};

/// Materialized result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Database I/O used by discovery, introspection and execution.
#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Dialect this driver speaks.
    fn dialect(&self) -> Dialect;

    /// Opens a connection and runs a trivial statement.
    async fn probe(&self, config: &ConnectionConfig) -> AppResult<()>;

    /// Counts live user databases on the server.
    async fn count_user_databases(&self, config: &ConnectionConfig) -> AppResult<i64>;

    /// Lists databases on the server with their table counts.
    async fn list_databases(&self, config: &ConnectionConfig) -> AppResult<Vec<DatabaseInfo>>;

    /// Reads tables, columns and keys of the connected database.
    async fn load_catalog(&self, config: &ConnectionConfig) -> AppResult<CatalogSnapshot>;

    /// Runs a statement that produces rows.
    async fn query(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<QueryOutput>;

    /// Runs a statement for its affected-row count.
    async fn execute(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<u64>;
}

/// [`SqlDriver`] on sqlx's `Any` driver.
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    dialect: Dialect,
}

impl SqlxDriver {
    pub fn new(dialect: Dialect) -> Self {
        sqlx::any::install_default_drivers();
        Self { dialect }
    }

    /// Opens a connection bounded by the configured connect timeout.
    async fn connect(&self, config: &ConnectionConfig) -> AppResult<AnyConnection> {
        let url = self.connection_url(config)?;
        let timeout = config.connect_timeout();

        match tokio::time::timeout(timeout, AnyConnection::connect(&url)).await {
            Ok(Ok(conn)) => {
                tracing::debug!(server = %config.server(), database = %config.database(), "Connection opened");
                Ok(conn)
            }
            Ok(Err(e)) => Err(connectivity_error(config, e)),
            Err(_) => Err(connectivity_error(
                config,
                format!("connect timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    fn queries(&self) -> AppResult<&'static CatalogQueries> {
        CatalogQueries::for_dialect(self.dialect)
    }

    // ============== URL Builders ==============

    fn connection_url(&self, config: &ConnectionConfig) -> AppResult<String> {
        match self.dialect {
            Dialect::MySql => build_network_url("mysql", self.dialect, config),
            Dialect::Postgres => build_network_url("postgres", self.dialect, config),
            Dialect::Sqlite => Ok(format!("sqlite:{}?mode=rw", encode_sqlite_path(config.server()))),
            Dialect::SqlServer => Err(AppError::UnsupportedDialect(self.dialect.to_string())),
        }
    }

    async fn count_tables(&self, config: &ConnectionConfig) -> AppResult<i64> {
        let queries = self.queries()?;
        let mut conn = self.connect(config).await?;
        let count = fetch_count(&mut conn, queries.table_count, "table_count")
            .await
            .map_err(|e| provider_error(config, e));
        close(conn).await;
        count
    }
}

#[async_trait]
impl SqlDriver for SqlxDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn probe(&self, config: &ConnectionConfig) -> AppResult<()> {
        let mut conn = self.connect(config).await?;
        let result = sqlx::query("SELECT 1")
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| connectivity_error(config, e));
        close(conn).await;
        result
    }

    async fn count_user_databases(&self, config: &ConnectionConfig) -> AppResult<i64> {
        let queries = self.queries()?;
        let mut conn = self.connect(config).await?;
        let count = fetch_count(&mut conn, queries.database_count, "database_count")
            .await
            .map_err(|e| provider_error(config, e));
        close(conn).await;
        count
    }

    async fn list_databases(&self, config: &ConnectionConfig) -> AppResult<Vec<DatabaseInfo>> {
        let queries = self.queries()?;
        let mut conn = self.connect(config).await?;
        let rows = sqlx::query(queries.databases)
            .fetch_all(&mut conn)
            .await
            .map_err(|e| provider_error(config, e));
        close(conn).await;
        let entries = rows?
            .iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let count = queries
                    .databases_include_counts
                    .then(|| row.try_get::<i64, _>("table_count").unwrap_or(UNKNOWN_COUNT));
                Ok((name, count))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| provider_error(config, e))?;

        let mut databases = Vec::with_capacity(entries.len());
        for (name, count) in entries {
            let table_count = match count {
                Some(count) => count,
                None => match self.count_tables(&config.with_database(&name)).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(database = %name, error = %e, "Table count unavailable");
                        UNKNOWN_COUNT
                    }
                },
            };
            databases.push(DatabaseInfo::new(name, table_count));
        }
        Ok(databases)
    }

    async fn load_catalog(&self, config: &ConnectionConfig) -> AppResult<CatalogSnapshot> {
        let queries = self.queries()?;
        let mut conn = self.connect(config).await?;
        let snapshot = read_catalog(&mut conn, queries)
            .await
            .map_err(|e| provider_error(config, e));
        close(conn).await;
        snapshot
    }

    async fn query(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<QueryOutput> {
        let mut conn = self.connect(config).await?;
        let output = fetch_table(&mut conn, sql, params)
            .await
            .map_err(|e| statement_error(config, e));
        close(conn).await;
        output
    }

    async fn execute(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<u64> {
        let mut conn = self.connect(config).await?;
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, p| bind_value(query, &p.value));
        let affected = query
            .execute(&mut conn)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| statement_error(config, e));
        close(conn).await;
        affected
    }
}

fn build_network_url(scheme: &str, dialect: Dialect, config: &ConnectionConfig) -> AppResult<String> {
    let invalid = |what: &str| AppError::Configuration(format!("invalid {} in connection for {}", what, config.server()));

    let mut url = Url::parse(&format!("{}://localhost", scheme))
        .map_err(|e| AppError::Configuration(e.to_string()))?;
    url.set_host(Some(&config.host())).map_err(|_| invalid("host"))?;
    if let Some(port) = config.port().or(dialect.default_port()) {
        url.set_port(Some(port)).map_err(|_| invalid("port"))?;
    }
    if let Some(user) = config.user_id() {
        url.set_username(user).map_err(|_| invalid("user"))?;
        url.set_password(config.password()).map_err(|_| invalid("password"))?;
    }
    if !config.database().is_empty() {
        url.set_path(&format!("/{}", config.database()));
    }
    Ok(url.into())
}

async fn close(conn: AnyConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Connection close failed");
    }
}

async fn fetch_count(conn: &mut AnyConnection, sql: &str, column: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(sql).fetch_one(&mut *conn).await?;
    row.try_get::<i64, _>(column)
}

async fn read_catalog(
    conn: &mut AnyConnection,
    queries: &CatalogQueries,
) -> Result<CatalogSnapshot, sqlx::Error> {
    let mut snapshot = CatalogSnapshot::default();

    for row in sqlx::query(queries.tables).fetch_all(&mut *conn).await? {
        snapshot.tables.push(TableRow {
            schema: row.try_get("table_schema")?,
            name: row.try_get("table_name")?,
        });
    }

    for row in sqlx::query(queries.columns).fetch_all(&mut *conn).await? {
        snapshot.columns.push(ColumnRow {
            schema: row.try_get("table_schema")?,
            table: row.try_get("table_name")?,
            name: row.try_get("column_name")?,
            data_type: row.try_get::<Option<String>, _>("data_type")?.unwrap_or_default(),
            is_nullable: row.try_get::<i64, _>("is_nullable")? != 0,
        });
    }

    for row in sqlx::query(queries.primary_keys).fetch_all(&mut *conn).await? {
        snapshot.primary_keys.push(KeyColumnRow {
            schema: row.try_get("table_schema")?,
            table: row.try_get("table_name")?,
            column: row.try_get("column_name")?,
        });
    }

    for row in sqlx::query(queries.foreign_keys).fetch_all(&mut *conn).await? {
        snapshot.foreign_keys.push(ForeignKeyRow {
            from_schema: row.try_get("from_schema")?,
            from_table: row.try_get("from_table")?,
            from_column: row.try_get("from_column")?,
            to_schema: row.try_get("to_schema")?,
            to_table: row.try_get("to_table")?,
            to_column: row.try_get("to_column")?,
        });
    }

    Ok(snapshot)
}

/// Prepares `sql`, binds `params` and streams every row.
///
/// Column names come from the prepared statement, so an empty result still
/// reports its columns.
async fn fetch_table(
    conn: &mut AnyConnection,
    sql: &str,
    params: &[BoundParameter],
) -> Result<QueryOutput, sqlx::Error> {
    let statement = (&mut *conn).prepare(sql).await?;
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let query = params
        .iter()
        .fold(statement.query(), |query, p| bind_value(query, &p.value));

    let mut stream = query.fetch(&mut *conn);
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        rows.push((0..row.len()).map(|i| decode_cell(&row, i)).collect());
    }
    Ok(QueryOutput { columns, rows })
}

/// Binds a typed value. The `Any` driver only carries integers, floats,
/// booleans, text and blobs; everything else travels as canonical text.
fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &ParamValue,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Int32(v) => query.bind(*v),
        ParamValue::Int64(v) => query.bind(*v),
        ParamValue::UInt64(v) => match i64::try_from(*v) {
            Ok(v) => query.bind(v),
            Err(_) => query.bind(v.to_string()),
        },
        ParamValue::Decimal(d) => query.bind(d.to_f64()),
        ParamValue::Double(v) => query.bind(*v),
        ParamValue::Boolean(v) => query.bind(*v),
        ParamValue::Binary(bytes) => query.bind(bytes.clone()),
        other => query.bind(other.to_text()),
    }
}

/// Converts one cell to JSON. NULL becomes `null`; blobs become base64.
fn decode_cell(row: &AnyRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::Bool(v);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Value::String(BASE64.encode(v));
    }
    let type_name = row.column(index).type_info().name().to_string();
    Value::String(format!("<unsupported {}>", type_name))
}

fn connectivity_error(config: &ConnectionConfig, message: impl ToString) -> AppError {
    AppError::Connectivity {
        server: config.server().to_string(),
        database: config.database().to_string(),
        message: message.to_string(),
    }
}

fn provider_error(config: &ConnectionConfig, e: sqlx::Error) -> AppError {
    AppError::Provider {
        server: config.server().to_string(),
        database: config.database().to_string(),
        message: e.to_string(),
    }
}

fn statement_error(config: &ConnectionConfig, e: sqlx::Error) -> AppError {
    let message = e.to_string();
    AppError::Execution {
        server: config.server().to_string(),
        database: config.database().to_string(),
        result: Box::new(ExecutionResult::failed(message.clone(), 0, None)),
        message,
    }
}

/// Percent-encodes each path segment so `?`, `#` and `%` in file names
/// survive URL parsing; the SQLite driver decodes the filename again.
fn encode_sqlite_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
