//! Schema introspection with a read-through cache.
//!
//! Snapshots live in the dialect's `schemas.json`, keyed by
//! `server|database` (or `server` alone when no database is set). Each entry
//! carries its own `cachedAtUtc` stamp and expires individually.

use std::collections::HashMap;
use std::sync::Arc;

use common::models::{
    ColumnInfo, ConnectionConfig, RelationInfo, SchemaCacheMap, SchemaModel, TableInfo,
};
use common::{AppError, AppResult};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::catalog::CatalogSnapshot;
use crate::driver::SqlDriver;
use crate::run_cancellable;

pub const SCHEMA_CACHE_FILE: &str = "schemas.json";

/// Loads and caches relational schemas.
pub struct SchemaIntrospector {
    driver: Arc<dyn SqlDriver>,
    cache: CacheManager,
}

impl SchemaIntrospector {
    pub fn new(driver: Arc<dyn SqlDriver>, cache: CacheManager) -> Self {
        Self { driver, cache }
    }

    /// Cache key for `config`.
    pub fn cache_key(config: &ConnectionConfig) -> String {
        if config.database().trim().is_empty() {
            config.server().to_string()
        } else {
            format!("{}|{}", config.server(), config.database())
        }
    }

    /// Reads the catalog of the connected database, bypassing the cache.
    ///
    /// # Errors
    /// `AppError::Provider` carrying the server, database and cause;
    /// `AppError::Cancelled` if `ct` fires.
    pub async fn load(&self, config: &ConnectionConfig, ct: &CancellationToken) -> AppResult<SchemaModel> {
        let snapshot = run_cancellable(ct, self.driver.load_catalog(config))
            .await
            .map_err(|e| into_provider_error(config, e))?;
        Ok(assemble(config.database(), snapshot))
    }

    /// Returns the cached snapshot for `config`, loading it on a miss.
    ///
    /// # Arguments
    /// * `force_refresh` - Skip the cache and reload from the catalog.
    ///
    /// # Errors
    /// Same as [`load`](Self::load). Cache write failures are logged only.
    pub async fn get_schema(
        &self,
        config: &ConnectionConfig,
        force_refresh: bool,
        ct: &CancellationToken,
    ) -> AppResult<SchemaModel> {
        let key = Self::cache_key(config);

        if !force_refresh {
            if let Some(model) = self.cached(&key).await {
                tracing::debug!(key = %key, "Schema cache hit");
                return Ok(model);
            }
        }

        let mut model = self.load(config, ct).await?;
        model.cached_at_utc = Some(self.cache.now());
        tracing::info!(
            key = %key,
            tables = model.tables.len(),
            relations = model.relations.len(),
            "Schema loaded"
        );

        let entry = model.clone();
        let cache = self.cache.clone();
        let stored = self
            .cache
            .update::<SchemaCacheMap, _>(SCHEMA_CACHE_FILE, move |current| {
                let mut map = current.unwrap_or_default();
                map.retain(|_, m| m.cached_at_utc.is_some_and(|t| cache.is_fresh(t)));
                map.insert(key, entry);
                map
            })
            .await;
        if let Err(e) = stored {
            tracing::warn!(error = %e, "Schema cache write failed");
        }

        Ok(model)
    }

    /// Forces a reload of the snapshot for `config`.
    pub async fn refresh(&self, config: &ConnectionConfig, ct: &CancellationToken) -> AppResult<SchemaModel> {
        self.get_schema(config, true, ct).await
    }

    async fn cached(&self, key: &str) -> Option<SchemaModel> {
        let mut map = self.cache.load::<SchemaCacheMap>(SCHEMA_CACHE_FILE).await?;
        let model = map.remove(key)?;
        match model.cached_at_utc {
            Some(stamped) if self.cache.is_fresh(stamped) => Some(model),
            _ => {
                tracing::debug!(key = %key, "Schema cache entry expired");
                None
            }
        }
    }
}

fn into_provider_error(config: &ConnectionConfig, e: AppError) -> AppError {
    match e {
        AppError::Cancelled | AppError::Provider { .. } | AppError::UnsupportedDialect(_) => e,
        other => AppError::Provider {
            server: config.server().to_string(),
            database: config.database().to_string(),
            message: other.to_string(),
        },
    }
}

type TableKey = (String, String);

fn table_key(schema: &str, name: &str) -> TableKey {
    (schema.to_lowercase(), name.to_lowercase())
}

/// Builds a schema model from raw catalog rows.
///
/// Columns of tables not listed as base tables are dropped. A foreign key
/// with no explicit target column points at the target's first primary-key
/// column.
pub fn assemble(database: &str, snapshot: CatalogSnapshot) -> SchemaModel {
    let mut tables: Vec<TableInfo> = Vec::with_capacity(snapshot.tables.len());
    let mut index: HashMap<TableKey, usize> = HashMap::new();

    for table in snapshot.tables {
        index.insert(table_key(&table.schema, &table.name), tables.len());
        tables.push(TableInfo {
            schema: table.schema,
            name: table.name,
            columns: Vec::new(),
        });
    }

    for column in snapshot.columns {
        if let Some(&i) = index.get(&table_key(&column.schema, &column.table)) {
            tables[i].columns.push(ColumnInfo {
                name: column.name,
                data_type: column.data_type,
                is_nullable: column.is_nullable,
                ..Default::default()
            });
        }
    }

    for key in snapshot.primary_keys {
        if let Some(column) = column_mut(&mut tables, &index, &key.schema, &key.table, &key.column) {
            column.is_primary_key = true;
        }
    }

    let mut relations = Vec::with_capacity(snapshot.foreign_keys.len());
    for fk in snapshot.foreign_keys {
        let to_column = if fk.to_column.is_empty() {
            primary_key_of(&tables, &index, &fk.to_schema, &fk.to_table).unwrap_or_default()
        } else {
            fk.to_column
        };

        if let Some(column) = column_mut(&mut tables, &index, &fk.from_schema, &fk.from_table, &fk.from_column) {
            column.is_foreign_key = true;
            column.references_table = Some(fk.to_table.clone());
            column.references_column = Some(to_column.clone());
        }

        relations.push(RelationInfo {
            from_schema: fk.from_schema,
            from_table: fk.from_table,
            from_column: fk.from_column,
            to_schema: fk.to_schema,
            to_table: fk.to_table,
            to_column,
        });
    }

    SchemaModel {
        database: database.to_string(),
        tables,
        relations,
        cached_at_utc: None,
    }
}

fn column_mut<'a>(
    tables: &'a mut [TableInfo],
    index: &HashMap<TableKey, usize>,
    schema: &str,
    table: &str,
    column: &str,
) -> Option<&'a mut ColumnInfo> {
    let &i = index.get(&table_key(schema, table))?;
    tables[i]
        .columns
        .iter_mut()
        .find(|c| c.name.eq_ignore_ascii_case(column))
}

fn primary_key_of(
    tables: &[TableInfo],
    index: &HashMap<TableKey, usize>,
    schema: &str,
    table: &str,
) -> Option<String> {
    let &i = index.get(&table_key(schema, table))?;
    tables[i]
        .columns
        .iter()
        .find(|c| c.is_primary_key)
        .map(|c| c.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnRow, ForeignKeyRow, KeyColumnRow, TableRow};
    use crate::testing::MockDriver;
    use chrono::{Duration, Utc};
    use common::models::Dialect;
    use std::sync::Mutex;

    fn column(table: &str, name: &str, data_type: &str, nullable: bool) -> ColumnRow {
        ColumnRow {
            schema: "public".into(),
            table: table.into(),
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: nullable,
        }
    }

    fn shop_catalog() -> CatalogSnapshot {
        CatalogSnapshot {
            tables: vec![
                TableRow { schema: "public".into(), name: "customers".into() },
                TableRow { schema: "public".into(), name: "orders".into() },
            ],
            columns: vec![
                column("customers", "id", "integer", false),
                column("customers", "name", "text", true),
                column("orders", "id", "integer", false),
                column("orders", "customer_id", "integer", false),
                column("order_view", "total", "numeric", true),
            ],
            primary_keys: vec![
                KeyColumnRow { schema: "public".into(), table: "customers".into(), column: "id".into() },
                KeyColumnRow { schema: "public".into(), table: "orders".into(), column: "id".into() },
            ],
            foreign_keys: vec![ForeignKeyRow {
                from_schema: "public".into(),
                from_table: "orders".into(),
                from_column: "customer_id".into(),
                to_schema: "public".into(),
                to_table: "customers".into(),
                to_column: String::new(),
            }],
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::from_server_database("db01", "shop", None).unwrap()
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(SchemaIntrospector::cache_key(&config()), "db01|shop");
        let server_only = ConnectionConfig::for_server("db01", None, None).unwrap();
        assert_eq!(SchemaIntrospector::cache_key(&server_only), "db01");
    }

    #[test]
    fn test_assemble_annotates_keys() {
        let model = assemble("shop", shop_catalog());
        assert_eq!(model.tables.len(), 2);

        let customers = model.table("public", "customers").unwrap();
        assert!(customers.column("id").unwrap().is_primary_key);
        assert!(!customers.column("id").unwrap().is_nullable);
        assert!(customers.column("name").unwrap().is_nullable);

        let fk = model.table("public", "orders").unwrap().column("customer_id").unwrap();
        assert!(fk.is_foreign_key);
        assert_eq!(fk.references_table.as_deref(), Some("customers"));
        assert_eq!(fk.references_column.as_deref(), Some("id"));

        assert_eq!(model.relations.len(), 1);
        assert_eq!(model.relations[0].to_column, "id");
    }

    #[test]
    fn test_assemble_drops_columns_of_unknown_tables() {
        let model = assemble("shop", shop_catalog());
        assert!(model.tables.iter().all(|t| t.name != "order_view"));
        let total_columns: usize = model.tables.iter().map(|t| t.columns.len()).sum();
        assert_eq!(total_columns, 4);
    }

    #[tokio::test]
    async fn test_get_schema_reads_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = MockDriver::new(Dialect::Postgres);
        driver.catalog = shop_catalog();
        let driver = Arc::new(driver);
        let cache = CacheManager::new(dir.path(), Dialect::Postgres, Duration::days(7));
        let introspector = SchemaIntrospector::new(driver.clone(), cache);
        let ct = CancellationToken::new();

        let first = introspector.get_schema(&config(), false, &ct).await.unwrap();
        let second = introspector.get_schema(&config(), false, &ct).await.unwrap();
        assert_eq!(driver.catalog_loads(), 1);
        assert_eq!(first.tables, second.tables);
        assert!(second.cached_at_utc.is_some());

        introspector.refresh(&config(), &ct).await.unwrap();
        assert_eq!(driver.catalog_loads(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc::now();
        let now = Arc::new(Mutex::new(t0));
        let handle = now.clone();
        let cache = CacheManager::new(dir.path(), Dialect::Postgres, Duration::days(7))
            .with_clock(Arc::new(move || *handle.lock().unwrap()));
        let driver = Arc::new(MockDriver::new(Dialect::Postgres));
        let introspector = SchemaIntrospector::new(driver.clone(), cache);
        let ct = CancellationToken::new();

        introspector.get_schema(&config(), false, &ct).await.unwrap();
        *now.lock().unwrap() = t0 + Duration::days(6);
        introspector.get_schema(&config(), false, &ct).await.unwrap();
        assert_eq!(driver.catalog_loads(), 1);

        *now.lock().unwrap() = t0 + Duration::days(8);
        introspector.get_schema(&config(), false, &ct).await.unwrap();
        assert_eq!(driver.catalog_loads(), 2);
    }

    #[tokio::test]
    async fn test_failure_wraps_into_provider_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = MockDriver::new(Dialect::Postgres);
        driver.catalog_error = Some("permission denied".into());
        let cache = CacheManager::new(dir.path(), Dialect::Postgres, Duration::days(7));
        let introspector = SchemaIntrospector::new(Arc::new(driver), cache);

        match introspector.get_schema(&config(), false, &CancellationToken::new()).await {
            Err(AppError::Provider { server, database, message }) => {
                assert_eq!(server, "db01");
                assert_eq!(database, "shop");
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path(), Dialect::Postgres, Duration::days(7));
        let introspector = SchemaIntrospector::new(Arc::new(MockDriver::new(Dialect::Postgres)), cache);
        let ct = CancellationToken::new();
        ct.cancel();
        assert!(matches!(
            introspector.get_schema(&config(), true, &ct).await,
            Err(AppError::Cancelled)
        ));
    }
}
