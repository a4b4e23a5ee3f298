//! In-memory driver for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common::models::{ConnectionConfig, DatabaseInfo, Dialect, ExecutionResult};
use common::{AppError, AppResult};

use crate::catalog::CatalogSnapshot;
use crate::driver::{QueryOutput, SqlDriver};
use crate::params::BoundParameter;

/// Scriptable [`SqlDriver`] that records every call.
pub(crate) struct MockDriver {
    pub dialect: Dialect,
    pub catalog: CatalogSnapshot,
    pub catalog_error: Option<String>,
    /// Reachable servers (lowercased) and their live database counts.
    pub reachable: HashMap<String, i64>,
    pub databases: Vec<DatabaseInfo>,
    pub query_output: QueryOutput,
    pub affected: u64,
    pub statement_error: Option<String>,
    pub delay: Option<Duration>,
    pub probed: Mutex<Vec<String>>,
    pub statements: Mutex<Vec<(String, Vec<BoundParameter>)>>,
    pub catalog_loads: AtomicUsize,
    pub io_calls: AtomicUsize,
}

impl MockDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            catalog: CatalogSnapshot::default(),
            catalog_error: None,
            reachable: HashMap::new(),
            databases: Vec::new(),
            query_output: QueryOutput::default(),
            affected: 0,
            statement_error: None,
            delay: None,
            probed: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            catalog_loads: AtomicUsize::new(0),
            io_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_server(mut self, server: &str, database_count: i64) -> Self {
        self.reachable.insert(server.to_lowercase(), database_count);
        self
    }

    pub fn io_calls(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }

    pub fn catalog_loads(&self) -> usize {
        self.catalog_loads.load(Ordering::SeqCst)
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    fn connect(&self, config: &ConnectionConfig) -> AppResult<()> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.is_empty() || self.reachable.contains_key(&config.server().to_lowercase()) {
            Ok(())
        } else {
            Err(AppError::Connectivity {
                server: config.server().to_string(),
                database: config.database().to_string(),
                message: "connection refused".into(),
            })
        }
    }

    async fn statement(&self, config: &ConnectionConfig, sql: &str, params: &[BoundParameter]) -> AppResult<()> {
        self.connect(config)?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        match &self.statement_error {
            Some(message) => Err(AppError::Execution {
                server: config.server().to_string(),
                database: config.database().to_string(),
                message: message.clone(),
                result: Box::new(ExecutionResult::failed(message.clone(), 0, None)),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SqlDriver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn probe(&self, config: &ConnectionConfig) -> AppResult<()> {
        self.connect(config)
    }

    async fn count_user_databases(&self, config: &ConnectionConfig) -> AppResult<i64> {
        self.probed.lock().unwrap().push(config.server().to_string());
        self.connect(config)?;
        Ok(self
            .reachable
            .get(&config.server().to_lowercase())
            .copied()
            .unwrap_or_default())
    }

    async fn list_databases(&self, config: &ConnectionConfig) -> AppResult<Vec<DatabaseInfo>> {
        self.connect(config)?;
        Ok(self.databases.clone())
    }

    async fn load_catalog(&self, config: &ConnectionConfig) -> AppResult<CatalogSnapshot> {
        self.connect(config)?;
        self.catalog_loads.fetch_add(1, Ordering::SeqCst);
        match &self.catalog_error {
            Some(message) => Err(AppError::Connectivity {
                server: config.server().to_string(),
                database: config.database().to_string(),
                message: message.clone(),
            }),
            None => Ok(self.catalog.clone()),
        }
    }

    async fn query(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<QueryOutput> {
        self.statement(config, sql, params).await?;
        Ok(self.query_output.clone())
    }

    async fn execute(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<u64> {
        self.statement(config, sql, params).await?;
        Ok(self.affected)
    }
}
