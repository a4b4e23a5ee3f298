//! 数据库提供程序服务模块
//!
//! 对外的统一入口，组合服务器发现、架构内省与执行引擎。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::AppConfig;
use common::models::{
    ConnectionConfig, DatabaseInfo, Dialect, ExecuteRequest, ExecutionResult, SchemaModel, ServerInfo,
};
use common::AppResult;
use tokio_util::sync::CancellationToken;

use crate::audit::QueryAuditSink;
use crate::cache::CacheManager;
use crate::discovery::ServerDiscovery;
use crate::driver::{SqlDriver, SqlxDriver};
use crate::engine::ExecutionEngine;
use crate::locator::{platform_locator, PlatformServerLocator};
use crate::run_cancellable;
use crate::schema::SchemaIntrospector;

/// 数据库列表的目标
#[derive(Debug, Clone)]
pub enum DatabaseTarget {
    /// 使用完整的连接配置
    Config(ConnectionConfig),
    /// 仅指定服务器名，使用集成认证连接默认库
    Server(String),
}

/// 数据库提供程序 Trait
#[async_trait]
pub trait DatabaseProviderTrait: Send + Sync {
    /// 当前方言
    fn dialect(&self) -> Dialect;

    /// 测试连接是否可用
    async fn check_connection(&self, config: &ConnectionConfig, ct: &CancellationToken) -> AppResult<bool>;

    /// 执行 SQL 语句
    async fn execute(
        &self,
        config: &ConnectionConfig,
        request: &ExecuteRequest,
        ct: &CancellationToken,
    ) -> AppResult<ExecutionResult>;

    /// 获取数据库架构（带缓存）
    async fn get_schema(
        &self,
        config: &ConnectionConfig,
        force_refresh: bool,
        ct: &CancellationToken,
    ) -> AppResult<SchemaModel>;

    /// 发现本机服务器（带缓存）
    async fn get_servers(&self, force_refresh: bool, ct: &CancellationToken) -> AppResult<Vec<ServerInfo>>;

    /// 列出服务器上的数据库
    async fn get_databases(&self, target: DatabaseTarget, ct: &CancellationToken) -> AppResult<Vec<DatabaseInfo>>;
}

/// 数据库提供程序
pub struct DbProvider {
    driver: Arc<dyn SqlDriver>,
    discovery: ServerDiscovery,
    schema: Arc<SchemaIntrospector>,
    engine: ExecutionEngine,
    connect_timeout: Duration,
}

impl DbProvider {
    /// 按配置创建提供程序（sqlx 驱动 + 平台定位器）
    pub fn new(config: &AppConfig) -> Self {
        let driver: Arc<dyn SqlDriver> = Arc::new(SqlxDriver::new(config.dialect));
        Self::with_parts(config, driver, platform_locator(config), None)
    }

    /// 使用指定组件创建提供程序
    pub fn with_parts(
        config: &AppConfig,
        driver: Arc<dyn SqlDriver>,
        locator: Arc<dyn PlatformServerLocator>,
        audit: Option<Arc<dyn QueryAuditSink>>,
    ) -> Self {
        let cache = CacheManager::new(&config.cache_dir, driver.dialect(), config.cache_ttl());
        let discovery = ServerDiscovery::new(driver.clone(), locator, cache.clone(), config.connect_timeout());
        let schema = Arc::new(SchemaIntrospector::new(driver.clone(), cache));
        let mut engine = ExecutionEngine::new(driver.clone(), schema.clone());
        if let Some(sink) = audit {
            engine = engine.with_audit_sink(sink);
        }

        tracing::info!(
            dialect = %driver.dialect(),
            cache_dir = %config.cache_dir.display(),
            "数据库提供程序已初始化"
        );

        Self {
            driver,
            discovery,
            schema,
            engine,
            connect_timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl DatabaseProviderTrait for DbProvider {
    fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    async fn check_connection(&self, config: &ConnectionConfig, ct: &CancellationToken) -> AppResult<bool> {
        run_cancellable(ct, self.driver.probe(config)).await?;
        tracing::info!(server = %config.server(), database = %config.database(), "连接测试成功");
        Ok(true)
    }

    async fn execute(
        &self,
        config: &ConnectionConfig,
        request: &ExecuteRequest,
        ct: &CancellationToken,
    ) -> AppResult<ExecutionResult> {
        self.engine.execute(config, request, ct).await
    }

    async fn get_schema(
        &self,
        config: &ConnectionConfig,
        force_refresh: bool,
        ct: &CancellationToken,
    ) -> AppResult<SchemaModel> {
        self.schema.get_schema(config, force_refresh, ct).await
    }

    async fn get_servers(&self, force_refresh: bool, ct: &CancellationToken) -> AppResult<Vec<ServerInfo>> {
        self.discovery.discover(force_refresh, ct).await
    }

    async fn get_databases(&self, target: DatabaseTarget, ct: &CancellationToken) -> AppResult<Vec<DatabaseInfo>> {
        let config = match target {
            DatabaseTarget::Config(config) => config,
            DatabaseTarget::Server(server) => ConnectionConfig::for_server(
                &server,
                Some(self.dialect().default_catalog()),
                Some(self.connect_timeout),
            )?,
        };
        let databases = run_cancellable(ct, self.driver.list_databases(&config)).await?;
        tracing::debug!(server = %config.server(), count = databases.len(), "数据库列表已获取");
        Ok(databases)
    }
}
