//! 数据库提供程序
//!
//! 提供以下功能：
//! - 本机数据库服务器发现（注册表 / 实例配置文件 + 回退探测）
//! - 关系型架构内省与 TTL 缓存
//! - 读写策略校验、SQL 执行与审计
//! - 字符串参数的类型推断与占位符改写

pub mod audit;
pub mod cache;
pub mod catalog;
pub mod discovery;
pub mod driver;
pub mod engine;
pub mod locator;
pub mod params;
pub mod schema;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;

use common::{AppError, AppResult};
use tokio_util::sync::CancellationToken;

pub use audit::{QueryAuditRecord, QueryAuditSink, TracingAuditSink};
pub use cache::CacheManager;
pub use discovery::ServerDiscovery;
pub use driver::{SqlDriver, SqlxDriver};
pub use engine::ExecutionEngine;
pub use params::ParameterTypeInferencer;
pub use schema::SchemaIntrospector;
pub use service::{DatabaseProviderTrait, DatabaseTarget, DbProvider};

/// Runs `fut` unless `ct` fires first.
pub(crate) async fn run_cancellable<F, T>(ct: &CancellationToken, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}
