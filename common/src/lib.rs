//! 数据库提供程序公共模块
//!
//! 提供所有组件共享的基础设施：
//! - 数据模型（连接、服务器、架构、查询）
//! - 统一错误类型
//! - 环境变量配置
//! - 响应封装
//! - SQL 语句校验

pub mod config;
pub mod errors;
pub mod models;
pub mod response;
pub mod utils;

pub use config::AppConfig;
pub use errors::{AppError, AppResult};
