//! 数据库提供程序命令行
//!
//! 提供以下子命令：
//! - servers：发现本机服务器
//! - databases：列出服务器上的数据库
//! - schema：获取数据库架构
//! - check：测试连接
//! - exec：执行 SQL 语句
//!
//! 结果以统一的 ApiResponse JSON 输出到标准输出，日志输出到标准错误。

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::config::{AppConfig, LogFormat};
use common::models::{ConnectionConfig, Dialect, ExecuteRequest, ExecutionMode};
use common::response::ApiResponse;
use common::AppError;
use db_provider::locator::platform_locator;
use db_provider::{DatabaseProviderTrait, DatabaseTarget, DbProvider, SqlxDriver, TracingAuditSink};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "db-provider";

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// SQL dialect: sqlserver, mysql, postgres or sqlite (overrides DBPROVIDER_DIALECT)
    #[clap(short, long, global = true)]
    dialect: Option<Dialect>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Connection string, `key=value;` or URL form
    #[clap(short = 'c', long)]
    connection_string: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover database servers on this machine
    Servers {
        /// Ignore the cached server list
        #[clap(short, long)]
        refresh: bool,
    },

    /// List databases on a server
    Databases {
        /// Server name; connects with integrated security
        #[clap(short, long, conflicts_with = "connection_string", required_unless_present = "connection_string")]
        server: Option<String>,

        /// Connection string
        #[clap(short = 'c', long)]
        connection_string: Option<String>,
    },

    /// Load the schema of a database
    Schema {
        #[clap(flatten)]
        connection: ConnectionArgs,

        /// Ignore the cached snapshot
        #[clap(short, long)]
        refresh: bool,
    },

    /// Test a connection
    Check {
        #[clap(flatten)]
        connection: ConnectionArgs,
    },

    /// Execute one SQL statement
    Exec {
        #[clap(flatten)]
        connection: ConnectionArgs,

        /// SQL text; `@name` markers are bound from --param
        #[clap(long)]
        sql: String,

        /// Description of what the statement is for
        #[clap(short = 'q', long)]
        query_text: String,

        /// Parameter as `name=value`, repeatable
        #[clap(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Allow statements that modify data or schema
        #[clap(short, long)]
        write: bool,

        /// Profile to attribute the audit record to
        #[clap(long)]
        profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if present) before anything else
    load_dotenv();

    let cli = Cli::parse();

    // 加载配置
    let mut config = AppConfig::load();
    if let Some(dialect) = cli.dialect {
        config.dialect = dialect;
    }

    // 初始化日志追踪
    init_tracing(config.log_format);

    // Ctrl+C 取消正在进行的操作
    let ct = CancellationToken::new();
    let trigger = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，正在取消");
            trigger.cancel();
        }
    });

    let provider = DbProvider::with_parts(
        &config,
        Arc::new(SqlxDriver::new(config.dialect)),
        platform_locator(&config),
        Some(Arc::new(TracingAuditSink)),
    );

    let started = Instant::now();
    let outcome = run(&provider, cli.command, &ct).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(data) => {
            print(&ApiResponse::ok(data).with_duration(duration_ms).with_service(SERVICE_NAME));
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "命令执行失败");
            let response = match e.downcast_ref::<AppError>() {
                Some(app) => ApiResponse::from_error(app),
                None => ApiResponse::err("CLI_ERROR", format!("{:#}", e)),
            };
            print(&response.with_duration(duration_ms).with_service(SERVICE_NAME));
            ExitCode::FAILURE
        }
    }
}

async fn run(provider: &DbProvider, command: Commands, ct: &CancellationToken) -> Result<serde_json::Value> {
    let value = match command {
        Commands::Servers { refresh } => serde_json::to_value(provider.get_servers(refresh, ct).await?)?,
        Commands::Databases {
            server,
            connection_string,
        } => {
            let target = match (server, connection_string) {
                (Some(server), _) => DatabaseTarget::Server(server),
                (None, Some(s)) => DatabaseTarget::Config(ConnectionConfig::from_connection_string(&s, None)?),
                (None, None) => anyhow::bail!("either --server or --connection-string is required"),
            };
            serde_json::to_value(provider.get_databases(target, ct).await?)?
        }
        Commands::Schema { connection, refresh } => {
            let config = connection.parse()?;
            serde_json::to_value(provider.get_schema(&config, refresh, ct).await?)?
        }
        Commands::Check { connection } => {
            let config = connection.parse()?;
            serde_json::json!({ "connected": provider.check_connection(&config, ct).await? })
        }
        Commands::Exec {
            connection,
            sql,
            query_text,
            params,
            write,
            profile,
        } => {
            let config = connection.parse()?;
            let mode = if write { ExecutionMode::Write } else { ExecutionMode::ReadOnly };
            let mut request = ExecuteRequest::new(sql, query_text, mode);
            if !params.is_empty() {
                let raw: HashMap<String, Option<String>> =
                    params.into_iter().map(|(name, value)| (name, Some(value))).collect();
                request = request.with_parameters(raw);
            }
            if let Some(profile) = profile {
                request = request.with_profile(profile);
            }
            serde_json::to_value(provider.execute(&config, &request, ct).await?)?
        }
    };
    Ok(value)
}

impl ConnectionArgs {
    fn parse(&self) -> Result<ConnectionConfig> {
        ConnectionConfig::from_connection_string(&self.connection_string, None)
            .context("invalid --connection-string")
    }
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{}`", s))?;
    Ok((name.trim().to_string(), value.to_string()))
}

fn print<T: Serialize>(response: &ApiResponse<T>) {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "响应序列化失败"),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    if env_path.exists() {
        if let Ok(content) = std::fs::read_to_string(env_path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim();
                    // Only set if not already set by the environment
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
        }
    }
}
