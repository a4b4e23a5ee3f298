//! SQL execution engine.
//!
//! Each call runs `Validate -> Dispatch -> Audit`. Validation never touches
//! the network. Dispatch picks the query or non-query path from the first
//! token of the statement, and every successful non-query forces a schema
//! refresh for the connection's database.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::models::{ConnectionConfig, ExecuteRequest, ExecutionMode, ExecutionResult, ParameterEcho};
use common::utils::{SqlValidator, StatementKind};
use common::{AppError, AppResult};
use tokio_util::sync::CancellationToken;

use crate::audit::{QueryAuditRecord, QueryAuditSink};
use crate::driver::{QueryOutput, SqlDriver};
use crate::params::{rewrite_placeholders, BoundParameter, ParameterTypeInferencer, PlaceholderStyle};
use crate::run_cancellable;
use crate::schema::SchemaIntrospector;

enum Dispatched {
    Rows(QueryOutput),
    Affected(u64),
}

/// Executes statements under the caller's read/write policy.
pub struct ExecutionEngine {
    driver: Arc<dyn SqlDriver>,
    schema: Arc<SchemaIntrospector>,
    audit: Option<Arc<dyn QueryAuditSink>>,
}

impl ExecutionEngine {
    pub fn new(driver: Arc<dyn SqlDriver>, schema: Arc<SchemaIntrospector>) -> Self {
        Self {
            driver,
            schema,
            audit: None,
        }
    }

    /// Attaches the sink that receives audit records.
    pub fn with_audit_sink(mut self, sink: Arc<dyn QueryAuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validates, binds and runs one statement.
    ///
    /// # Errors
    /// * `AppError::Configuration` / `AppError::Validation` before any I/O
    ///   (blank inputs, bad parameter names, a write verb in read-only mode).
    /// * `AppError::Execution` with the failure-derived result attached.
    /// * `AppError::Cancelled` if `ct` fires.
    pub async fn execute(
        &self,
        config: &ConnectionConfig,
        request: &ExecuteRequest,
        ct: &CancellationToken,
    ) -> AppResult<ExecutionResult> {
        Self::validate(config, request)?;

        let bound = ParameterTypeInferencer::bind_optional(request.parameters.as_ref())?;
        let echo: Option<Vec<ParameterEcho>> =
            (!bound.is_empty()).then(|| bound.iter().map(BoundParameter::echo).collect());
        let style = PlaceholderStyle::for_dialect(self.driver.dialect());
        let rewritten = rewrite_placeholders(&request.sql, &bound, style);
        let kind = SqlValidator::classify(&request.sql);

        tracing::debug!(
            server = %config.server(),
            database = %config.database(),
            kind = ?kind,
            parameters = rewritten.parameters.len(),
            "Dispatching statement"
        );

        let started = Instant::now();
        let dispatched = run_cancellable(
            ct,
            self.dispatch(config, kind, &rewritten.sql, &rewritten.parameters),
        )
        .await;
        let execution_ms = started.elapsed().as_millis() as u64;

        let outcome = match dispatched {
            Ok(Dispatched::Rows(output)) => {
                Ok(ExecutionResult::rows(output.columns, output.rows, execution_ms).with_parameters(echo))
            }
            Ok(Dispatched::Affected(count)) => {
                Ok(ExecutionResult::affected(count, execution_ms).with_parameters(echo))
            }
            Err(e) => Err(Self::into_execution_error(config, e, execution_ms, echo)),
        };

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    server = %config.server(),
                    database = %config.database(),
                    affected_rows = result.affected_rows,
                    execution_ms,
                    "Statement executed"
                );
                if kind == StatementKind::NonQuery {
                    self.refresh_schema(config, ct).await;
                }
            }
            Err(e) => tracing::warn!(
                server = %config.server(),
                database = %config.database(),
                error = %e,
                "Statement failed"
            ),
        }

        self.audit(request, &outcome).await;
        outcome
    }

    fn validate(config: &ConnectionConfig, request: &ExecuteRequest) -> AppResult<()> {
        if config.connection_string().trim().is_empty() {
            return Err(AppError::Configuration("connection string is required".into()));
        }
        request.ensure_valid()?;
        if request.mode == ExecutionMode::ReadOnly {
            SqlValidator::ensure_read_only(&request.sql)?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        config: &ConnectionConfig,
        kind: StatementKind,
        sql: &str,
        params: &[BoundParameter],
    ) -> AppResult<Dispatched> {
        match kind {
            StatementKind::Query => self.driver.query(config, sql, params).await.map(Dispatched::Rows),
            StatementKind::NonQuery => self.driver.execute(config, sql, params).await.map(Dispatched::Affected),
        }
    }

    async fn refresh_schema(&self, config: &ConnectionConfig, ct: &CancellationToken) {
        if let Err(e) = self.schema.refresh(config, ct).await {
            tracing::warn!(
                server = %config.server(),
                database = %config.database(),
                error = %e,
                "Schema refresh after write failed"
            );
        }
    }

    async fn audit(&self, request: &ExecuteRequest, outcome: &AppResult<ExecutionResult>) {
        let Some(sink) = &self.audit else {
            return;
        };
        let Some(profile_id) = request.profile_id.as_deref().filter(|p| !p.trim().is_empty()) else {
            return;
        };

        let result = match outcome {
            Ok(result) => result.clone(),
            Err(e) => e
                .execution_result()
                .cloned()
                .unwrap_or_else(|| ExecutionResult::failed(e.to_string(), 0, None)),
        };
        let record = QueryAuditRecord {
            profile_id: profile_id.to_string(),
            user_query: request.user_query.clone(),
            sql: request.sql.clone(),
            result,
            timestamp_utc: Utc::now(),
        };

        match sink.save_query(&record).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(profile_id = %profile_id, "Audit sink declined record"),
            Err(e) => tracing::warn!(profile_id = %profile_id, error = %e, "Audit write failed"),
        }
    }

    /// Wraps a dispatch failure, keeping cancellation and dialect errors as they are.
    fn into_execution_error(
        config: &ConnectionConfig,
        e: AppError,
        execution_ms: u64,
        echo: Option<Vec<ParameterEcho>>,
    ) -> AppError {
        match e {
            AppError::Cancelled | AppError::UnsupportedDialect(_) => e,
            AppError::Execution {
                server,
                database,
                message,
                ..
            } => AppError::Execution {
                result: Box::new(ExecutionResult::failed(message.clone(), execution_ms, echo)),
                server,
                database,
                message,
            },
            other => {
                let message = other.to_string();
                AppError::Execution {
                    server: config.server().to_string(),
                    database: config.database().to_string(),
                    result: Box::new(ExecutionResult::failed(message.clone(), execution_ms, echo)),
                    message,
                }
            }
        }
    }
}
