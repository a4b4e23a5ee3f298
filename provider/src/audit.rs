//! Query audit port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::models::ExecutionResult;
use common::AppResult;
use serde::Serialize;

/// One audited execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAuditRecord {
    pub profile_id: String,
    pub user_query: String,
    pub sql: String,
    pub result: ExecutionResult,
    pub timestamp_utc: DateTime<Utc>,
}

/// Persists audit records for executed statements.
#[async_trait]
pub trait QueryAuditSink: Send + Sync {
    /// Stores `record`. `Ok(false)` means the sink declined to store it.
    async fn save_query(&self, record: &QueryAuditRecord) -> AppResult<bool>;
}

/// Sink that writes audit records to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl QueryAuditSink for TracingAuditSink {
    async fn save_query(&self, record: &QueryAuditRecord) -> AppResult<bool> {
        tracing::info!(
            target: "audit",
            profile_id = %record.profile_id,
            user_query = %record.user_query,
            sql = %record.sql,
            success = record.result.is_success(),
            affected_rows = record.result.affected_rows,
            execution_ms = record.result.execution_ms,
            error = record.result.error_message.as_deref().unwrap_or_default(),
            timestamp = %record.timestamp_utc,
            "Query audited"
        );
        Ok(true)
    }
}
