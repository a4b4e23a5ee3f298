//! SQL execution models.
//!
//! Contains the execution request, its mode, and the result shape that is
//! produced on every exit path so audit logging always has something to
//! persist.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::errors::{AppError, AppResult};

/// Caller-declared execution intent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub enum ExecutionMode {
    /// Write verbs are rejected before any connection is opened.
    #[default]
    ReadOnly,
    /// Any statement is allowed.
    Write,
}

/// Request to execute one SQL statement.
#[derive(Debug, Clone, Validate)]
pub struct ExecuteRequest {
    /// SQL statement to execute.
    #[validate(custom(function = "not_blank"))]
    pub sql: String,

    /// Natural-language description supplied by the caller.
    #[validate(custom(function = "not_blank"))]
    pub user_query: String,

    /// Raw textual parameters, keyed by name.
    pub parameters: Option<HashMap<String, Option<String>>>,

    /// Execution intent.
    pub mode: ExecutionMode,

    /// Profile to attribute the audit record to; no audit without it.
    pub profile_id: Option<String>,
}

impl ExecuteRequest {
    /// Creates a request without parameters or audit context.
    pub fn new(sql: impl Into<String>, user_query: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            sql: sql.into(),
            user_query: user_query.into(),
            parameters: None,
            mode,
            profile_id: None,
        }
    }

    /// Attaches raw parameters.
    pub fn with_parameters(mut self, parameters: HashMap<String, Option<String>>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Attaches an audit profile.
    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    /// Runs the field validators.
    ///
    /// # Errors
    /// `AppError::Validation` listing every offending field.
    pub fn ensure_valid(&self) -> AppResult<()> {
        self.validate().map_err(|errors| {
            let mut fields: Vec<String> = errors.field_errors().keys().map(|k| k.to_string()).collect();
            fields.sort_unstable();
            AppError::Validation(format!("{} must not be blank", fields.join(", ")))
        })
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// A bound parameter as echoed back in results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParameterEcho {
    pub name: String,
    pub db_type: String,
    pub value: serde_json::Value,
}

/// Result of one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Column names, in result order.
    pub columns: Vec<String>,

    /// Row data; database NULL is JSON `null`.
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Rows read (query path) or affected (non-query path).
    pub affected_rows: u64,

    /// Wall-clock execution time in milliseconds.
    pub execution_ms: u64,

    /// Failure description, when execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Parameters that were bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterEcho>>,
}

impl ExecutionResult {
    /// Result of a query: affected rows equals rows read.
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>, execution_ms: u64) -> Self {
        Self {
            columns,
            affected_rows: rows.len() as u64,
            rows,
            execution_ms,
            ..Default::default()
        }
    }

    /// Result of a non-query statement.
    pub fn affected(affected_rows: u64, execution_ms: u64) -> Self {
        Self {
            affected_rows,
            execution_ms,
            ..Default::default()
        }
    }

    /// Failure-derived result.
    pub fn failed(
        message: impl Into<String>,
        execution_ms: u64,
        parameters: Option<Vec<ParameterEcho>>,
    ) -> Self {
        Self {
            execution_ms,
            error_message: Some(message.into()),
            parameters,
            ..Default::default()
        }
    }

    /// Sets the echoed parameters.
    pub fn with_parameters(mut self, parameters: Option<Vec<ParameterEcho>>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Whether execution succeeded.
    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}
