//! Error taxonomy shared by every provider component.
//!
//! Every variant that crosses a component boundary carries the server and
//! database it concerns, so callers can diagnose a failure without going
//! back to the logs.

use thiserror::Error;

use crate::models::query::ExecutionResult;

/// Unified error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid connection parameters. Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connect or probe attempt failed.
    #[error("cannot connect to {server} (database: {database}): {message}")]
    Connectivity {
        server: String,
        database: String,
        message: String,
    },

    /// Request rejected before execution (blank input, write verb under read-only mode).
    #[error("validation error: {0}")]
    Validation(String),

    /// Driver-level failure mid-statement. The partial result is kept for auditing.
    #[error("execution failed on {server} (database: {database}): {message}")]
    Execution {
        server: String,
        database: String,
        message: String,
        result: Box<ExecutionResult>,
    },

    /// Durable cache read/write failure. Never fatal.
    #[error("cache error at {path}: {message}")]
    Cache { path: String, message: String },

    /// Catalog introspection failure.
    #[error("schema load failed on {server} (database: {database}): {message}")]
    Provider {
        server: String,
        database: String,
        message: String,
    },

    /// The dialect has no driver in this build.
    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// Audit sink failure.
    #[error("audit sink error: {0}")]
    Audit(String),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Stable error code for client handling (e.g. `VALIDATION_ERROR`).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Connectivity { .. } => "CONNECTIVITY_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Execution { .. } => "EXECUTION_ERROR",
            AppError::Cache { .. } => "CACHE_ERROR",
            AppError::Provider { .. } => "PROVIDER_ERROR",
            AppError::UnsupportedDialect(_) => "UNSUPPORTED_DIALECT",
            AppError::Audit(_) => "AUDIT_ERROR",
            AppError::Cancelled => "CANCELLED",
        }
    }

    /// Builds a cache error for `path`.
    pub fn cache(path: impl AsRef<std::path::Path>, message: impl std::fmt::Display) -> Self {
        AppError::Cache {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Partial result attached to an execution failure, if any.
    pub fn execution_result(&self) -> Option<&ExecutionResult> {
        match self {
            AppError::Execution { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Whether this error is a cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
