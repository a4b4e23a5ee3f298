//! Response envelope.
//!
//! Provides a unified output format for every provider operation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::AppError;

/// Standard response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the operation was successful.
    pub success: bool,

    /// Response data (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Error details (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,

    /// Response metadata.
    pub meta: ResponseMeta,
}

/// Error details.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Error code for client handling (e.g., "VALIDATION_ERROR", "EXECUTION_ERROR").
    pub code: String,

    /// Human-readable error message.
    pub message: String,

    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Response metadata.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    /// Response timestamp.
    pub timestamp: DateTime<Utc>,

    /// Processing time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Component that produced the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            duration_ms: None,
            service: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response with data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: ResponseMeta::default(),
        }
    }

    /// Sets the duration on the response.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.meta.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the service name on the response.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.meta.service = Some(service.into());
        self
    }
}

impl ApiResponse<()> {
    /// Creates an error response.
    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
            meta: ResponseMeta::default(),
        }
    }

    /// Creates an error response from an [`AppError`].
    ///
    /// Execution failures carry their partial result as details.
    pub fn from_error(err: &AppError) -> Self {
        let mut response = Self::err(err.code(), err.to_string());
        if let (Some(result), Some(error)) = (err.execution_result(), response.error.as_mut()) {
            error.details = serde_json::to_value(result).ok();
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::ExecutionResult;

    #[test]
    fn test_ok_envelope() {
        let response = ApiResponse::ok(vec![1, 2]).with_duration(5).with_service("db-provider");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert_eq!(json["meta"]["duration_ms"], 5);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_execution_error_details() {
        let err = AppError::Execution {
            server: "localhost".into(),
            database: "app".into(),
            message: "no such table: t".into(),
            result: Box::new(ExecutionResult::failed("no such table: t", 1, None)),
        };
        let json = serde_json::to_value(ApiResponse::from_error(&err)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "EXECUTION_ERROR");
        assert_eq!(json["error"]["details"]["errorMessage"], "no such table: t");
    }
}
