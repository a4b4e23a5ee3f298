//! Utility functions and helpers.

pub mod sql_validator;

// Re-export commonly used types
pub use sql_validator::{SqlValidator, StatementKind};
