//! SQL statement validator.
//!
//! Provides the read-only write-verb guard and statement classification.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{AppError, AppResult};

/// Verbs that modify data or schema.
const WRITE_VERBS: [&str; 8] = [
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE",
];

/// Leading tokens that produce a result set.
const QUERY_VERBS: [&str; 4] = ["SELECT", "WITH", "EXEC", "VALUES"];

static WRITE_VERB_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(?:{})\b", WRITE_VERBS.join("|")))
        .expect("write verb pattern is valid")
});

/// How a statement is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a result set.
    Query,
    /// Produces an affected-row count.
    NonQuery,
}

/// Validates SQL statements against the execution policy.
pub struct SqlValidator;

impl SqlValidator {
    /// Rejects statements containing a write verb.
    ///
    /// The scan is a whole-word, case-insensitive match over the raw text,
    /// so a verb inside a string literal or an identifier such as
    /// `[Update]` also counts.
    ///
    /// # Errors
    /// Returns `AppError::Validation` naming the first verb found.
    pub fn ensure_read_only(sql: &str) -> AppResult<()> {
        match Self::find_write_verb(sql) {
            Some(verb) => Err(AppError::Validation(format!(
                "write operation `{}` is not allowed in read-only mode",
                verb
            ))),
            None => Ok(()),
        }
    }

    /// Returns the first write verb in `sql`, uppercased.
    pub fn find_write_verb(sql: &str) -> Option<String> {
        WRITE_VERB_PATTERN
            .find(sql)
            .map(|m| m.as_str().to_uppercase())
    }

    /// Classifies a statement by its first token.
    pub fn classify(sql: &str) -> StatementKind {
        let first = sql.split_whitespace().next().unwrap_or_default();
        let verb: String = first
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        if QUERY_VERBS.contains(&verb.as_str()) {
            StatementKind::Query
        } else {
            StatementKind::NonQuery
        }
    }

    /// Checks if the SQL produces a result set.
    pub fn is_query(sql: &str) -> bool {
        Self::classify(sql) == StatementKind::Query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_allowed() {
        assert!(SqlValidator::ensure_read_only("SELECT * FROM users").is_ok());
    }

    #[test]
    fn test_every_write_verb_is_rejected() {
        for sql in [
            "insert into t values (1)",
            "UPDATE t SET x=1",
            "Delete From t",
            "MERGE t USING s ON 1=1",
            "create table t (id int)",
            "ALTER TABLE t ADD c int",
            "drop table t",
            "TRUNCATE TABLE t",
        ] {
            assert!(
                matches!(SqlValidator::ensure_read_only(sql), Err(AppError::Validation(_))),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_write_verb_found_inside_cte() {
        let sql = "WITH x AS (SELECT 1) DELETE FROM t";
        assert_eq!(SqlValidator::find_write_verb(sql).as_deref(), Some("DELETE"));
    }

    #[test]
    fn test_word_boundary() {
        assert!(SqlValidator::ensure_read_only("SELECT updated_at, created_by FROM audit").is_ok());
        assert!(SqlValidator::ensure_read_only("SELECT dropdown FROM ui").is_ok());
    }

    #[test]
    fn test_classify() {
        assert_eq!(SqlValidator::classify("  select 1"), StatementKind::Query);
        assert_eq!(SqlValidator::classify("WITH a AS (SELECT 1) SELECT * FROM a"), StatementKind::Query);
        assert_eq!(SqlValidator::classify("EXEC dbo.report"), StatementKind::Query);
        assert_eq!(SqlValidator::classify("VALUES (1), (2)"), StatementKind::Query);
        assert_eq!(SqlValidator::classify("DELETE FROM t"), StatementKind::NonQuery);
        assert_eq!(SqlValidator::classify(""), StatementKind::NonQuery);
        assert!(SqlValidator::is_query("SELECT*FROM t"));
    }
}
