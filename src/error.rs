//! Query error types
//!
//! Defines all error conditions that can occur while scanning, parsing,
//! and validating a statement. Evaluation itself never errors: missing
//! JSON paths and type mismatches degrade to null (see [`crate::eval`]).

use crate::token::{Pos, Token};
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The parser met a token it did not expect
    #[error("found {found}, expected {expected} at {pos}")]
    Parse {
        /// Printable form of the offending token
        found: String,
        /// Human-readable description of the expected token set
        expected: String,
        /// Zero-based position of the offending token
        pos: Pos,
    },

    /// A parse failure that carries its own message (bad regex,
    /// unparseable numeric literal, unbound parameter)
    #[error("{message} at {pos}")]
    ParseMessage {
        /// What went wrong
        message: String,
        /// Where it went wrong
        pos: Pos,
    },

    /// A comparison or regex operator appeared in the SELECT list
    #[error("invalid operator {op} in SELECT clause at {pos}; operator is intended for WHERE clause")]
    InvalidOperator {
        /// The operator that is not allowed in a field
        op: Token,
        /// Start position of the offending field
        pos: Pos,
    },

    /// A structural rule of statement validation failed
    #[error("{0}")]
    Validation(String),

    /// A quoted string ended early or contained a raw newline
    #[error("bad string")]
    BadString,

    /// A quoted string contained an unknown escape sequence
    #[error("bad escape")]
    BadEscape,
}

impl QueryError {
    pub(crate) fn parse(found: impl Into<String>, expected: impl Into<String>, pos: Pos) -> Self {
        Self::Parse {
            found: found.into(),
            expected: expected.into(),
            pos,
        }
    }

    pub(crate) fn parse_message(message: impl Into<String>, pos: Pos) -> Self {
        Self::ParseMessage {
            message: message.into(),
            pos,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_rendering() {
        let err = QueryError::parse("EOF", "SELECT", Pos { line: 0, column: 0 });
        assert_eq!(
            err.to_string(),
            "found EOF, expected SELECT at line 1, char 1"
        );
    }

    #[test]
    fn test_invalid_operator_rendering() {
        let err = QueryError::InvalidOperator {
            op: Token::Eq,
            pos: Pos { line: 0, column: 7 },
        };
        assert_eq!(
            err.to_string(),
            "invalid operator = in SELECT clause at line 1, char 8; operator is intended for WHERE clause"
        );
    }
}
