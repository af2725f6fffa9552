//! Error types for expression parsing and evaluation.

use std::fmt;

/// One lexer or parser error with its byte range in the expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    /// Byte range of the offending input.
    pub span: std::ops::Range<usize>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}..{}", self.message, self.span.start, self.span.end)
    }
}

/// Errors raised while compiling or evaluating an expression.
///
/// The fail-closed entry points log these and return a default; the
/// `try_*` variants hand them to tooling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// The expression references a host global or an object-model escape.
    #[error("unsafe expression: `{identifier}` is not available")]
    Unsafe {
        /// The offending identifier.
        identifier: String,
    },

    /// A malformed dice or arithmetic literal.
    #[error("invalid expression: {message}")]
    Invalid {
        /// What was wrong.
        message: String,
    },

    /// The expression does not parse.
    #[error("syntax error: {}", errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Parse {
        /// Every lexer and parser error found.
        errors: Vec<SyntaxError>,
    },

    /// The expression parsed but could not be evaluated.
    #[error("evaluation failed: {message}")]
    Eval {
        /// What went wrong.
        message: String,
    },
}

impl ExprError {
    /// Shorthand for [`ExprError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Shorthand for [`ExprError::Eval`].
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
        }
    }
}

/// Convenience result type for expression operations.
pub type ExprResult<T> = Result<T, ExprError>;
