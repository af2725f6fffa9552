//! Error types for rule parsing, resolution and gating.

use ac_core::CoreError;
use ac_expr::ExprError;

use crate::entry::Cadence;

/// Errors that can occur while turning effect changes into rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The key is in our namespace but does not follow the key grammar.
    #[error("malformed rule key: {0}")]
    MalformedKey(String),

    /// The mode segment of a key is not a known mode.
    #[error("unknown mode `{mode}` in key {key}")]
    UnknownMode {
        /// Full key.
        key: String,
        /// Offending mode segment.
        mode: String,
    },

    /// The hook segment of a key is not a known hook.
    #[error("unknown hook `{hook}` in key {key}")]
    UnknownHook {
        /// Full key.
        key: String,
        /// Offending hook segment.
        hook: String,
    },

    /// A named field in the value has an unusable value.
    #[error("invalid {field}: {message}")]
    InvalidField {
        /// Field name (`usesCount`, `radius`, ...).
        field: String,
        /// What was wrong.
        message: String,
    },

    /// An expression in the rule failed to compile.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// A participant or document lookup failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl RuleError {
    /// Shorthand for [`RuleError::InvalidField`].
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Convenience result type for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;

/// Why the cadence & resource gate refused a rule.
///
/// Both are non-fatal: the rule is skipped as if its condition were false.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Spending the rule's cost would leave its counter out of range.
    #[error("rule {rule}: not enough uses ({available} left, {cost} needed)")]
    ResourceExhausted {
        /// Rule id.
        rule: String,
        /// Current counter value (0 when the counter is missing).
        available: i64,
        /// Cost that was requested.
        cost: i64,
    },

    /// The rule already fired in its current cadence window.
    #[error("rule {rule}: already used ({cadence})")]
    CadenceBlocked {
        /// Rule id.
        rule: String,
        /// The window it is limited to.
        cadence: Cadence,
    },
}

/// Convenience result type for gate checks.
pub type GateResult<T> = Result<T, GateError>;
