//! Sandboxed expressions for rule strings.
//!
//! Two dialects share one grammar: conditions evaluate to a boolean and
//! formulas to a number or an unrolled dice string. Expressions only read
//! from a flat [`Bindings`] map. Anything that names a host global is
//! rejected before evaluation, and the public entry points fail closed: a
//! broken expression is logged and treated as `false` (condition) or
//! absent (formula).

/// Expression syntax tree.
pub mod ast;
/// Evaluation context.
pub mod context;
/// Diagnostics and ariadne rendering.
pub mod diagnostics;
/// Restricted dice roller.
pub mod dice;
/// Error types.
pub mod error;
/// Tree-walking evaluator.
pub mod eval;
/// Formula-mode evaluation.
pub mod formula;
/// Tokenizer.
pub mod lexer;
/// Expression parser.
pub mod parser;
/// Identifier allow-listing.
pub mod sandbox;

use tracing::warn;

pub use ast::Expr;
pub use context::Bindings;
pub use diagnostics::Diagnostic;
pub use error::{ExprError, ExprResult, SyntaxError};
pub use formula::Formula;

/// Longest expression accepted, in bytes.
pub const MAX_SOURCE_LEN: usize = 2048;
const MAX_NESTING: usize = 32;

/// Compile an expression into a syntax tree.
pub fn compile(source: &str) -> ExprResult<Expr> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(ExprError::invalid("expression is too long"));
    }
    let (tokens, lex_errors) = lexer::lex(source);
    sandbox::check_tokens(&tokens)?;
    if !lex_errors.is_empty() {
        return Err(ExprError::Parse {
            errors: lex_errors
                .into_iter()
                .map(|e| SyntaxError {
                    span: e.span,
                    message: e.message,
                })
                .collect(),
        });
    }

    let mut depth = 0usize;
    let mut nesting = 0usize;
    for (token, _) in &tokens {
        match token {
            lexer::Token::LParen | lexer::Token::Question => depth += 1,
            lexer::Token::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }
        nesting = nesting.max(depth);
    }
    if nesting > MAX_NESTING {
        return Err(ExprError::invalid("expression is nested too deeply"));
    }

    parser::parse(&tokens).map_err(|errors| ExprError::Parse { errors })
}

/// An expression compiled once and evaluated many times.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: ExprResult<Expr>,
}

impl CompiledExpr {
    /// Compile `source`. Errors are kept and reported on evaluation.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let trimmed = source.trim();
        let ast = if trimmed.is_empty() {
            Ok(Expr::Literal(ac_core::Value::Bool(true)))
        } else {
            compile(trimmed)
        };
        Self { source, ast }
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compile error, if the expression did not compile.
    pub fn error(&self) -> Option<&ExprError> {
        self.ast.as_ref().err()
    }

    /// Evaluate as a condition, exposing the error.
    pub fn try_condition(&self, bindings: &Bindings) -> ExprResult<bool> {
        let ast = self.ast.as_ref().map_err(Clone::clone)?;
        Ok(eval::eval(ast, bindings)?.is_truthy())
    }

    /// Evaluate as a condition; any fault is logged and yields `false`.
    pub fn condition(&self, bindings: &Bindings) -> bool {
        match self.try_condition(bindings) {
            Ok(result) => result,
            Err(error) => {
                warn!(expression = %self.source, %error, "condition failed closed");
                false
            }
        }
    }

    /// Evaluate as a formula, exposing the error.
    pub fn try_formula(&self, bindings: &Bindings) -> ExprResult<Formula> {
        let ast = self.ast.as_ref().map_err(Clone::clone)?;
        formula::evaluate(ast, bindings)
    }

    /// Evaluate as a formula; any fault is logged and yields `None`.
    pub fn formula(&self, bindings: &Bindings) -> Option<Formula> {
        match self.try_formula(bindings) {
            Ok(result) => Some(result),
            Err(error) => {
                warn!(expression = %self.source, %error, "formula failed closed");
                None
            }
        }
    }
}

/// Evaluate a condition, exposing any error. An empty condition is `true`.
pub fn try_evaluate_condition(source: &str, bindings: &Bindings) -> ExprResult<bool> {
    CompiledExpr::new(source).try_condition(bindings)
}

/// Evaluate a condition, failing closed to `false`.
pub fn evaluate_condition(source: &str, bindings: &Bindings) -> bool {
    CompiledExpr::new(source).condition(bindings)
}

/// Evaluate a formula, exposing any error.
pub fn try_evaluate_formula(source: &str, bindings: &Bindings) -> ExprResult<Formula> {
    CompiledExpr::new(source).try_formula(bindings)
}

/// Evaluate a formula, failing closed to `None`.
pub fn evaluate_formula(source: &str, bindings: &Bindings) -> Option<Formula> {
    CompiledExpr::new(source).formula(bindings)
}
