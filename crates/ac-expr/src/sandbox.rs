//! Identifier allow-listing.
//!
//! Expressions may only read from the evaluation context. Anything that
//! names a host global or reaches into an object's internals is rejected
//! before evaluation.

use crate::error::{ExprError, ExprResult};
use crate::lexer::Token;

/// Root identifiers that name host globals.
pub const BLOCKED_GLOBALS: &[&str] = &[
    "game",
    "canvas",
    "ui",
    "window",
    "document",
    "globalThis",
    "foundry",
    "CONFIG",
    "Function",
    "eval",
    "import",
    "require",
    "process",
    "self",
    "this",
];

/// Path segments that are blocked at any depth.
pub const BLOCKED_MEMBERS: &[&str] = &["constructor", "prototype", "__proto__"];

/// Check a single dotted path.
pub fn check_path(path: &str) -> ExprResult<()> {
    let mut segments = path.split('.');
    if let Some(root) = segments.next()
        && (BLOCKED_GLOBALS.contains(&root) || BLOCKED_MEMBERS.contains(&root))
    {
        return Err(ExprError::Unsafe {
            identifier: root.to_string(),
        });
    }
    if let Some(member) = segments.find(|s| BLOCKED_MEMBERS.contains(s)) {
        return Err(ExprError::Unsafe {
            identifier: member.to_string(),
        });
    }
    Ok(())
}

/// Check every identifier and roll-data reference in a token stream.
///
/// Runs on tokens rather than the tree so that unparseable input is still
/// reported as unsafe when it names a blocked global.
pub fn check_tokens(tokens: &[(Token, std::ops::Range<usize>)]) -> ExprResult<()> {
    for (token, _) in tokens {
        if let Token::Ident(path) | Token::RollData(path) = token {
            check_path(path)?;
        }
    }
    Ok(())
}
