//! Formula-mode evaluation.
//!
//! Dice-free formulas fold to a number. Formulas with dice keep their dice
//! unrolled: every dice-free subtree is folded and substituted, and the
//! result is rendered back to a compact dice string such as `1d4+2`.

use std::fmt;

use ac_core::Value;
use rand::Rng;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::context::Bindings;
use crate::dice;
use crate::error::{ExprError, ExprResult};
use crate::eval::eval;

/// The result of a formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// A plain number.
    Number(f64),
    /// A dice expression, left for the roll to evaluate.
    Dice(String),
}

impl Formula {
    /// The formula as a roll part with an explicit sign: `+1d4`, `-2`.
    pub fn as_part(&self) -> String {
        match self {
            Self::Number(n) if *n < 0.0 => Value::Number(*n).to_string(),
            Self::Number(n) => format!("+{}", Value::Number(*n)),
            Self::Dice(d) if d.starts_with('-') || d.starts_with('+') => d.clone(),
            Self::Dice(d) => format!("+{d}"),
        }
    }

    /// Numeric value, rolling dice with the restricted roller if needed.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> ExprResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Dice(d) => dice::roll(d, rng).map(|n| n as f64),
        }
    }

    /// The number, if the formula has no dice.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Dice(_) => None,
        }
    }

    /// Returns true if the formula contains dice.
    pub fn is_dice(&self) -> bool {
        matches!(self, Self::Dice(_))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", Value::Number(*n)),
            Self::Dice(d) => write!(f, "{d}"),
        }
    }
}

/// Evaluate an expression in formula mode.
pub fn evaluate(expr: &Expr, bindings: &Bindings) -> ExprResult<Formula> {
    if !expr.has_dice() {
        let n = eval(expr, bindings)?.as_number();
        if !n.is_finite() {
            return Err(ExprError::eval(format!("`{expr}` is not a number")));
        }
        return Ok(Formula::Number(n));
    }
    let rendered = render(expr, bindings)?;
    Ok(Formula::Dice(normalize_signs(&rendered)))
}

fn fold_number(expr: &Expr, bindings: &Bindings) -> ExprResult<String> {
    let n = eval(expr, bindings)?.as_number();
    if !n.is_finite() {
        return Err(ExprError::eval(format!("`{expr}` is not a number")));
    }
    Ok(Value::Number(n).to_string())
}

fn needs_parens(child: &Expr, parent: BinaryOp, right: bool) -> bool {
    match child {
        Expr::Binary(op, ..) => {
            op.precedence() < parent.precedence()
                || (right && op.precedence() == parent.precedence() && parent == BinaryOp::Sub)
        }
        _ => false,
    }
}

fn render(expr: &Expr, bindings: &Bindings) -> ExprResult<String> {
    if !expr.has_dice() {
        return fold_number(expr, bindings);
    }
    match expr {
        Expr::Dice(d) => Ok(d.clone()),
        Expr::Unary(UnaryOp::Plus, inner) => render(inner, bindings),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let body = render(inner, bindings)?;
            if matches!(inner.as_ref(), Expr::Binary(..)) {
                Ok(format!("-({body})"))
            } else {
                Ok(format!("-{body}"))
            }
        }
        Expr::Binary(op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul), lhs, rhs) => {
            let mut left = render(lhs, bindings)?;
            let mut right = render(rhs, bindings)?;
            if needs_parens(lhs, *op, false) {
                left = format!("({left})");
            }
            if needs_parens(rhs, *op, true) {
                right = format!("({right})");
            }
            Ok(format!("{left}{}{right}", op.symbol()))
        }
        Expr::Ternary(cond, then, otherwise) => {
            if cond.has_dice() {
                return Err(ExprError::invalid("dice in a ternary condition"));
            }
            if eval(cond, bindings)?.is_truthy() {
                render(then, bindings)
            } else {
                render(otherwise, bindings)
            }
        }
        other => Err(ExprError::invalid(format!(
            "dice cannot be combined in `{other}`"
        ))),
    }
}

fn normalize_signs(rendered: &str) -> String {
    rendered
        .replace("+-", "-")
        .replace("--", "+")
        .replace("-+", "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn run(source: &str, bindings: &Bindings) -> ExprResult<Formula> {
        let (tokens, _) = lexer::lex(source);
        let expr = parser::parse(&tokens).expect("parses");
        evaluate(&expr, bindings)
    }

    fn sample() -> Bindings {
        let mut b = Bindings::new();
        b.insert("rollingActor.abilities.wis", 3);
        b.insert("rollingActor.prof", 2);
        b.insert("isSpell", true);
        b
    }

    #[test]
    fn numbers_fold() {
        let b = sample();
        assert_eq!(run("@abilities.wis + 2", &b).unwrap(), Formula::Number(5.0));
        assert_eq!(run("-2", &b).unwrap().as_part(), "-2");
        assert_eq!(run("@prof", &b).unwrap().as_part(), "+2");
    }

    #[test]
    fn dice_render_with_substitution() {
        let b = sample();
        assert_eq!(run("1d4", &b).unwrap(), Formula::Dice("1d4".to_string()));
        assert_eq!(run("1d4", &b).unwrap().as_part(), "+1d4");
        assert_eq!(
            run("1d6 + @abilities.wis", &b).unwrap(),
            Formula::Dice("1d6+3".to_string())
        );
        assert_eq!(
            run("(1d4 + 1) * @prof", &b).unwrap(),
            Formula::Dice("(1d4+1)*2".to_string())
        );
        assert_eq!(
            run("1d8 - (1d4 + 1)", &b).unwrap(),
            Formula::Dice("1d8-(1d4+1)".to_string())
        );
        assert_eq!(run("-1d4", &b).unwrap().as_part(), "-1d4");
        assert_eq!(
            run("1d4 + -2", &b).unwrap(),
            Formula::Dice("1d4-2".to_string())
        );
    }

    #[test]
    fn ternary_selects_branch() {
        let b = sample();
        assert_eq!(
            run("isSpell ? 1d8 : 1d6", &b).unwrap(),
            Formula::Dice("1d8".to_string())
        );
    }

    #[test]
    fn dice_in_comparisons_are_invalid() {
        let b = sample();
        assert!(matches!(run("1d4 > 2", &b), Err(ExprError::Invalid { .. })));
        assert!(matches!(run("max(1d4, 2)", &b), Err(ExprError::Invalid { .. })));
        assert!(matches!(run("1d4 / 2", &b), Err(ExprError::Invalid { .. })));
    }

    #[test]
    fn non_numeric_is_an_error() {
        let b = sample();
        assert!(run("missing.value", &b).is_err());
        assert!(run("'fire'", &b).is_err());
    }

    #[test]
    fn rolling_a_formula() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(Formula::Number(4.0).roll(&mut rng).unwrap(), 4.0);
        let rolled = Formula::Dice("1d4+2".to_string()).roll(&mut rng).unwrap();
        assert!((3.0..=6.0).contains(&rolled));
    }
}
