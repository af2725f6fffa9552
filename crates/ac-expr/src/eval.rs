//! Tree-walking evaluation with loose, JavaScript-like coercions.
//!
//! `&&` and `||` short-circuit and return an operand, `+` concatenates
//! when either side is a string, comparisons are numeric unless both
//! sides are strings, and `==` is loose equality.

use ac_core::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::context::Bindings;
use crate::error::{ExprError, ExprResult};

/// Helper functions callable from expressions.
pub const FUNCTIONS: &[&str] = &[
    "min", "max", "abs", "floor", "ceil", "round", "sign", "clamp", "includes",
];

/// Evaluate an expression that contains no dice.
pub fn eval(expr: &Expr, bindings: &Bindings) -> ExprResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(path) => Ok(bindings.get(path)),
        Expr::RollData(path) => Ok(bindings.roll_data(path)),
        Expr::Dice(d) => Err(ExprError::invalid(format!(
            "dice `{d}` cannot be used in a condition"
        ))),
        Expr::Unary(op, inner) => {
            let value = eval(inner, bindings)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => Value::Number(-value.as_number()),
                UnaryOp::Plus => Value::Number(value.as_number()),
            })
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let left = eval(lhs, bindings)?;
            if left.is_truthy() {
                eval(rhs, bindings)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let left = eval(lhs, bindings)?;
            if left.is_truthy() {
                Ok(left)
            } else {
                eval(rhs, bindings)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, bindings)?;
            let right = eval(rhs, bindings)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::Ternary(cond, then, otherwise) => {
            if eval(cond, bindings)?.is_truthy() {
                eval(then, bindings)
            } else {
                eval(otherwise, bindings)
            }
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, bindings))
                .collect::<ExprResult<Vec<_>>>()?;
            call(name, &args)
        }
    }
}

/// Apply a non-logical binary operator to two values.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(a), b) => Value::String(format!("{a}{b}")),
            (a, Value::String(b)) => Value::String(format!("{a}{b}")),
            (a, b) => Value::Number(a.as_number() + b.as_number()),
        },
        BinaryOp::Sub => Value::Number(left.as_number() - right.as_number()),
        BinaryOp::Mul => Value::Number(left.as_number() * right.as_number()),
        BinaryOp::Div => Value::Number(left.as_number() / right.as_number()),
        BinaryOp::Rem => Value::Number(left.as_number() % right.as_number()),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Value::Bool(compare(op, left, right))
        }
        BinaryOp::And => {
            if left.is_truthy() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOp::Or => {
            if left.is_truthy() {
                left.clone()
            } else {
                right.clone()
            }
        }
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Le => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.as_number(), right.as_number());
    // NaN compares false on every side.
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

fn numbers(args: &[Value]) -> Vec<f64> {
    args.iter()
        .flat_map(|a| match a {
            Value::List(items) => items.iter().map(Value::as_number).collect(),
            other => vec![other.as_number()],
        })
        .collect()
}

fn arity(name: &str, args: &[Value], expected: usize) -> ExprResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExprError::invalid(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn call(name: &str, args: &[Value]) -> ExprResult<Value> {
    let unary = |f: fn(f64) -> f64| -> ExprResult<Value> {
        arity(name, args, 1)?;
        Ok(Value::Number(f(args[0].as_number())))
    };
    match name {
        "min" => Ok(Value::Number(
            numbers(args).into_iter().fold(f64::INFINITY, f64::min),
        )),
        "max" => Ok(Value::Number(
            numbers(args).into_iter().fold(f64::NEG_INFINITY, f64::max),
        )),
        "abs" => unary(f64::abs),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "sign" => unary(|n| if n == 0.0 || n.is_nan() { n } else { n.signum() }),
        "clamp" => {
            arity(name, args, 3)?;
            let (x, lo, hi) = (
                args[0].as_number(),
                args[1].as_number(),
                args[2].as_number(),
            );
            Ok(Value::Number(x.max(lo).min(hi)))
        }
        "includes" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(args[0].contains(&args[1])))
        }
        other => Err(ExprError::invalid(format!("unknown function `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    fn run(source: &str, bindings: &Bindings) -> ExprResult<Value> {
        let (tokens, _) = lexer::lex(source);
        let expr = parser::parse(&tokens).expect("parses");
        eval(&expr, bindings)
    }

    fn sample() -> Bindings {
        let mut b = Bindings::new();
        b.insert("rollingActor.hp.pct", 40.0);
        b.insert("rollingActor.statuses", vec!["prone", "poisoned"]);
        b.insert("rollingActor.abilities.str", 3);
        b.insert("distance", 5.0);
        b.insert("mwak", true);
        b.insert("actionType", "mwak");
        b
    }

    #[test]
    fn comparisons_and_logic() {
        let b = sample();
        assert_eq!(
            run("rollingActor.hp.pct < 50 && distance <= 5", &b).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(run("mwak || nothing", &b).unwrap(), Value::Bool(true));
        assert_eq!(run("nothing && mwak", &b).unwrap(), Value::Null);
        assert_eq!(run("actionType === 'mwak'", &b).unwrap(), Value::Bool(true));
        assert_eq!(run("actionType != 'rsak'", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn missing_identifiers_are_null() {
        let b = sample();
        assert_eq!(run("opponentActor.hp.pct", &b).unwrap(), Value::Null);
        assert_eq!(run("opponentActor.hp.pct < 50", &b).unwrap(), Value::Bool(false));
        assert_eq!(run("!opponentActor", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn arithmetic_and_strings() {
        let b = sample();
        assert_eq!(run("@abilities.str * 2 + 1", &b).unwrap(), Value::Number(7.0));
        assert_eq!(run("'d' + 6", &b).unwrap(), Value::from("d6"));
        assert_eq!(run("7 % 4", &b).unwrap(), Value::Number(3.0));
        assert_eq!(run("-distance", &b).unwrap(), Value::Number(-5.0));
    }

    #[test]
    fn helper_functions() {
        let b = sample();
        assert_eq!(run("max(1, @abilities.str, 2)", &b).unwrap(), Value::Number(3.0));
        assert_eq!(run("min(4, 2)", &b).unwrap(), Value::Number(2.0));
        assert_eq!(run("clamp(12, 0, 10)", &b).unwrap(), Value::Number(10.0));
        assert_eq!(run("floor(2.7) + ceil(0.2)", &b).unwrap(), Value::Number(3.0));
        assert_eq!(
            run("includes(rollingActor.statuses, 'prone')", &b).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(run("sign(-3)", &b).unwrap(), Value::Number(-1.0));
    }

    #[test]
    fn unknown_function_and_dice_are_invalid() {
        let b = sample();
        assert!(matches!(run("explode(1)", &b), Err(ExprError::Invalid { .. })));
        assert!(matches!(run("abs(1, 2)", &b), Err(ExprError::Invalid { .. })));
        assert!(matches!(run("1d20 > 10", &b), Err(ExprError::Invalid { .. })));
    }

    #[test]
    fn ternary_picks_branch() {
        let b = sample();
        assert_eq!(run("mwak ? 2 : 3", &b).unwrap(), Value::Number(2.0));
        assert_eq!(run("rsak ? 2 : 3", &b).unwrap(), Value::Number(3.0));
    }
}
