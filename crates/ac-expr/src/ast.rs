//! Expression syntax tree.

use std::fmt;

use ac_core::Value;

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!x`
    Not,
    /// `-x`
    Neg,
    /// `+x`
    Plus,
}

/// Infix operators, loosest binding last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 6,
            Self::Add | Self::Sub => 5,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Eq | Self::Ne => 3,
            Self::And => 2,
            Self::Or => 1,
        }
    }

    /// Source symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    /// Returns true for arithmetic operators.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Mul | Self::Div | Self::Rem | Self::Add | Self::Sub
        )
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number, string, boolean or null literal.
    Literal(Value),
    /// Dotted identifier, looked up in the context.
    Ident(String),
    /// `@path` roll-data reference.
    RollData(String),
    /// Dice literal, kept verbatim.
    Dice(String),
    /// Prefix operation.
    Unary(UnaryOp, Box<Expr>),
    /// Infix operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Helper function call.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Returns true if a dice literal appears anywhere in the tree.
    pub fn has_dice(&self) -> bool {
        match self {
            Self::Dice(_) => true,
            Self::Literal(_) | Self::Ident(_) | Self::RollData(_) => false,
            Self::Unary(_, inner) => inner.has_dice(),
            Self::Binary(_, lhs, rhs) => lhs.has_dice() || rhs.has_dice(),
            Self::Ternary(c, t, e) => c.has_dice() || t.has_dice() || e.has_dice(),
            Self::Call(_, args) => args.iter().any(Expr::has_dice),
        }
    }

    /// Visit every identifier path (including roll-data paths) in the tree.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Ident(name) | Self::RollData(name) => out.push(name),
            Self::Call(name, args) => {
                out.push(name);
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
            Self::Unary(_, inner) => inner.collect_identifiers(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Self::Ternary(c, t, e) => {
                c.collect_identifiers(out);
                t.collect_identifiers(out);
                e.collect_identifiers(out);
            }
            Self::Literal(_) | Self::Dice(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Ident(name) => write!(f, "{name}"),
            Self::RollData(path) => write!(f, "@{path}"),
            Self::Dice(d) => write!(f, "{d}"),
            Self::Unary(op, inner) => {
                let sym = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                };
                write!(f, "{sym}({inner})")
            }
            Self::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Ternary(c, t, e) => write!(f, "({c} ? {t} : {e})"),
            Self::Call(name, args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{name}({})", args.join(", "))
            }
        }
    }
}
