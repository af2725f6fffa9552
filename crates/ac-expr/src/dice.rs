//! Restricted dice roller.
//!
//! Accepts digits, `d`, `+`, `-`, `*`, parentheses, whitespace and the
//! coin shorthand `Ndc`. Any other character is an invalid expression.

use rand::Rng;

use crate::error::{ExprError, ExprResult};

/// Largest number of dice in one term.
pub const MAX_DICE: u32 = 100;
/// Largest die size.
pub const MAX_FACES: u32 = 1000;
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(i64),
    Dice { count: u32, faces: u32 },
    Coins { count: u32 },
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, message: &str) -> ExprError {
        ExprError::invalid(format!("{message} at offset {}", self.pos))
    }

    fn expr(&mut self) -> ExprResult<Node> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    lhs = Node::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Some(b'-') => {
                    self.pos += 1;
                    lhs = Node::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> ExprResult<Node> {
        let mut lhs = self.factor()?;
        while self.peek() == Some(b'*') {
            self.pos += 1;
            lhs = Node::Mul(Box::new(lhs), Box::new(self.factor()?));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> ExprResult<Node> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let node = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Node::Neg(Box::new(self.factor()?))
            }
            Some(b'+') => {
                self.pos += 1;
                self.factor()?
            }
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(self.error("expected `)`"));
                }
                self.pos += 1;
                inner
            }
            Some(c) if c.is_ascii_digit() || c == b'd' => self.dice_or_number()?,
            Some(_) => return Err(self.error("unexpected character")),
            None => return Err(self.error("unexpected end of formula")),
        };
        self.depth -= 1;
        Ok(node)
    }

    fn number(&mut self) -> Option<u64> {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    fn dice_or_number(&mut self) -> ExprResult<Node> {
        let start = self.pos;
        let count = self.number();
        if self.bytes.get(self.pos) != Some(&b'd') {
            let n = count.ok_or_else(|| self.error("expected a number"))?;
            return i64::try_from(n)
                .map(Node::Const)
                .map_err(|_| self.error("number too large"));
        }
        self.pos += 1;
        let count = match count {
            Some(n) => u32::try_from(n).map_err(|_| self.error("too many dice"))?,
            None if start == self.pos - 1 => 1,
            None => return Err(self.error("malformed dice term")),
        };
        if count > MAX_DICE {
            return Err(self.error("too many dice"));
        }
        if self.bytes.get(self.pos) == Some(&b'c') {
            self.pos += 1;
            return Ok(Node::Coins { count });
        }
        let faces = self
            .number()
            .ok_or_else(|| self.error("expected die size"))?;
        let faces = u32::try_from(faces).map_err(|_| self.error("die too large"))?;
        if faces == 0 || faces > MAX_FACES {
            return Err(self.error("die size out of range"));
        }
        Ok(Node::Dice { count, faces })
    }
}

fn compile(formula: &str) -> ExprResult<Node> {
    validate(formula)?;
    let mut parser = Parser::new(formula);
    let node = parser.expr()?;
    if parser.peek().is_some() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(node)
}

/// Check that a formula only uses the characters the roller accepts.
pub fn validate(formula: &str) -> ExprResult<()> {
    if let Some(bad) = formula
        .chars()
        .find(|c| !(c.is_ascii_digit() || c.is_whitespace() || "dc+-*()".contains(*c)))
    {
        return Err(ExprError::invalid(format!(
            "character `{bad}` is not allowed in a dice formula"
        )));
    }
    if formula.trim().is_empty() {
        return Err(ExprError::invalid("empty dice formula"));
    }
    Ok(())
}

fn roll_node<R: Rng + ?Sized>(node: &Node, rng: &mut R) -> i64 {
    match node {
        Node::Const(n) => *n,
        Node::Dice { count, faces } => (0..*count)
            .map(|_| i64::from(rng.random_range(1..=*faces)))
            .sum(),
        Node::Coins { count } => (0..*count).map(|_| rng.random_range(0..=1_i64)).sum(),
        Node::Neg(inner) => roll_node(inner, rng).saturating_neg(),
        Node::Add(a, b) => roll_node(a, rng).saturating_add(roll_node(b, rng)),
        Node::Sub(a, b) => roll_node(a, rng).saturating_sub(roll_node(b, rng)),
        Node::Mul(a, b) => roll_node(a, rng).saturating_mul(roll_node(b, rng)),
    }
}

fn bounds_node(node: &Node) -> (i64, i64) {
    match node {
        Node::Const(n) => (*n, *n),
        Node::Dice { count, faces } => (i64::from(*count), i64::from(*count) * i64::from(*faces)),
        Node::Coins { count } => (0, i64::from(*count)),
        Node::Neg(inner) => {
            let (lo, hi) = bounds_node(inner);
            (hi.saturating_neg(), lo.saturating_neg())
        }
        Node::Add(a, b) => {
            let ((al, ah), (bl, bh)) = (bounds_node(a), bounds_node(b));
            (al.saturating_add(bl), ah.saturating_add(bh))
        }
        Node::Sub(a, b) => {
            let ((al, ah), (bl, bh)) = (bounds_node(a), bounds_node(b));
            (al.saturating_sub(bh), ah.saturating_sub(bl))
        }
        Node::Mul(a, b) => {
            let ((al, ah), (bl, bh)) = (bounds_node(a), bounds_node(b));
            let products = [
                al.saturating_mul(bl),
                al.saturating_mul(bh),
                ah.saturating_mul(bl),
                ah.saturating_mul(bh),
            ];
            let lo = products.iter().copied().min().unwrap_or(0);
            let hi = products.iter().copied().max().unwrap_or(0);
            (lo, hi)
        }
    }
}

/// Roll a dice formula.
pub fn roll<R: Rng + ?Sized>(formula: &str, rng: &mut R) -> ExprResult<i64> {
    let node = compile(formula)?;
    Ok(roll_node(&node, rng))
}

/// Smallest and largest possible results of a dice formula.
pub fn bounds(formula: &str) -> ExprResult<(i64, i64)> {
    let node = compile(formula)?;
    Ok(bounds_node(&node))
}
