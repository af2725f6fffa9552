use ac_core::Value;
use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::SyntaxError;
use crate::lexer::Token;

type Span = SimpleSpan;

/// Build the expression parser.
///
/// Precedence, tightest first: unary, `* / %`, `+ -`, comparisons,
/// equality, `&&`, `||`, ternary.
fn expr_parser<'a, I>() -> impl Parser<'a, I, Expr, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = Span>,
{
    recursive(|expr| {
        let literal = select! {
            Token::Number(n) => Expr::Literal(Value::Number(n)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
            Token::Dice(d) => Expr::Dice(d),
            Token::RollData(path) => Expr::RollData(path),
        }
        .labelled("value");

        let ident = select! { Token::Ident(name) => name }.labelled("identifier");

        let call = ident
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<Expr>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|(name, args)| Expr::Call(name, args));

        let atom = choice((
            literal,
            call,
            ident.map(Expr::Ident),
            expr.clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        ))
        .boxed();

        let unary_op = select! {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
        };
        let unary = unary_op
            .repeated()
            .foldr(atom, |op, rhs| Expr::Unary(op, Box::new(rhs)))
            .boxed();

        let binary = |lhs: Expr, (op, rhs): (BinaryOp, Expr)| {
            Expr::Binary(op, Box::new(lhs), Box::new(rhs))
        };

        let product_op = select! {
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Rem,
        };
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), binary)
            .boxed();

        let sum_op = select! {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
        };
        let sum = product
            .clone()
            .foldl(sum_op.then(product).repeated(), binary)
            .boxed();

        let compare_op = select! {
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
        };
        let comparison = sum
            .clone()
            .foldl(compare_op.then(sum).repeated(), binary)
            .boxed();

        let equality_op = select! {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
        };
        let equality = comparison
            .clone()
            .foldl(equality_op.then(comparison).repeated(), binary)
            .boxed();

        let and = equality
            .clone()
            .foldl(just(Token::AndAnd).to(BinaryOp::And).then(equality).repeated(), binary)
            .boxed();

        let or = and
            .clone()
            .foldl(just(Token::OrOr).to(BinaryOp::Or).then(and).repeated(), binary)
            .boxed();

        or.then(
            just(Token::Question)
                .ignore_then(expr.clone())
                .then_ignore(just(Token::Colon))
                .then(expr)
                .or_not(),
        )
        .map(|(cond, branches)| match branches {
            Some((then, otherwise)) => {
                Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
            }
            None => cond,
        })
        .labelled("expression")
    })
}

/// Parse a token stream into an expression tree.
pub fn parse(tokens: &[(Token, std::ops::Range<usize>)]) -> Result<Expr, Vec<SyntaxError>> {
    let token_iter = tokens
        .iter()
        .map(|(tok, span)| (tok.clone(), Span::from(span.clone())));

    let len = tokens.last().map_or(0, |(_, s)| s.end);
    let eoi: Span = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let (output, errors) = expr_parser()
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();

    if let Some(expr) = output
        && errors.is_empty()
    {
        return Ok(expr);
    }

    Err(errors
        .into_iter()
        .map(|e| SyntaxError {
            span: e.span().into_range(),
            message: e.to_string(),
        })
        .collect())
}
