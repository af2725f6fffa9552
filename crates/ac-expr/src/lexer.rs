use logos::Logos;
use std::fmt;

/// Token type for condition and formula expressions.
///
/// Dotted paths (`rollingActor.hp.pct`) lex as a single identifier; the
/// evaluator looks the whole path up in the flat context.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal.
    Number(f64),
    /// Quoted string literal (single or double quotes).
    Str(String),
    /// Identifier or dotted path.
    Ident(String),
    /// `@path` roll-data reference (stored without the `@`).
    RollData(String),
    /// Dice literal such as `2d6`, `d20` or `1dc`.
    Dice(String),
    /// `true`.
    True,
    /// `false`.
    False,
    /// `null` / `undefined`.
    Null,
    /// `+`.
    Plus,
    /// `-`.
    Minus,
    /// `*`.
    Star,
    /// `/`.
    Slash,
    /// `%`.
    Percent,
    /// `!`.
    Bang,
    /// `&&`.
    AndAnd,
    /// `||`.
    OrOr,
    /// `==` or `===`.
    EqEq,
    /// `!=` or `!==`.
    NotEq,
    /// `<`.
    Lt,
    /// `<=`.
    Le,
    /// `>`.
    Gt,
    /// `>=`.
    Ge,
    /// `?`.
    Question,
    /// `:`.
    Colon,
    /// `(`.
    LParen,
    /// `)`.
    RParen,
    /// `,`.
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::RollData(s) => write!(f, "@{s}"),
            Token::Dice(s) => write!(f, "{s}"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Bang => write!(f, "!"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

/// Internal logos token; converted to the owned `Token` after lexing.
#[derive(Logos, Debug)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    #[regex(r"'[^'\n]*'")]
    SingleQuoted,

    #[regex(r#""[^"\n]*""#)]
    DoubleQuoted,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z0-9_]+)*")]
    Ident,

    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z0-9_]+)*")]
    RollData,

    #[regex(r"[0-9]*d[0-9]+", priority = 5)]
    #[regex(r"[0-9]+dc", priority = 5)]
    Dice,

    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("null")]
    #[token("undefined")]
    Null,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("!")]
    Bang,

    #[token("&&")]
    AndAnd,

    #[token("||")]
    OrOr,

    #[token("==")]
    #[token("===")]
    EqEq,

    #[token("!=")]
    #[token("!==")]
    NotEq,

    #[token("<")]
    Lt,

    #[token("<=")]
    Le,

    #[token(">")]
    Gt,

    #[token(">=")]
    Ge,

    #[token("?")]
    Question,

    #[token(":")]
    Colon,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,
}

/// A lexer error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    /// Byte range of the offending input.
    pub span: std::ops::Range<usize>,
    /// Human-readable description.
    pub message: String,
}

/// Lex an expression into `(Token, Span)` pairs.
///
/// Lexing continues past errors so every bad character is reported; any
/// error makes the expression invalid.
pub fn lex(source: &str) -> (Vec<(Token, std::ops::Range<usize>)>, Vec<LexError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = RawToken::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        let token = match result {
            Ok(raw) => match raw {
                RawToken::Number => match slice.parse::<f64>() {
                    Ok(n) => Token::Number(n),
                    Err(_) => {
                        errors.push(LexError {
                            span: span.clone(),
                            message: format!("invalid number literal: {slice}"),
                        });
                        continue;
                    }
                },
                RawToken::SingleQuoted | RawToken::DoubleQuoted => {
                    Token::Str(slice[1..slice.len() - 1].to_string())
                }
                RawToken::Ident => Token::Ident(slice.to_string()),
                RawToken::RollData => Token::RollData(slice[1..].to_string()),
                RawToken::Dice => Token::Dice(slice.to_string()),
                RawToken::True => Token::True,
                RawToken::False => Token::False,
                RawToken::Null => Token::Null,
                RawToken::Plus => Token::Plus,
                RawToken::Minus => Token::Minus,
                RawToken::Star => Token::Star,
                RawToken::Slash => Token::Slash,
                RawToken::Percent => Token::Percent,
                RawToken::Bang => Token::Bang,
                RawToken::AndAnd => Token::AndAnd,
                RawToken::OrOr => Token::OrOr,
                RawToken::EqEq => Token::EqEq,
                RawToken::NotEq => Token::NotEq,
                RawToken::Lt => Token::Lt,
                RawToken::Le => Token::Le,
                RawToken::Gt => Token::Gt,
                RawToken::Ge => Token::Ge,
                RawToken::Question => Token::Question,
                RawToken::Colon => Token::Colon,
                RawToken::LParen => Token::LParen,
                RawToken::RParen => Token::RParen,
                RawToken::Comma => Token::Comma,
            },
            Err(()) => {
                errors.push(LexError {
                    span: span.clone(),
                    message: format!("unexpected character: {:?}", &source[span.clone()]),
                });
                continue;
            }
        };
        tokens.push((token, span));
    }

    (tokens, errors)
}
