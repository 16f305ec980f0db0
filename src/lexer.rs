//! Lexer for AIR/MLIR module text using logos
//!
//! Only the surface needed to outline a module is tokenized:
//! - Symbols: @seg, @herd_0
//! - SSA values: %c1, %arg4
//! - Integers and floats: 7, -1, 2.5
//! - Bare identifiers and op names: air.herd, arith.constant, index
//! - String literals: "air-to-aie"
//! - Punctuation: { } ( ) [ ] < > = : , ->
//!
//! Anything else is reported as a lexer error and skipped by consumers.

use logos::Logos;

/// Token types for module text
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Literals
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"-?[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    // Names
    #[regex(r"@[a-zA-Z_$.][a-zA-Z0-9_$.\-]*", |lex| lex.slice()[1..].to_string())]
    Symbol(String),

    #[regex(r"%[a-zA-Z0-9_$.\-#]+", |lex| lex.slice()[1..].to_string())]
    Value(String),

    #[regex(r"\^[a-zA-Z0-9_$.\-]+")]
    BlockLabel,

    #[regex(r"#[a-zA-Z_][a-zA-Z0-9_$.\-]*")]
    AttrAlias,

    #[regex(r"![a-zA-Z_][a-zA-Z0-9_$.\-]*")]
    TypeAlias,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_$.]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Punctuation
    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("<")]
    LAngle,

    #[token(">")]
    RAngle,

    #[token("->")]
    Arrow,

    #[token("=")]
    Equals,

    #[token(":")]
    Colon,

    #[token(",")]
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::Symbol(s) => write!(f, "@{}", s),
            Token::Value(s) => write!(f, "%{}", s),
            Token::BlockLabel => write!(f, "^bb"),
            Token::AttrAlias => write!(f, "#alias"),
            Token::TypeAlias => write!(f, "!type"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LAngle => write!(f, "<"),
            Token::RAngle => write!(f, ">"),
            Token::Arrow => write!(f, "->"),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
        }
    }
}

/// Stream of tokens with their byte offsets
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = (Result<Token, ()>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.inner.next()?;
        Some((token, self.inner.span().start))
    }
}

/// Lex `source` dropping anything the token set does not cover
pub fn tokens(source: &str) -> Vec<Token> {
    Lexer::new(source)
        .filter_map(|(token, _)| token.ok())
        .collect()
}
