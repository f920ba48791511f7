//! Token kinds and structures for executable GraphQL.
//!
//! Keywords such as `query` or `on` are ordinary names in GraphQL; the
//! parser recognises them by position, so the lexer never emits them.

use crate::span::Span;
use std::fmt;

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    // Special tokens
    Eof,
    Error,

    // Literals
    Name,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    BlockStringLiteral,

    // Punctuation
    Bang,
    Dollar,
    Amp,
    LParen,
    RParen,
    Spread,
    Colon,
    Eq,
    At,
    LBracket,
    RBracket,
    LBrace,
    Pipe,
    RBrace,
}

impl TokenKind {
    /// Returns a human-readable description for diagnostics.
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Eof => "end of input",
            Self::Error => "invalid token",
            Self::Name => "name",
            Self::IntLiteral => "integer",
            Self::FloatLiteral => "float",
            Self::StringLiteral => "string",
            Self::BlockStringLiteral => "block string",
            Self::Bang => "'!'",
            Self::Dollar => "'$'",
            Self::Amp => "'&'",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::Spread => "'...'",
            Self::Colon => "':'",
            Self::Eq => "'='",
            Self::At => "'@'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::LBrace => "'{'",
            Self::Pipe => "'|'",
            Self::RBrace => "'}'",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A token with its location in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    /// Creates a new token.
    #[inline]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
