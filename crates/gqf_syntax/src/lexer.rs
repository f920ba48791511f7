//! Lexer for executable GraphQL documents.

use crate::span::Span;
use crate::token::{Token, TokenKind};

/// A lexer over GraphQL source text.
///
/// Commas, whitespace, the byte order mark and `#` comments are insignificant
/// and skipped as trivia. Malformed input produces [`TokenKind::Error`]
/// tokens; the parser turns those into diagnostics.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: u32,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    /// Returns the current position.
    #[inline]
    pub fn pos(&self) -> u32 {
        self.pos
    }

    /// Returns the source text covered by a span.
    #[inline]
    pub fn span_text(&self, span: Span) -> &'a str {
        &self.source[span.start as usize..span.end as usize]
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos as usize).copied()
    }

    #[inline]
    fn peek_at(&self, offset: u32) -> Option<u8> {
        self.bytes.get((self.pos + offset) as usize).copied()
    }

    #[inline]
    fn advance(&mut self) {
        self.pos += 1;
    }

    #[inline]
    fn advance_by(&mut self, n: u32) {
        self.pos += n;
    }

    /// Advances over one (possibly multi-byte) character.
    fn advance_char(&mut self) {
        let len = self.source[self.pos as usize..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        self.advance_by(len as u32);
    }

    fn punct(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    /// Scans the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let start = self.pos;

        let Some(c) = self.peek() else {
            return Token::new(TokenKind::Eof, Span::new(start, start));
        };

        let kind = match c {
            b'!' => self.punct(TokenKind::Bang),
            b'$' => self.punct(TokenKind::Dollar),
            b'&' => self.punct(TokenKind::Amp),
            b'(' => self.punct(TokenKind::LParen),
            b')' => self.punct(TokenKind::RParen),
            b':' => self.punct(TokenKind::Colon),
            b'=' => self.punct(TokenKind::Eq),
            b'@' => self.punct(TokenKind::At),
            b'[' => self.punct(TokenKind::LBracket),
            b']' => self.punct(TokenKind::RBracket),
            b'{' => self.punct(TokenKind::LBrace),
            b'|' => self.punct(TokenKind::Pipe),
            b'}' => self.punct(TokenKind::RBrace),
            b'.' => {
                if self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'.') {
                    self.advance_by(3);
                    TokenKind::Spread
                } else {
                    self.advance();
                    TokenKind::Error
                }
            }
            b'"' => self.lex_string(),
            b'-' | b'0'..=b'9' => self.lex_number(),
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => self.lex_name(),
            _ => {
                self.advance_char();
                TokenKind::Error
            }
        };

        Token::new(kind, Span::new(start, self.pos))
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\n' | b'\r' | b',') => self.advance(),
                Some(0xEF) if self.peek_at(1) == Some(0xBB) && self.peek_at(2) == Some(0xBF) => {
                    self.advance_by(3);
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' || c == b'\r' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_name(&mut self) -> TokenKind {
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Name
    }

    fn skip_digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
    }

    fn lex_number(&mut self) -> TokenKind {
        let mut is_float = false;

        if self.peek() == Some(b'-') {
            self.advance();
        }

        match self.peek() {
            Some(b'0') => {
                self.advance();
                if matches!(self.peek(), Some(b'0'..=b'9')) {
                    // Leading zeros are not allowed
                    self.skip_digits();
                    return TokenKind::Error;
                }
            }
            Some(b'1'..=b'9') => self.skip_digits(),
            _ => return TokenKind::Error,
        }

        if self.peek() == Some(b'.') {
            self.advance();
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return TokenKind::Error;
            }
            self.skip_digits();
            is_float = true;
        }

        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return TokenKind::Error;
            }
            self.skip_digits();
            is_float = true;
        }

        // `1abc` or `1.2.3` must not split into two tokens
        if matches!(
            self.peek(),
            Some(b'.' | b'_' | b'a'..=b'z' | b'A'..=b'Z')
        ) {
            return TokenKind::Error;
        }

        if is_float {
            TokenKind::FloatLiteral
        } else {
            TokenKind::IntLiteral
        }
    }

    fn lex_string(&mut self) -> TokenKind {
        if self.peek_at(1) == Some(b'"') && self.peek_at(2) == Some(b'"') {
            self.advance_by(3);
            return self.lex_block_string();
        }

        self.advance();
        while let Some(c) = self.peek() {
            match c {
                b'"' => {
                    self.advance();
                    return TokenKind::StringLiteral;
                }
                b'\\' => {
                    if self.peek_at(1).is_some() {
                        self.advance_by(2);
                    } else {
                        self.advance();
                    }
                }
                b'\n' | b'\r' => return TokenKind::Error,
                _ => self.advance(),
            }
        }

        TokenKind::Error
    }

    fn lex_block_string(&mut self) -> TokenKind {
        while let Some(c) = self.peek() {
            if c == b'"' && self.peek_at(1) == Some(b'"') && self.peek_at(2) == Some(b'"') {
                self.advance_by(3);
                return TokenKind::BlockStringLiteral;
            }
            if c == b'\\'
                && self.peek_at(1) == Some(b'"')
                && self.peek_at(2) == Some(b'"')
                && self.peek_at(3) == Some(b'"')
            {
                self.advance_by(4);
                continue;
            }
            self.advance();
        }

        TokenKind::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token();
            if token.kind == TokenKind::Eof {
                break;
            }
            kinds.push(token.kind);
        }
        kinds
    }

    #[test]
    fn test_lex_subscription() {
        assert_eq!(
            kinds("subscription Tick($id: ID!) { tick(id: $id) }"),
            vec![
                TokenKind::Name,
                TokenKind::Name,
                TokenKind::LParen,
                TokenKind::Dollar,
                TokenKind::Name,
                TokenKind::Colon,
                TokenKind::Name,
                TokenKind::Bang,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::Name,
                TokenKind::LParen,
                TokenKind::Name,
                TokenKind::Colon,
                TokenKind::Dollar,
                TokenKind::Name,
                TokenKind::RParen,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_trivia_is_skipped() {
        assert_eq!(
            kinds("\u{FEFF}# leading comment\n{ a, b # trailing\n }"),
            vec![
                TokenKind::LBrace,
                TokenKind::Name,
                TokenKind::Name,
                TokenKind::RBrace
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0 -12 3.5 1e10 2.5E-3"), {
            use TokenKind::*;
            vec![IntLiteral, IntLiteral, FloatLiteral, FloatLiteral, FloatLiteral]
        });
        assert_eq!(kinds("007"), vec![TokenKind::Error]);
        assert_eq!(kinds("1."), vec![TokenKind::Error]);
    }

    #[test]
    fn test_strings() {
        let source = r#""a \"quoted\" word" """block "" text""""#;
        assert_eq!(
            kinds(source),
            vec![TokenKind::StringLiteral, TokenKind::BlockStringLiteral]
        );
        assert_eq!(kinds("\"unterminated\n\""), {
            vec![TokenKind::Error, TokenKind::Error]
        });
    }

    #[test]
    fn test_spread_and_span_text() {
        let source = "...on";
        let mut lexer = Lexer::new(source);
        let spread = lexer.next_token();
        assert_eq!(spread.kind, TokenKind::Spread);
        let name = lexer.next_token();
        assert_eq!(lexer.span_text(name.span), "on");
        assert_eq!(lexer.pos(), 5);
    }

    #[test]
    fn test_non_ascii_outside_string_is_error() {
        assert_eq!(kinds("é"), vec![TokenKind::Error]);
    }
}
