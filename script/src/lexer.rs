//! Lexer (tokenizer).

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{CompileError, CompileResult};
use crate::token::{Span, Token, TokenKind};

/// Source lexer.
pub struct Lexer<'a> {
    /// Source code.
    source: &'a str,
    /// Current byte position.
    pos: usize,
    /// Current line (1-based).
    line: usize,
    /// Current column (1-based).
    column: usize,
    /// Start of current token.
    token_start: usize,
    token_line: usize,
    token_column: usize,
    /// Whitespace was skipped before the current token.
    space_before: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer.
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            token_start: 0,
            token_line: 1,
            token_column: 1,
            space_before: false,
        }
    }

    /// Tokenize the entire source.
    pub fn tokenize(&mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> CompileResult<Token> {
        self.skip_whitespace_and_comments();

        self.token_start = self.pos;
        self.token_line = self.line;
        self.token_column = self.column;

        let ch = match self.current() {
            Some(ch) => ch,
            None => return Ok(self.make_token(TokenKind::Eof)),
        };

        if ch == '\n' {
            self.advance();
            return Ok(self.make_token(TokenKind::Newline));
        }

        if ch.is_ascii_digit() {
            return self.scan_number();
        }

        if ch == '"' || ch == '\'' {
            return self.scan_string(ch);
        }

        if ch == '_' || ch.is_ascii_lowercase() {
            return Ok(self.scan_identifier());
        }

        if ch.is_ascii_uppercase() {
            return Ok(self.scan_constant());
        }

        self.scan_punctuator(ch)
    }

    /// Skip spaces, tabs, carriage returns and `#` comments (not newlines).
    fn skip_whitespace_and_comments(&mut self) {
        let start = self.pos;
        loop {
            match self.current() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('\\') if self.peek() == Some('\n') => {
                    // line continuation
                    self.advance();
                    self.advance();
                }
                Some('#') => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        self.space_before = self.pos != start;
    }

    fn scan_number(&mut self) -> CompileResult<Token> {
        let mut value: i64 = 0;
        while let Some(ch) = self.current() {
            if ch == '_' && self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
                continue;
            }
            let digit = match ch.to_digit(10) {
                Some(d) => d as i64,
                None => break,
            };
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| CompileError::syntax("integer literal too large", self.span()))?;
            self.advance();
        }

        if self.current().map_or(false, |c| c.is_ascii_alphabetic() || c == '_') {
            return Err(CompileError::syntax("trailing characters in number", self.span()));
        }

        Ok(self.make_token(TokenKind::Integer(value)))
    }

    fn scan_string(&mut self, quote: char) -> CompileResult<Token> {
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            let ch = match self.current() {
                Some(ch) => ch,
                None => return Err(CompileError::syntax("unterminated string", self.span())),
            };
            self.advance();

            if ch == quote {
                break;
            }

            if ch != '\\' {
                value.push(ch);
                continue;
            }

            let escaped = match self.current() {
                Some(e) => e,
                None => return Err(CompileError::syntax("unterminated string", self.span())),
            };
            self.advance();

            if quote == '\'' {
                // single quotes only escape the quote and the backslash
                if escaped != '\'' && escaped != '\\' {
                    value.push('\\');
                }
                value.push(escaped);
                continue;
            }

            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                'e' => value.push('\x1b'),
                other => value.push(other),
            }
        }

        Ok(self.make_token(TokenKind::String(value)))
    }

    fn scan_identifier(&mut self) -> Token {
        self.scan_word();
        // predicate and bang method names
        if matches!(self.current(), Some('?') | Some('!')) && self.peek() != Some('=') {
            self.advance();
        }

        let text = &self.source[self.token_start..self.pos];
        let kind = TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Identifier(String::from(text)));
        self.make_token(kind)
    }

    fn scan_constant(&mut self) -> Token {
        self.scan_word();
        let text = &self.source[self.token_start..self.pos];
        self.make_token(TokenKind::Constant(String::from(text)))
    }

    fn scan_word(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_punctuator(&mut self, ch: char) -> CompileResult<Token> {
        self.advance();
        let next = self.current();

        let kind = match (ch, next) {
            ('=', Some('=')) => {
                self.advance();
                TokenKind::EqEq
            }
            ('!', Some('=')) => {
                self.advance();
                TokenKind::NotEq
            }
            ('<', Some('=')) => {
                self.advance();
                TokenKind::Le
            }
            ('>', Some('=')) => {
                self.advance();
                TokenKind::Ge
            }
            ('&', Some('&')) => {
                self.advance();
                TokenKind::AndAnd
            }
            ('|', Some('|')) => {
                self.advance();
                TokenKind::OrOr
            }
            ('=', _) => TokenKind::Assign,
            ('!', _) => TokenKind::Bang,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('(', _) => TokenKind::LeftParen,
            (')', _) => TokenKind::RightParen,
            (',', _) => TokenKind::Comma,
            ('.', _) => TokenKind::Dot,
            (';', _) => TokenKind::Semicolon,
            (other, _) => {
                return Err(CompileError::syntax(
                    alloc::format!("unexpected character '{}'", other.escape_debug()),
                    self.span(),
                ))
            }
        };

        Ok(self.make_token(kind))
    }

    fn current(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            self.pos += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn span(&self) -> Span {
        Span::new(self.token_start, self.pos, self.token_line, self.token_column)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.span(), self.space_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_command_call_tokens() {
        assert_eq!(
            kinds("puts 'hello world!'"),
            vec![
                TokenKind::Identifier("puts".into()),
                TokenKind::String("hello world!".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_and_predicates() {
        assert_eq!(
            kinds("fd_empty? != x<=1"),
            vec![
                TokenKind::Identifier("fd_empty?".into()),
                TokenKind::NotEq,
                TokenKind::Identifier("x".into()),
                TokenKind::Le,
                TokenKind::Integer(1),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n" 'c\n'"#),
            vec![
                TokenKind::String("a\tb\n".into()),
                TokenKind::String("c\\n".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comment_and_newline() {
        assert_eq!(
            kinds("1 # one\n2"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Newline,
                TokenKind::Integer(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_space_before() {
        let tokens = Lexer::new("foo (1) bar(2)").tokenize().unwrap();
        assert!(tokens[1].space_before);
        assert!(!tokens[5].space_before);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn test_integer_overflow() {
        assert!(Lexer::new("99999999999999999999").tokenize().is_err());
        assert_eq!(kinds("1_000")[0], TokenKind::Integer(1000));
    }
}
