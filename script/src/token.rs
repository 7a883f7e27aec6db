//! Token definitions.

use alloc::string::String;
use core::fmt;

/// Source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset.
    pub end: usize,
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based).
    pub column: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Span {
            start,
            end,
            line,
            column,
        }
    }
}

/// Token types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    /// Integer literal (42, 1_000)
    Integer(i64),
    /// String literal ('raw', "escaped\n")
    String(String),

    // Names
    /// Local variable or method name (may end in `?` or `!`)
    Identifier(String),
    /// Capitalized name (constant or class)
    Constant(String),

    // Keywords
    Def,
    Class,
    End,
    If,
    Elsif,
    Else,
    Then,
    While,
    Do,
    Return,
    Nil,
    True,
    False,
    SelfKw,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    Bang,
    AndAnd,
    OrOr,

    // Punctuation
    LeftParen,
    RightParen,
    Comma,
    Dot,
    Semicolon,
    Newline,

    /// End of input
    Eof,
}

impl TokenKind {
    /// Look up a keyword.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident {
            "def" => TokenKind::Def,
            "class" => TokenKind::Class,
            "end" => TokenKind::End,
            "if" => TokenKind::If,
            "elsif" => TokenKind::Elsif,
            "else" => TokenKind::Else,
            "then" => TokenKind::Then,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "return" => TokenKind::Return,
            "nil" => TokenKind::Nil,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "self" => TokenKind::SelfKw,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether the token ends a statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "integer {}", n),
            TokenKind::String(_) => write!(f, "string literal"),
            TokenKind::Identifier(name) => write!(f, "'{}'", name),
            TokenKind::Constant(name) => write!(f, "'{}'", name),
            TokenKind::Def => write!(f, "'def'"),
            TokenKind::Class => write!(f, "'class'"),
            TokenKind::End => write!(f, "'end'"),
            TokenKind::If => write!(f, "'if'"),
            TokenKind::Elsif => write!(f, "'elsif'"),
            TokenKind::Else => write!(f, "'else'"),
            TokenKind::Then => write!(f, "'then'"),
            TokenKind::While => write!(f, "'while'"),
            TokenKind::Do => write!(f, "'do'"),
            TokenKind::Return => write!(f, "'return'"),
            TokenKind::Nil => write!(f, "'nil'"),
            TokenKind::True => write!(f, "'true'"),
            TokenKind::False => write!(f, "'false'"),
            TokenKind::SelfKw => write!(f, "'self'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Percent => write!(f, "'%'"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::NotEq => write!(f, "'!='"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Le => write!(f, "'<='"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Ge => write!(f, "'>='"),
            TokenKind::Assign => write!(f, "'='"),
            TokenKind::Bang => write!(f, "'!'"),
            TokenKind::AndAnd => write!(f, "'&&'"),
            TokenKind::OrOr => write!(f, "'||'"),
            TokenKind::LeftParen => write!(f, "'('"),
            TokenKind::RightParen => write!(f, "')'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Semicolon => write!(f, "';'"),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token kind.
    pub kind: TokenKind,
    /// Source span.
    pub span: Span,
    /// Whitespace separates this token from the previous one.
    pub space_before: bool,
}

impl Token {
    /// Create a new token.
    pub fn new(kind: TokenKind, span: Span, space_before: bool) -> Self {
        Token {
            kind,
            span,
            space_before,
        }
    }

    /// Check if EOF.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
