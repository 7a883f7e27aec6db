//! Statement parser.
//!
//! Parses one shell statement into an AST, resolving local variable names
//! against the accumulated top-level `Scope`. Names first assigned by the
//! statement are collected in `Program::new_locals`; the scope itself is
//! never touched here.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::ast::*;
use crate::error::{CompileError, CompileResult};
use crate::lexer::Lexer;
use crate::scope::Scope;
use crate::token::{Span, Token, TokenKind};

/// Maximum locals (including parameters) in one method frame.
pub const MAX_FRAME_LOCALS: usize = 200;

/// Maximum expression nesting (parentheses, blocks, unary operators).
pub const MAX_NESTING: usize = 32;

/// Statement parser.
pub struct Parser<'s> {
    /// Tokens.
    tokens: Vec<Token>,
    /// Current position.
    pos: usize,
    /// Bindings from earlier statements.
    scope: &'s Scope,
    /// Top-level locals introduced by this statement.
    new_locals: Vec<String>,
    /// Method frame locals while inside a `def`.
    frame: Option<Vec<String>>,
    /// Inside a `class` body.
    in_class: bool,
    /// Current expression nesting.
    depth: usize,
}

impl<'s> Parser<'s> {
    /// Create a new parser.
    pub fn new(source: &str, scope: &'s Scope) -> CompileResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Parser {
            tokens,
            pos: 0,
            scope,
            new_locals: Vec::new(),
            frame: None,
            in_class: false,
            depth: 0,
        })
    }

    /// Parse the whole statement.
    pub fn parse_program(mut self) -> CompileResult<Program> {
        let body = self.parse_statements(&[])?;
        if !self.current().is_eof() {
            return Err(self.unexpected());
        }
        Ok(Program {
            body,
            new_locals: self.new_locals,
        })
    }

    /// Parse statements until EOF or one of `stops`.
    fn parse_statements(&mut self, stops: &[TokenKind]) -> CompileResult<Vec<Expr>> {
        let mut body = Vec::new();
        loop {
            self.skip_terminators();
            let kind = &self.current().kind;
            if *kind == TokenKind::Eof || stops.contains(kind) {
                break;
            }
            body.push(self.parse_statement()?);
            if !self.current().kind.is_terminator() && !stops.contains(&self.current().kind) {
                return Err(self.unexpected());
            }
        }
        Ok(body)
    }

    /// Parse a body that must be closed by one of `stops`.
    fn parse_block(&mut self, stops: &[TokenKind]) -> CompileResult<Vec<Expr>> {
        let body = self.parse_statements(stops)?;
        if self.current().is_eof() {
            return Err(CompileError::syntax(
                "unexpected end of input, expecting 'end'",
                self.current_span(),
            ));
        }
        Ok(body)
    }

    /// Parse a statement with optional `if`/`while` modifiers.
    fn parse_statement(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_expression()?;
        loop {
            if self.eat(&TokenKind::If) {
                let cond = self.parse_expression()?;
                expr = Expr::If {
                    cond: Box::new(cond),
                    then_body: vec![expr],
                    else_body: Vec::new(),
                };
            } else if self.eat(&TokenKind::While) {
                let cond = self.parse_expression()?;
                expr = Expr::While {
                    cond: Box::new(cond),
                    body: vec![expr],
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parse an expression.
    pub fn parse_expression(&mut self) -> CompileResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> CompileResult<Expr> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> CompileResult<Expr> {
        if self.peek_kind(1) == &TokenKind::Assign {
            match self.current().kind.clone() {
                TokenKind::Identifier(name) => {
                    if name.ends_with('?') || name.ends_with('!') {
                        return Err(CompileError::syntax(
                            format!("cannot assign to method name '{}'", name),
                            self.current_span(),
                        ));
                    }
                    self.advance();
                    self.advance();
                    let target = self.declare_local(&name)?;
                    self.skip_newlines();
                    let value = self.parse_assignment()?;
                    return Ok(Expr::AssignLocal(target, Box::new(value)));
                }
                TokenKind::Constant(name) => {
                    if self.frame.is_some() {
                        return Err(CompileError::syntax(
                            "dynamic constant assignment",
                            self.current_span(),
                        ));
                    }
                    self.advance();
                    self.advance();
                    self.skip_newlines();
                    let value = self.parse_assignment()?;
                    return Ok(Expr::AssignConst(name, Box::new(value)));
                }
                _ => {}
            }
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            self.skip_newlines();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            self.skip_newlines();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_comparison(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_term(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> CompileResult<Expr> {
        if self.eat(&TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.eat(&TokenKind::Minus) {
            // fold negative literals so i64::MIN stays representable
            if let TokenKind::Integer(n) = self.current().kind {
                self.advance();
                let expr = self.parse_postfix(Expr::Integer(-n))?;
                return Ok(expr);
            }
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> CompileResult<Expr> {
        while self.eat(&TokenKind::Dot) {
            self.skip_newlines();
            let name = match self.current().kind.clone() {
                TokenKind::Identifier(name) | TokenKind::Constant(name) => name,
                TokenKind::Class => String::from("class"),
                _ => return Err(self.unexpected()),
            };
            self.advance();
            let args = self.parse_call_args()?;
            expr = Expr::Call {
                receiver: Some(Box::new(expr)),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expr::Integer(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::True)
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::False)
            }
            TokenKind::SelfKw => {
                self.advance();
                Ok(Expr::SelfRef)
            }
            TokenKind::LeftParen => {
                self.advance();
                self.skip_newlines();
                if self.eat(&TokenKind::RightParen) {
                    return Ok(Expr::Nil);
                }
                let expr = self.parse_statement()?;
                self.skip_newlines();
                self.expect(&TokenKind::RightParen)?;
                Ok(expr)
            }
            TokenKind::Constant(name) => {
                self.advance();
                Ok(Expr::Const(name))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let paren_call =
                    self.check(&TokenKind::LeftParen) && !self.current().space_before;
                if !paren_call {
                    if let Some(local) = self.resolve_local(&name) {
                        return Ok(Expr::Local(local));
                    }
                }
                let args = self.parse_call_args()?;
                Ok(Expr::Call {
                    receiver: None,
                    name,
                    args,
                })
            }
            TokenKind::Def => self.parse_def(),
            TokenKind::Class => self.parse_class(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            _ => Err(self.unexpected()),
        }
    }

    /// Parse `(a, b)` or command-style `a, b` arguments.
    fn parse_call_args(&mut self) -> CompileResult<Vec<Expr>> {
        if self.check(&TokenKind::LeftParen) && !self.current().space_before {
            self.advance();
            self.skip_newlines();
            let mut args = Vec::new();
            if self.eat(&TokenKind::RightParen) {
                return Ok(args);
            }
            loop {
                args.push(self.parse_expression()?);
                self.skip_newlines();
                if self.eat(&TokenKind::Comma) {
                    self.skip_newlines();
                    continue;
                }
                self.expect(&TokenKind::RightParen)?;
                return Ok(args);
            }
        }

        if !self.starts_command_arg() {
            return Ok(Vec::new());
        }

        let mut args = vec![self.parse_expression()?];
        while self.eat(&TokenKind::Comma) {
            self.skip_newlines();
            args.push(self.parse_expression()?);
        }
        Ok(args)
    }

    /// Whether the current token begins a parenthesis-less argument.
    fn starts_command_arg(&self) -> bool {
        let token = self.current();
        if !token.space_before {
            return false;
        }
        match token.kind {
            TokenKind::Integer(_)
            | TokenKind::String(_)
            | TokenKind::Identifier(_)
            | TokenKind::Constant(_)
            | TokenKind::Nil
            | TokenKind::True
            | TokenKind::False
            | TokenKind::SelfKw
            | TokenKind::Bang
            | TokenKind::LeftParen => true,
            // `puts -1` but not `x - 1`
            TokenKind::Minus => !self.peek_token(1).space_before,
            _ => false,
        }
    }

    fn parse_def(&mut self) -> CompileResult<Expr> {
        let def_span = self.current_span();
        self.advance();
        if self.frame.is_some() {
            return Err(CompileError::syntax("nested method definition", def_span));
        }

        let name = self.parse_method_name()?;

        let mut params = Vec::new();
        let parenthesized = self.check(&TokenKind::LeftParen);
        if parenthesized {
            self.advance();
        }
        if !(parenthesized && self.check(&TokenKind::RightParen)) && !self.current().kind.is_terminator()
        {
            loop {
                match self.current().kind.clone() {
                    TokenKind::Identifier(param) if !params.contains(&param) => {
                        params.push(param);
                        self.advance();
                    }
                    TokenKind::Identifier(param) => {
                        return Err(CompileError::syntax(
                            format!("duplicated argument name '{}'", param),
                            self.current_span(),
                        ))
                    }
                    _ => return Err(self.unexpected()),
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        if parenthesized {
            self.expect(&TokenKind::RightParen)?;
        }

        let param_count = params.len();
        self.frame = Some(params);
        let body = self.parse_block(&[TokenKind::End]);
        let frame = self.frame.take().unwrap_or_default();
        let body = body?;
        self.expect(&TokenKind::End)?;

        Ok(Expr::Def(MethodDef {
            name,
            params: param_count as u8,
            locals: frame.len() as u8,
            body,
        }))
    }

    fn parse_method_name(&mut self) -> CompileResult<String> {
        let name = match &self.current().kind {
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::Plus => String::from("+"),
            TokenKind::Minus => String::from("-"),
            TokenKind::Star => String::from("*"),
            TokenKind::Slash => String::from("/"),
            TokenKind::Percent => String::from("%"),
            TokenKind::EqEq => String::from("=="),
            TokenKind::Lt => String::from("<"),
            TokenKind::Le => String::from("<="),
            TokenKind::Gt => String::from(">"),
            TokenKind::Ge => String::from(">="),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(name)
    }

    fn parse_class(&mut self) -> CompileResult<Expr> {
        let span = self.current_span();
        self.advance();
        if self.frame.is_some() {
            return Err(CompileError::syntax("class definition in method body", span));
        }
        if self.in_class {
            return Err(CompileError::syntax("nested class definition", span));
        }
        let name = match self.current().kind.clone() {
            TokenKind::Constant(name) => name,
            _ => {
                return Err(CompileError::syntax(
                    "class/module name must be CONSTANT",
                    self.current_span(),
                ))
            }
        };
        self.advance();

        self.in_class = true;
        let body = self.parse_block(&[TokenKind::End]);
        self.in_class = false;
        let body = body?;
        self.expect(&TokenKind::End)?;

        Ok(Expr::Class { name, body })
    }

    fn parse_if(&mut self) -> CompileResult<Expr> {
        self.advance();
        let cond = self.parse_expression()?;
        self.eat(&TokenKind::Then);
        let then_body = self.parse_block(&[TokenKind::Elsif, TokenKind::Else, TokenKind::End])?;

        let else_body = if self.check(&TokenKind::Elsif) {
            // `elsif` owns the closing `end`
            vec![self.parse_if()?]
        } else if self.eat(&TokenKind::Else) {
            let body = self.parse_block(&[TokenKind::End])?;
            self.expect(&TokenKind::End)?;
            body
        } else {
            self.expect(&TokenKind::End)?;
            Vec::new()
        };

        Ok(Expr::If {
            cond: Box::new(cond),
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> CompileResult<Expr> {
        self.advance();
        let cond = self.parse_expression()?;
        self.eat(&TokenKind::Do);
        let body = self.parse_block(&[TokenKind::End])?;
        self.expect(&TokenKind::End)?;
        Ok(Expr::While {
            cond: Box::new(cond),
            body,
        })
    }

    fn parse_return(&mut self) -> CompileResult<Expr> {
        self.advance();
        let kind = &self.current().kind;
        if kind.is_terminator()
            || matches!(
                kind,
                TokenKind::End | TokenKind::If | TokenKind::While | TokenKind::Else | TokenKind::Elsif
            )
        {
            return Ok(Expr::Return(None));
        }
        let value = self.parse_expression()?;
        Ok(Expr::Return(Some(Box::new(value))))
    }

    // ── Locals ──────────────────────────────────────────────

    fn resolve_local(&self, name: &str) -> Option<LocalRef> {
        if let Some(frame) = &self.frame {
            return frame
                .iter()
                .position(|n| n == name)
                .map(|i| LocalRef::Frame((i + 1) as u8));
        }
        if let Some(slot) = self.scope.lookup(name) {
            return Some(LocalRef::Top(slot));
        }
        self.new_locals
            .iter()
            .position(|n| n == name)
            .and_then(|i| u16::try_from(self.scope.sp() + i).ok())
            .map(LocalRef::Top)
    }

    fn declare_local(&mut self, name: &str) -> CompileResult<LocalRef> {
        if let Some(local) = self.resolve_local(name) {
            return Ok(local);
        }
        if let Some(frame) = &mut self.frame {
            if frame.len() >= MAX_FRAME_LOCALS {
                return Err(CompileError::TooManyLocals);
            }
            frame.push(String::from(name));
            return Ok(LocalRef::Frame(frame.len() as u8));
        }
        let slot = u16::try_from(self.scope.sp() + self.new_locals.len())
            .map_err(|_| CompileError::TooManyLocals)?;
        self.new_locals.push(String::from(name));
        Ok(LocalRef::Top(slot))
    }

    // ── Token helpers ───────────────────────────────────────

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: fn(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(CompileError::syntax("nesting too deep", self.current_span()));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn current(&self) -> &Token {
        self.peek_token(0)
    }

    fn peek_token(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        &self.peek_token(offset).kind
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current().kind == *kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> CompileResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(CompileError::syntax(
                format!("unexpected {}, expecting {}", self.current().kind, kind),
                self.current_span(),
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.current().kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn unexpected(&self) -> CompileError {
        CompileError::syntax(
            format!("unexpected {}", self.current().kind),
            self.current_span(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> CompileResult<Program> {
        let scope = Scope::new(None);
        Parser::new(src, &scope)?.parse_program()
    }

    #[test]
    fn test_command_call() {
        let program = parse("puts 'hello world!'").unwrap();
        assert_eq!(
            program.body,
            vec![Expr::Call {
                receiver: None,
                name: "puts".into(),
                args: vec![Expr::Str("hello world!".into())],
            }]
        );
    }

    #[test]
    fn test_precedence() {
        let program = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            program.body[0],
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Integer(1)),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Integer(2)),
                    Box::new(Expr::Integer(3))
                ))
            )
        );
    }

    #[test]
    fn test_new_locals_follow_scope() {
        let mut scope = Scope::new(None);
        scope.commit(vec!["a".into()]);
        let program = Parser::new("b = a; c = b", &scope)
            .unwrap()
            .parse_program()
            .unwrap();
        assert_eq!(program.new_locals, vec![String::from("b"), String::from("c")]);
        assert_eq!(
            program.body[0],
            Expr::AssignLocal(LocalRef::Top(1), Box::new(Expr::Local(LocalRef::Top(0))))
        );
    }

    #[test]
    fn test_unknown_name_is_call() {
        let program = parse("x - 1").unwrap();
        assert!(matches!(
            &program.body[0],
            Expr::Binary(BinaryOp::Sub, lhs, _) if matches!(**lhs, Expr::Call { .. })
        ));
        let program = parse("foo -1").unwrap();
        assert!(matches!(&program.body[0], Expr::Call { args, .. } if args.len() == 1));
    }

    #[test]
    fn test_def_frame_locals() {
        let program = parse("def sq(x); y = x * x; y; end").unwrap();
        match &program.body[0] {
            Expr::Def(def) => {
                assert_eq!(def.name, "sq");
                assert_eq!(def.params, 1);
                assert_eq!(def.locals, 2);
                assert_eq!(def.body.len(), 2);
            }
            other => panic!("expected def, got {:?}", other),
        }
        assert!(program.new_locals.is_empty());
    }

    #[test]
    fn test_method_body_cannot_see_top_level() {
        let mut scope = Scope::new(None);
        scope.commit(vec!["a".into()]);
        let program = Parser::new("def f; a; end", &scope)
            .unwrap()
            .parse_program()
            .unwrap();
        match &program.body[0] {
            Expr::Def(def) => assert!(matches!(def.body[0], Expr::Call { .. })),
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elsif_else() {
        let program = parse("if a then 1 elsif b then 2 else 3 end").unwrap();
        match &program.body[0] {
            Expr::If { else_body, .. } => {
                assert!(matches!(else_body[0], Expr::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_modifier_if() {
        let program = parse("puts 1 if true").unwrap();
        assert!(matches!(program.body[0], Expr::If { .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("1 +").is_err());
        assert!(parse("def f").is_err());
        assert!(parse("(1").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("class foo; end").is_err());
        assert!(parse("def f; def g; end; end").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = format!("{}1{}", "(".repeat(8), ")".repeat(8));
        assert!(parse(&shallow).is_ok());

        let deep = format!("{}1{}", "(".repeat(120), ")".repeat(120));
        match parse(&deep) {
            Err(CompileError::Syntax { message, .. }) => assert_eq!(message, "nesting too deep"),
            other => panic!("expected syntax error, got {:?}", other),
        }
        assert!(parse(&format!("{}true", "!".repeat(120))).is_err());
        assert!(parse(&format!("{}1{}", "if true then ".repeat(60), " end".repeat(60))).is_err());
    }

    #[test]
    fn test_empty_statement() {
        let program = parse("").unwrap();
        assert!(program.body.is_empty());
        let program = parse(" ; ").unwrap();
        assert!(program.body.is_empty());
    }
}
