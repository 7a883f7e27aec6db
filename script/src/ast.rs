//! AST node definitions.
//!
//! Every statement is an expression; a body is a list of expressions whose
//! last value is the body's value.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level expressions.
    pub body: Vec<Expr>,
    /// Top-level locals first assigned by this statement, in slot order.
    pub new_locals: Vec<String>,
}

/// Binary operators with dedicated opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Where a local variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRef {
    /// Slot in the VM's persistent top-level slot file.
    Top(u16),
    /// Register in the current method frame.
    Frame(u8),
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    SelfRef,
    Integer(i64),
    Str(String),
    Local(LocalRef),
    Const(String),
    AssignLocal(LocalRef, Box<Expr>),
    AssignConst(String, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_body: Vec<Expr>,
        else_body: Vec<Expr>,
    },
    While {
        cond: Box<Expr>,
        body: Vec<Expr>,
    },
    Def(MethodDef),
    Class {
        name: String,
        body: Vec<Expr>,
    },
    Return(Option<Box<Expr>>),
}

/// A `def` node.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    /// Parameter count; parameters occupy registers 1..=params.
    pub params: u8,
    /// Total frame locals including parameters.
    pub locals: u8,
    pub body: Vec<Expr>,
}
