//! Compile, bytecode and runtime error types.

use alloc::format;
use alloc::string::String;
use core::fmt;

use crate::token::Span;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors produced while turning source text into a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Lexical or grammatical error.
    Syntax { message: String, span: Span },
    /// Statement needs more registers than an irep can address.
    TooManyRegisters,
    /// Constant pool or symbol table overflowed its u16 index.
    TooManyConstants,
    /// Too many top-level locals for the slot file.
    TooManyLocals,
    /// Generated code does not fit the u16 jump encoding.
    CodeTooLarge,
}

impl CompileError {
    /// Create a syntax error at `span`.
    pub fn syntax<S: Into<String>>(msg: S, span: Span) -> Self {
        CompileError::Syntax {
            message: msg.into(),
            span,
        }
    }

    /// Get error name.
    pub fn name(&self) -> &'static str {
        match self {
            CompileError::Syntax { .. } => "SyntaxError",
            _ => "CompileError",
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax { message, span } => write!(
                f,
                "SyntaxError: {} (line {}, column {})",
                message, span.line, span.column
            ),
            CompileError::TooManyRegisters => write!(f, "CompileError: statement too complex"),
            CompileError::TooManyConstants => write!(f, "CompileError: too many literals"),
            CompileError::TooManyLocals => write!(f, "CompileError: too many local variables"),
            CompileError::CodeTooLarge => write!(f, "CompileError: statement too long"),
        }
    }
}

/// Structural defects found while decoding a bytecode blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeError {
    /// Blob does not start with the expected magic.
    BadMagic,
    /// Blob was produced by an incompatible compiler.
    UnsupportedVersion(u8),
    /// Header length disagrees with the blob length.
    LengthMismatch { declared: usize, actual: usize },
    /// A section runs past the end of the blob.
    Truncated { offset: usize },
    /// Blob contains no ireps.
    Empty,
    /// Unknown opcode.
    InvalidOpcode { offset: usize, opcode: u8 },
    /// Unknown constant pool tag.
    InvalidConstant { tag: u8 },
    /// String data is not UTF-8.
    InvalidUtf8,
    /// Register operand outside the irep's register count.
    RegisterOutOfRange { offset: usize },
    /// Constant index outside the pool.
    ConstantOutOfRange { offset: usize },
    /// Symbol index outside the symbol table.
    SymbolOutOfRange { offset: usize },
    /// Irep index outside the blob.
    IrepOutOfRange { offset: usize },
    /// Jump target not on an instruction boundary.
    BadJumpTarget { offset: usize },
    /// Top-level code needs more registers than the VM provides.
    RegisterFileOverflow { needed: usize, available: usize },
    /// Irep falls off the end of its code without returning.
    MissingReturn,
}

impl fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeError::BadMagic => write!(f, "bad magic"),
            BytecodeError::UnsupportedVersion(v) => write!(f, "unsupported version {}", v),
            BytecodeError::LengthMismatch { declared, actual } => {
                write!(f, "length mismatch (declared {}, actual {})", declared, actual)
            }
            BytecodeError::Truncated { offset } => write!(f, "truncated at {}", offset),
            BytecodeError::Empty => write!(f, "no ireps"),
            BytecodeError::InvalidOpcode { offset, opcode } => {
                write!(f, "invalid opcode 0x{:02x} at {}", opcode, offset)
            }
            BytecodeError::InvalidConstant { tag } => write!(f, "invalid constant tag {}", tag),
            BytecodeError::InvalidUtf8 => write!(f, "invalid utf-8"),
            BytecodeError::RegisterOutOfRange { offset } => {
                write!(f, "register out of range at {}", offset)
            }
            BytecodeError::ConstantOutOfRange { offset } => {
                write!(f, "constant out of range at {}", offset)
            }
            BytecodeError::SymbolOutOfRange { offset } => {
                write!(f, "symbol out of range at {}", offset)
            }
            BytecodeError::IrepOutOfRange { offset } => write!(f, "irep out of range at {}", offset),
            BytecodeError::BadJumpTarget { offset } => write!(f, "bad jump target at {}", offset),
            BytecodeError::RegisterFileOverflow { needed, available } => write!(
                f,
                "needs {} registers, {} available",
                needed, available
            ),
            BytecodeError::MissingReturn => write!(f, "missing return"),
        }
    }
}

/// Builtin exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    RuntimeError,
    NoMethodError,
    NameError,
    ZeroDivisionError,
    TypeError,
    ArgumentError,
    RangeError,
    SystemStackError,
}

impl ExceptionKind {
    /// Get the class name.
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::NoMethodError => "NoMethodError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ArgumentError => "ArgumentError",
            ExceptionKind::RangeError => "RangeError",
            ExceptionKind::SystemStackError => "SystemStackError",
        }
    }
}

/// A raised, unrecovered script exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
}

impl Exception {
    pub fn new<S: Into<String>>(kind: ExceptionKind, msg: S) -> Self {
        Exception {
            kind,
            message: msg.into(),
        }
    }

    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        Self::new(ExceptionKind::RuntimeError, msg)
    }

    pub fn type_error<S: Into<String>>(msg: S) -> Self {
        Self::new(ExceptionKind::TypeError, msg)
    }

    pub fn argument<S: Into<String>>(msg: S) -> Self {
        Self::new(ExceptionKind::ArgumentError, msg)
    }

    pub fn name_error<S: Into<String>>(msg: S) -> Self {
        Self::new(ExceptionKind::NameError, msg)
    }

    /// `NoMethodError` for `name` sent to a receiver described by `recv`.
    pub fn no_method(name: &str, recv: &str) -> Self {
        Self::new(
            ExceptionKind::NoMethodError,
            format!("undefined method '{}' for {}", name, recv),
        )
    }

    pub fn zero_division() -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, "divided by 0")
    }

    pub fn overflow() -> Self {
        Self::new(ExceptionKind::RangeError, "integer overflow")
    }

    pub fn stack_too_deep() -> Self {
        Self::new(ExceptionKind::SystemStackError, "stack level too deep")
    }

    /// `ArgumentError` for an arity mismatch.
    pub fn arity(given: usize, expected: usize) -> Self {
        Self::argument(format!(
            "wrong number of arguments (given {}, expected {})",
            given, expected
        ))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}
