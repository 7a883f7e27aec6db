//! mmrb script engine
//!
//! A small Ruby-flavoured language for the mmrb shell firmware: a
//! single-pass front end that turns one source statement into a
//! self-contained bytecode blob, and a register VM whose global state
//! (classes, methods, constants, top-level locals) outlives each blob.
//!
//! # Architecture
//!
//! - `stream`: cursor over an in-memory source buffer
//! - `lexer` / `token`: tokenization
//! - `parser` / `ast`: statement parsing against an accumulating `Scope`
//! - `codegen`: register allocation and irep emission
//! - `bytecode`: blob wire format, opcode decoding, structural validation
//! - `value` / `class` / `builtins`: runtime values and builtin methods
//! - `vm`: the interpreter context (`load`, `begin`, `restart`, `run`)
//!
//! # Usage
//!
//! ```ignore
//! use mmrb_script::{Compiler, Scope, StreamSource, VmContext, VmLimits};
//!
//! let mut scope = Scope::new(None);
//! let mut source = StreamSource::memory("1 + 1");
//! let unit = Compiler::new().compile(&scope, &mut source)?;
//! scope.commit(unit.locals);
//!
//! let mut vm = VmContext::open(VmLimits::default());
//! vm.load(&unit.code)?;
//! vm.begin();
//! vm.run(&mut host);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod class;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod stream;
pub mod token;
pub mod value;
pub mod vm;

pub use bytecode::{Irep, Op, Program};
pub use class::{ClassId, ClassTable};
pub use codegen::{Compiler, Unit};
pub use error::{BytecodeError, CompileError, CompileResult, Exception, ExceptionKind};
pub use scope::Scope;
pub use stream::{SourceKind, StreamSource};
pub use value::Value;
pub use vm::{Host, RunStatus, VmContext, VmLimits};

/// Script engine version.
pub const VERSION: &str = "0.1.0";
