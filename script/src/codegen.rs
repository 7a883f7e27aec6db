//! Code generator.
//!
//! Lowers a parsed statement into a self-contained bytecode blob. Registers
//! are allocated stack-wise: `R0` holds self, method frames keep their
//! locals in `R1..`, and temporaries are pushed above them.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use log::trace;

use crate::ast::{BinaryOp, Expr, LocalRef, MethodDef, UnaryOp};
use crate::bytecode::{Const, Irep, Op, Program};
use crate::error::{CompileError, CompileResult};
use crate::parser::Parser;
use crate::scope::Scope;
use crate::stream::StreamSource;

/// Output of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Encoded bytecode blob.
    pub code: Vec<u8>,
    /// Top-level locals to commit to the scope once the blob is kept.
    pub locals: Vec<String>,
}

/// Statement compiler.
#[derive(Debug, Clone)]
pub struct Compiler {
    max_registers: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { max_registers: 256 }
    }

    /// Cap the registers any single irep may use.
    pub fn with_register_limit(limit: usize) -> Self {
        Compiler {
            max_registers: limit.clamp(2, 256),
        }
    }

    /// Compile the rest of `source` against `scope`.
    ///
    /// The scope is only read; the caller commits `Unit::locals` after the
    /// blob has been stored.
    pub fn compile(&self, scope: &Scope, source: &mut StreamSource<'_>) -> CompileResult<Unit> {
        let text = source.read_to_end();
        let ast = Parser::new(text, scope)?.parse_program()?;

        let top_slots = u16::try_from(scope.sp() + ast.new_locals.len())
            .map_err(|_| CompileError::TooManyLocals)?;

        let mut gen = Generator {
            ireps: Vec::new(),
            max_registers: self.max_registers,
        };
        // irep 0 is the entry point
        gen.ireps.push(None);

        let mut b = IrepBuilder::new(1, 0);
        let dst = b.push(gen.max_registers)?;
        gen.body(&mut b, &ast.body, dst)?;
        b.emit(Op::Return(dst));
        gen.ireps[0] = Some(b.finish()?);

        let ireps = gen.ireps.into_iter().flatten().map(Rc::new).collect::<Vec<_>>();
        let program = Program { top_slots, ireps };
        let code = program.encode();
        trace!("[COMPILE] {} bytes, {} ireps", code.len(), program.ireps.len());

        Ok(Unit {
            code,
            locals: ast.new_locals,
        })
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Irep under construction.
struct IrepBuilder {
    code: Vec<u8>,
    consts: Vec<Const>,
    syms: Vec<String>,
    nparams: u8,
    /// Next free register.
    sp: usize,
    /// High-water mark.
    nregs: usize,
    /// Register holding the class while compiling a class body.
    class_reg: Option<u8>,
}

impl IrepBuilder {
    fn new(sp: usize, nparams: u8) -> Self {
        IrepBuilder {
            code: Vec::new(),
            consts: Vec::new(),
            syms: Vec::new(),
            nparams,
            sp,
            nregs: sp,
            class_reg: None,
        }
    }

    fn push(&mut self, limit: usize) -> CompileResult<u8> {
        if self.sp >= limit {
            return Err(CompileError::TooManyRegisters);
        }
        let reg = self.sp as u8;
        self.sp += 1;
        self.nregs = self.nregs.max(self.sp);
        Ok(reg)
    }

    fn pop(&mut self, count: usize) {
        self.sp -= count;
    }

    fn emit(&mut self, op: Op) {
        op.encode(&mut self.code);
    }

    fn here(&self) -> CompileResult<u16> {
        u16::try_from(self.code.len()).map_err(|_| CompileError::CodeTooLarge)
    }

    /// Emit a jump with a placeholder target; returns the patch position.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        self.code.len() - 2
    }

    fn patch(&mut self, at: usize, target: u16) {
        self.code[at..at + 2].copy_from_slice(&target.to_le_bytes());
    }

    fn patch_here(&mut self, at: usize) -> CompileResult<()> {
        let target = self.here()?;
        self.patch(at, target);
        Ok(())
    }

    fn sym(&mut self, name: &str) -> CompileResult<u16> {
        let index = match self.syms.iter().position(|s| s == name) {
            Some(index) => index,
            None => {
                self.syms.push(String::from(name));
                self.syms.len() - 1
            }
        };
        u16::try_from(index).map_err(|_| CompileError::TooManyConstants)
    }

    fn constant(&mut self, value: Const) -> CompileResult<u16> {
        let index = match self.consts.iter().position(|c| *c == value) {
            Some(index) => index,
            None => {
                self.consts.push(value);
                self.consts.len() - 1
            }
        };
        u16::try_from(index).map_err(|_| CompileError::TooManyConstants)
    }

    fn finish(self) -> CompileResult<Irep> {
        if self.code.len() > u16::MAX as usize {
            return Err(CompileError::CodeTooLarge);
        }
        Ok(Irep {
            nregs: self.nregs as u16,
            nparams: self.nparams,
            code: self.code,
            consts: self.consts,
            syms: self.syms,
        })
    }
}

struct Generator {
    /// Slot per irep; filled when the irep is finished.
    ireps: Vec<Option<Irep>>,
    max_registers: usize,
}

impl Generator {
    fn body(&mut self, b: &mut IrepBuilder, body: &[Expr], dst: u8) -> CompileResult<()> {
        if body.is_empty() {
            b.emit(Op::LoadNil(dst));
        }
        for expr in body {
            self.expr(b, expr, dst)?;
        }
        Ok(())
    }

    fn temp(&self, b: &mut IrepBuilder) -> CompileResult<u8> {
        b.push(self.max_registers)
    }

    fn load_self(&self, b: &mut IrepBuilder, dst: u8) {
        match b.class_reg {
            Some(class) => b.emit(Op::Move(dst, class)),
            None => b.emit(Op::LoadSelf(dst)),
        }
    }

    fn expr(&mut self, b: &mut IrepBuilder, expr: &Expr, dst: u8) -> CompileResult<()> {
        match expr {
            Expr::Nil => b.emit(Op::LoadNil(dst)),
            Expr::True => b.emit(Op::LoadTrue(dst)),
            Expr::False => b.emit(Op::LoadFalse(dst)),
            Expr::SelfRef => self.load_self(b, dst),
            Expr::Integer(n) => match i16::try_from(*n) {
                Ok(small) => b.emit(Op::LoadI(dst, small)),
                Err(_) => {
                    let k = b.constant(Const::Int(*n))?;
                    b.emit(Op::LoadK(dst, k));
                }
            },
            Expr::Str(s) => {
                let k = b.constant(Const::Str(s.clone()))?;
                b.emit(Op::LoadK(dst, k));
            }
            Expr::Local(LocalRef::Top(slot)) => b.emit(Op::GetTop(dst, *slot)),
            Expr::Local(LocalRef::Frame(reg)) => {
                if *reg != dst {
                    b.emit(Op::Move(dst, *reg));
                }
            }
            Expr::Const(name) => {
                let sym = b.sym(name)?;
                b.emit(Op::GetConst(dst, sym));
            }
            Expr::AssignLocal(LocalRef::Top(slot), value) => {
                self.expr(b, value, dst)?;
                b.emit(Op::SetTop(dst, *slot));
            }
            Expr::AssignLocal(LocalRef::Frame(reg), value) => {
                self.expr(b, value, *reg)?;
                if *reg != dst {
                    b.emit(Op::Move(dst, *reg));
                }
            }
            Expr::AssignConst(name, value) => {
                self.expr(b, value, dst)?;
                let sym = b.sym(name)?;
                b.emit(Op::SetConst(dst, sym));
            }
            Expr::Binary(op, lhs, rhs) => self.binary(b, *op, lhs, rhs, dst)?,
            Expr::Unary(UnaryOp::Not, operand) => {
                self.expr(b, operand, dst)?;
                b.emit(Op::Not(dst));
            }
            Expr::Unary(UnaryOp::Neg, operand) => {
                let recv = self.temp(b)?;
                self.expr(b, operand, recv)?;
                let sym = b.sym("-@")?;
                b.emit(Op::Send(recv, sym, 0));
                b.emit(Op::Move(dst, recv));
                b.pop(1);
            }
            Expr::And(lhs, rhs) => {
                self.expr(b, lhs, dst)?;
                let skip = b.emit_jump(Op::JmpNot(dst, 0));
                self.expr(b, rhs, dst)?;
                b.patch_here(skip)?;
            }
            Expr::Or(lhs, rhs) => {
                self.expr(b, lhs, dst)?;
                let skip = b.emit_jump(Op::JmpIf(dst, 0));
                self.expr(b, rhs, dst)?;
                b.patch_here(skip)?;
            }
            Expr::Call {
                receiver,
                name,
                args,
            } => self.call(b, receiver.as_deref(), name, args, dst)?,
            Expr::If {
                cond,
                then_body,
                else_body,
            } => {
                self.expr(b, cond, dst)?;
                let to_else = b.emit_jump(Op::JmpNot(dst, 0));
                self.body(b, then_body, dst)?;
                let to_end = b.emit_jump(Op::Jmp(0));
                b.patch_here(to_else)?;
                self.body(b, else_body, dst)?;
                b.patch_here(to_end)?;
            }
            Expr::While { cond, body } => {
                let top = b.here()?;
                self.expr(b, cond, dst)?;
                let exit = b.emit_jump(Op::JmpNot(dst, 0));
                self.body(b, body, dst)?;
                b.emit(Op::Jmp(top));
                b.patch_here(exit)?;
                b.emit(Op::LoadNil(dst));
            }
            Expr::Def(def) => self.def(b, def, dst)?,
            Expr::Class { name, body } => {
                let class = self.temp(b)?;
                let sym = b.sym(name)?;
                b.emit(Op::Class(class, sym));
                b.class_reg = Some(class);
                let result = self.body(b, body, dst);
                b.class_reg = None;
                result?;
                b.emit(Op::EndClass);
                b.pop(1);
            }
            Expr::Return(value) => {
                match value {
                    Some(value) => self.expr(b, value, dst)?,
                    None => b.emit(Op::LoadNil(dst)),
                }
                b.emit(Op::Return(dst));
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        b: &mut IrepBuilder,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        dst: u8,
    ) -> CompileResult<()> {
        let a = self.temp(b)?;
        let _rhs_reg = self.temp(b)?;
        self.expr(b, lhs, a)?;
        self.expr(b, rhs, a + 1)?;
        b.emit(match op {
            BinaryOp::Add => Op::Add(a),
            BinaryOp::Sub => Op::Sub(a),
            BinaryOp::Mul => Op::Mul(a),
            BinaryOp::Div => Op::Div(a),
            BinaryOp::Mod => Op::Mod(a),
            BinaryOp::Eq | BinaryOp::NotEq => Op::Eq(a),
            BinaryOp::Lt => Op::Lt(a),
            BinaryOp::Le => Op::Le(a),
            BinaryOp::Gt => Op::Gt(a),
            BinaryOp::Ge => Op::Ge(a),
        });
        if op == BinaryOp::NotEq {
            b.emit(Op::Not(a));
        }
        b.emit(Op::Move(dst, a));
        b.pop(2);
        Ok(())
    }

    fn call(
        &mut self,
        b: &mut IrepBuilder,
        receiver: Option<&Expr>,
        name: &str,
        args: &[Expr],
        dst: u8,
    ) -> CompileResult<()> {
        let recv = self.temp(b)?;
        match receiver {
            Some(expr) => self.expr(b, expr, recv)?,
            None => self.load_self(b, recv),
        }
        for arg in args {
            let reg = self.temp(b)?;
            self.expr(b, arg, reg)?;
        }
        let argc = u8::try_from(args.len()).map_err(|_| CompileError::TooManyRegisters)?;
        let sym = b.sym(name)?;
        b.emit(Op::Send(recv, sym, argc));
        if recv != dst {
            b.emit(Op::Move(dst, recv));
        }
        b.pop(1 + args.len());
        Ok(())
    }

    fn def(&mut self, b: &mut IrepBuilder, def: &MethodDef, dst: u8) -> CompileResult<()> {
        let index = self.ireps.len();
        let irep_index = u16::try_from(index).map_err(|_| CompileError::TooManyConstants)?;
        self.ireps.push(None);

        let mut method = IrepBuilder::new(1 + def.locals as usize, def.params);
        let ret = self.temp(&mut method)?;
        self.body(&mut method, &def.body, ret)?;
        method.emit(Op::Return(ret));
        self.ireps[index] = Some(method.finish()?);

        let sym = b.sym(&def.name)?;
        b.emit(Op::Def(dst, sym, irep_index));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn compile(src: &str) -> CompileResult<Unit> {
        Compiler::new().compile(&Scope::new(None), &mut StreamSource::memory(src))
    }

    #[test]
    fn test_blob_is_valid() {
        let unit = compile("puts 'hello world!'").unwrap();
        let program = Program::decode(&unit.code).unwrap();
        assert_eq!(program.ireps.len(), 1);
        assert_eq!(program.ireps[0].syms, vec![String::from("puts")]);
        assert_eq!(program.top_slots, 0);
    }

    #[test]
    fn test_method_gets_own_irep() {
        let unit = compile("def add(a, b); a + b; end").unwrap();
        let program = Program::decode(&unit.code).unwrap();
        assert_eq!(program.ireps.len(), 2);
        assert_eq!(program.ireps[1].nparams, 2);
        assert!(program.ireps[1].nregs >= 3);
    }

    #[test]
    fn test_new_locals_reported_not_committed() {
        let mut scope = Scope::new(None);
        scope.commit(vec!["x".into()]);
        let unit = Compiler::new()
            .compile(&scope, &mut StreamSource::memory("y = x"))
            .unwrap();
        assert_eq!(unit.locals, vec![String::from("y")]);
        assert_eq!(scope.sp(), 1);
        assert_eq!(Program::decode(&unit.code).unwrap().top_slots, 2);
    }

    #[test]
    fn test_source_is_consumed() {
        let mut source = StreamSource::memory("1 + 1");
        Compiler::new().compile(&Scope::new(None), &mut source).unwrap();
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_register_limit() {
        let deep = "1 + (1 + (1 + (1 + (1 + (1 + 1)))))";
        assert!(Compiler::new().compile(&Scope::new(None), &mut StreamSource::memory(deep)).is_ok());
        assert_eq!(
            Compiler::with_register_limit(4)
                .compile(&Scope::new(None), &mut StreamSource::memory(deep))
                .unwrap_err(),
            CompileError::TooManyRegisters
        );
    }

    #[test]
    fn test_syntax_error_propagates() {
        assert!(matches!(compile("def"), Err(CompileError::Syntax { .. })));
    }
}
