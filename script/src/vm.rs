//! Register virtual machine.
//!
//! One `VmContext` is opened per process and reused for every statement.
//! The class table, constants and top-level slot file persist; everything
//! else is transient and reset by `restart`.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::mem;
use core::ops::{Deref, DerefMut};

use hashbrown::HashMap;
use log::{debug, trace};

use crate::builtins;
use crate::bytecode::{Const, Irep, Op, Program};
use crate::class::{ClassId, ClassTable};
use crate::error::{BytecodeError, Exception};
use crate::value::Value;

/// Services the embedding firmware provides to running code.
pub trait Host {
    /// Write program output.
    fn write(&mut self, bytes: &[u8]);

    /// Call a native method. `None` if `name` is not a native.
    fn call_native(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, Exception>>;
}

/// Resource limits fixed at `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLimits {
    /// Register file size shared by all frames.
    pub registers: usize,
    /// Maximum nested method calls.
    pub call_depth: usize,
    /// Instructions per run before preemption; `None` runs to completion.
    pub step_budget: Option<u32>,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            registers: 256,
            call_depth: 32,
            step_budget: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Top-level code returned; the value is in `R0`.
    Completed,
    /// An exception was raised and not rescued.
    Raised,
    /// The step budget ran out.
    Preempted,
}

/// Saved caller frame.
#[derive(Debug, Clone)]
struct CallInfo {
    irep: Rc<Irep>,
    pc: usize,
    base: usize,
    target_class: ClassId,
}

/// Register storage: owned, or placed in a caller-provided region.
enum RegisterFile {
    Owned(Vec<Value>),
    Placed(&'static mut [Value]),
}

impl Deref for RegisterFile {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        match self {
            RegisterFile::Owned(regs) => regs,
            RegisterFile::Placed(regs) => regs,
        }
    }
}

impl DerefMut for RegisterFile {
    fn deref_mut(&mut self) -> &mut [Value] {
        match self {
            RegisterFile::Owned(regs) => regs,
            RegisterFile::Placed(regs) => regs,
        }
    }
}

impl Drop for RegisterFile {
    fn drop(&mut self) {
        // placed slots are never freed, but their values still are
        if let RegisterFile::Placed(regs) = self {
            regs.fill(Value::Nil);
        }
    }
}

enum Flow {
    Continue,
    Done,
}

/// The interpreter context.
pub struct VmContext {
    limits: VmLimits,

    // Persistent state.
    program: Option<Program>,
    classes: ClassTable,
    constants: HashMap<String, Value>,
    top: Vec<Value>,

    // Transient state, reset by `restart`.
    irep: Option<Rc<Irep>>,
    pc: usize,
    base: usize,
    regs: RegisterFile,
    callinfo: Vec<CallInfo>,
    exc: Option<Exception>,
    target_class: ClassId,
    error_code: u8,
    preemption: bool,
    steps: u32,
}

impl VmContext {
    /// Memory layout of the register file for `limits`.
    pub fn register_layout(limits: &VmLimits) -> Option<Layout> {
        Layout::array::<Value>(limits.registers.max(1)).ok()
    }

    /// Create a context with the default class table.
    pub fn open(limits: VmLimits) -> Self {
        let regs = vec![Value::Nil; limits.registers.max(1)];
        Self::build(limits, RegisterFile::Owned(regs))
    }

    /// Create a context whose register file is `registers`.
    ///
    /// The register limit becomes the slice length. `None` for an empty
    /// slice.
    pub fn with_registers(mut limits: VmLimits, registers: &'static mut [Value]) -> Option<Self> {
        if registers.is_empty() {
            return None;
        }
        registers.fill(Value::Nil);
        limits.registers = registers.len();
        Some(Self::build(limits, RegisterFile::Placed(registers)))
    }

    fn build(limits: VmLimits, regs: RegisterFile) -> Self {
        debug!(
            "[VM] open: {} registers, call depth {}",
            limits.registers, limits.call_depth
        );
        VmContext {
            limits,
            program: None,
            classes: ClassTable::new(),
            constants: HashMap::new(),
            top: Vec::new(),
            irep: None,
            pc: 0,
            base: 0,
            regs,
            callinfo: Vec::with_capacity(limits.call_depth),
            exc: None,
            target_class: ClassId::OBJECT,
            error_code: 0,
            preemption: false,
            steps: 0,
        }
    }

    /// The register file.
    pub fn registers(&self) -> &[Value] {
        &self.regs
    }

    /// Decode and install a blob. The context is untouched on error.
    pub fn load(&mut self, blob: &[u8]) -> Result<(), BytecodeError> {
        let program = Program::decode(blob)?;
        let needed = program.entry().map_or(0, |irep| irep.nregs as usize);
        if needed > self.regs.len() {
            return Err(BytecodeError::RegisterFileOverflow {
                needed,
                available: self.regs.len(),
            });
        }

        let slots = program.top_slots as usize;
        if self.top.len() < slots {
            self.top.resize(slots, Value::Nil);
        }
        trace!("[VM] loaded {} ireps, {} top slots", program.ireps.len(), slots);
        self.program = Some(program);
        Ok(())
    }

    /// Point execution at the loaded blob's entry. First run only.
    pub fn begin(&mut self) {
        self.irep = self.program.as_ref().and_then(|p| p.entry().cloned());
        self.pc = 0;
        self.base = 0;
        self.regs[0] = Value::Main;
        self.target_class = ClassId::OBJECT;
        self.steps = 0;
    }

    /// Reset all transient state and point execution at the loaded blob.
    ///
    /// Classes, methods, constants and top-level slots are kept.
    pub fn restart(&mut self) {
        for reg in self.regs.iter_mut() {
            *reg = Value::Nil;
        }
        self.callinfo.clear();
        self.exc = None;
        self.error_code = 0;
        self.preemption = false;
        self.begin();
    }

    /// Execute until the top-level code returns, raises or is preempted.
    pub fn run(&mut self, host: &mut dyn Host) -> RunStatus {
        let Some(mut irep) = self.irep.clone() else {
            self.regs[0] = Value::Nil;
            return RunStatus::Completed;
        };

        loop {
            if let Some(budget) = self.limits.step_budget {
                if self.steps >= budget {
                    self.preemption = true;
                    return RunStatus::Preempted;
                }
                self.steps += 1;
            }

            let step = match Op::decode(&irep.code, self.pc) {
                Ok((op, next)) => {
                    self.pc = next;
                    self.execute(op, &mut irep, host)
                }
                Err(_) => Err(Exception::runtime("illegal instruction")),
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done) => {
                    self.irep = None;
                    return RunStatus::Completed;
                }
                Err(exc) => {
                    debug!("[VM] raised {}", exc);
                    self.irep = Some(irep);
                    self.exc = Some(exc);
                    self.error_code = 1;
                    return RunStatus::Raised;
                }
            }
        }
    }

    fn execute(&mut self, op: Op, irep: &mut Rc<Irep>, host: &mut dyn Host) -> Result<Flow, Exception> {
        let base = self.base;
        match op {
            Op::Nop => {}
            Op::Move(a, b) => self.regs[base + a as usize] = self.regs[base + b as usize].clone(),
            Op::LoadNil(a) => self.set(a, Value::Nil),
            Op::LoadTrue(a) => self.set(a, Value::Bool(true)),
            Op::LoadFalse(a) => self.set(a, Value::Bool(false)),
            Op::LoadSelf(a) => self.regs[base + a as usize] = self.regs[base].clone(),
            Op::LoadI(a, i) => self.set(a, Value::Int(i as i64)),
            Op::LoadK(a, k) => {
                let value = match irep.consts.get(k as usize) {
                    Some(Const::Int(n)) => Value::Int(*n),
                    Some(Const::Str(s)) => Value::Str(s.clone()),
                    None => Value::Nil,
                };
                self.set(a, value);
            }
            Op::GetTop(a, slot) => {
                let value = self.top.get(slot as usize).cloned().unwrap_or_default();
                self.set(a, value);
            }
            Op::SetTop(a, slot) => {
                if let Some(entry) = self.top.get_mut(slot as usize) {
                    *entry = self.regs[base + a as usize].clone();
                }
            }
            Op::GetConst(a, sym) => {
                let name = irep.sym(sym);
                let value = match self.constants.get(name) {
                    Some(value) => value.clone(),
                    None => self.classes.lookup(name).map(Value::Class).ok_or_else(|| {
                        Exception::name_error(alloc::format!("uninitialized constant {}", name))
                    })?,
                };
                self.set(a, value);
            }
            Op::SetConst(a, sym) => {
                let value = self.regs[base + a as usize].clone();
                self.constants.insert(String::from(irep.sym(sym)), value);
            }
            Op::Add(a) => self.binary(a, "+", irep, host)?,
            Op::Sub(a) => self.binary(a, "-", irep, host)?,
            Op::Mul(a) => self.binary(a, "*", irep, host)?,
            Op::Div(a) => self.binary(a, "/", irep, host)?,
            Op::Mod(a) => self.binary(a, "%", irep, host)?,
            Op::Eq(a) => self.binary(a, "==", irep, host)?,
            Op::Lt(a) => self.binary(a, "<", irep, host)?,
            Op::Le(a) => self.binary(a, "<=", irep, host)?,
            Op::Gt(a) => self.binary(a, ">", irep, host)?,
            Op::Ge(a) => self.binary(a, ">=", irep, host)?,
            Op::Not(a) => {
                let value = !self.regs[base + a as usize].is_truthy();
                self.set(a, Value::Bool(value));
            }
            Op::Jmp(target) => self.pc = target as usize,
            Op::JmpIf(a, target) => {
                if self.regs[base + a as usize].is_truthy() {
                    self.pc = target as usize;
                }
            }
            Op::JmpNot(a, target) => {
                if !self.regs[base + a as usize].is_truthy() {
                    self.pc = target as usize;
                }
            }
            Op::Send(a, sym, argc) => {
                let name = String::from(irep.sym(sym));
                self.send(a, &name, argc, irep, host)?;
            }
            Op::Def(a, sym, index) => {
                let body = self
                    .program
                    .as_ref()
                    .and_then(|p| p.ireps.get(index as usize).cloned())
                    .ok_or_else(|| Exception::runtime("illegal instruction"))?;
                let name = irep.sym(sym);
                trace!("[VM] def {}#{}", self.classes.name(self.target_class), name);
                self.classes.define_method(self.target_class, name, body);
                self.set(a, Value::Symbol(String::from(name)));
            }
            Op::Class(a, sym) => {
                let name = irep.sym(sym);
                if let Some(existing) = self.constants.get(name) {
                    if !matches!(existing, Value::Class(_)) {
                        return Err(Exception::type_error(alloc::format!("{} is not a class", name)));
                    }
                }
                let id = self
                    .classes
                    .define_class(name)
                    .ok_or_else(|| Exception::runtime("too many classes"))?;
                self.target_class = id;
                self.set(a, Value::Class(id));
            }
            Op::EndClass => self.target_class = ClassId::OBJECT,
            Op::Return(a) => {
                let value = self.regs[base + a as usize].clone();
                match self.callinfo.pop() {
                    None => {
                        self.regs[0] = value;
                        return Ok(Flow::Done);
                    }
                    Some(ci) => {
                        // callee R0 is the caller's receiver register
                        self.regs[base] = value;
                        *irep = ci.irep;
                        self.pc = ci.pc;
                        self.base = ci.base;
                        self.target_class = ci.target_class;
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn set(&mut self, a: u8, value: Value) {
        self.regs[self.base + a as usize] = value;
    }

    /// Integer fast path, falling back to a method send.
    fn binary(&mut self, a: u8, name: &str, irep: &mut Rc<Irep>, host: &mut dyn Host) -> Result<(), Exception> {
        let lhs = self.base + a as usize;
        let operands = match (&self.regs[lhs], &self.regs[lhs + 1]) {
            (Value::Int(x), Value::Int(y)) => Some((*x, *y)),
            _ => None,
        };
        if let Some(result) = operands.and_then(|(x, y)| builtins::integer_op(name, x, y)) {
            self.regs[lhs] = result?;
            return Ok(());
        }
        self.send(a, name, 1, irep, host)
    }

    fn send(
        &mut self,
        a: u8,
        name: &str,
        argc: u8,
        irep: &mut Rc<Irep>,
        host: &mut dyn Host,
    ) -> Result<(), Exception> {
        let recv_reg = self.base + a as usize;
        let args_end = recv_reg + 1 + argc as usize;
        let recv = self.regs[recv_reg].clone();

        if let Some(method) = self.classes.find_method(recv.class_of(), name) {
            if argc != method.nparams {
                return Err(Exception::arity(argc as usize, method.nparams as usize));
            }
            if self.callinfo.len() >= self.limits.call_depth
                || recv_reg + method.nregs as usize > self.regs.len()
            {
                return Err(Exception::stack_too_deep());
            }
            for reg in &mut self.regs[args_end..recv_reg + method.nregs as usize] {
                *reg = Value::Nil;
            }
            self.callinfo.push(CallInfo {
                irep: mem::replace(irep, method),
                pc: self.pc,
                base: self.base,
                target_class: self.target_class,
            });
            self.pc = 0;
            self.base = recv_reg;
            return Ok(());
        }

        let args: Vec<Value> = self.regs[recv_reg + 1..args_end].to_vec();
        let result = builtins::call(&self.classes, host, &recv, name, &args)
            .or_else(|| host.call_native(name, &args))
            .unwrap_or_else(|| Err(Exception::no_method(name, &recv.describe(&self.classes))))?;
        self.regs[recv_reg] = result;
        Ok(())
    }

    /// Value left by the last completed run.
    pub fn result(&self) -> &Value {
        &self.regs[0]
    }

    /// Exception raised by the last run.
    pub fn exception(&self) -> Option<&Exception> {
        self.exc.as_ref()
    }

    pub fn error_code(&self) -> u8 {
        self.error_code
    }

    pub fn is_preempted(&self) -> bool {
        self.preemption
    }

    /// Current call depth.
    pub fn call_depth(&self) -> usize {
        self.callinfo.len()
    }

    /// Current instruction pointer.
    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn target_class(&self) -> ClassId {
        self.target_class
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    /// Persistent top-level slot.
    pub fn top_slot(&self, slot: usize) -> Option<&Value> {
        self.top.get(slot)
    }

    /// Whether a blob is loaded.
    pub fn is_loaded(&self) -> bool {
        self.program.is_some()
    }

    /// `inspect` of `value` using this context's class names.
    pub fn inspect(&self, value: &Value) -> String {
        value.inspect(&self.classes)
    }

    pub fn limits(&self) -> &VmLimits {
        &self.limits
    }
}
