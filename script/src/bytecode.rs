//! Bytecode blob format.
//!
//! A blob is a header followed by a flat list of ireps. Irep 0 is the
//! statement's top-level code; every other irep is a method body referenced
//! by a `Def` instruction. All integers are little-endian.
//!
//! ```text
//! header: "MRBS" | version u8 | flags u8 | top_slots u16 | length u32 | irep_count u16
//! irep:   nregs u16 | nparams u8 | reserved u8 | code_len u32 | code
//!         const_count u16 | consts (tag 0: i64, tag 1: u16 len + utf-8)
//!         sym_count u16   | syms (u16 len + utf-8)
//! ```

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::BytecodeError;

/// Blob magic.
pub const MAGIC: [u8; 4] = *b"MRBS";
/// Blob format version.
pub const FORMAT_VERSION: u8 = 1;
/// Header size in bytes.
pub const HEADER_LEN: usize = 14;

const TAG_INT: u8 = 0;
const TAG_STR: u8 = 1;

/// Opcode bytes.
pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const MOVE: u8 = 0x01;
    pub const LOADNIL: u8 = 0x02;
    pub const LOADTRUE: u8 = 0x03;
    pub const LOADFALSE: u8 = 0x04;
    pub const LOADSELF: u8 = 0x05;
    pub const LOADI: u8 = 0x06;
    pub const LOADK: u8 = 0x07;
    pub const GETTOP: u8 = 0x08;
    pub const SETTOP: u8 = 0x09;
    pub const GETCONST: u8 = 0x0A;
    pub const SETCONST: u8 = 0x0B;
    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const MUL: u8 = 0x12;
    pub const DIV: u8 = 0x13;
    pub const MOD: u8 = 0x14;
    pub const EQ: u8 = 0x15;
    pub const LT: u8 = 0x16;
    pub const LE: u8 = 0x17;
    pub const GT: u8 = 0x18;
    pub const GE: u8 = 0x19;
    pub const NOT: u8 = 0x1A;
    pub const JMP: u8 = 0x20;
    pub const JMPIF: u8 = 0x21;
    pub const JMPNOT: u8 = 0x22;
    pub const SEND: u8 = 0x30;
    pub const DEF: u8 = 0x31;
    pub const CLASS: u8 = 0x32;
    pub const ENDCLASS: u8 = 0x33;
    pub const RETURN: u8 = 0x34;
}

/// Decoded instruction.
///
/// Binary arithmetic and comparison ops read `R(a)` and `R(a+1)` and leave
/// the result in `R(a)`. `Send` takes the receiver in `R(a)` and `argc`
/// arguments in the registers above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Move(u8, u8),
    LoadNil(u8),
    LoadTrue(u8),
    LoadFalse(u8),
    LoadSelf(u8),
    LoadI(u8, i16),
    LoadK(u8, u16),
    GetTop(u8, u16),
    SetTop(u8, u16),
    GetConst(u8, u16),
    SetConst(u8, u16),
    Add(u8),
    Sub(u8),
    Mul(u8),
    Div(u8),
    Mod(u8),
    Eq(u8),
    Lt(u8),
    Le(u8),
    Gt(u8),
    Ge(u8),
    Not(u8),
    Jmp(u16),
    JmpIf(u8, u16),
    JmpNot(u8, u16),
    Send(u8, u16, u8),
    Def(u8, u16, u16),
    Class(u8, u16),
    EndClass,
    Return(u8),
}

impl Op {
    /// Append the encoded instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        use opcode::*;
        match *self {
            Op::Nop => out.push(NOP),
            Op::Move(a, b) => out.extend_from_slice(&[MOVE, a, b]),
            Op::LoadNil(a) => out.extend_from_slice(&[LOADNIL, a]),
            Op::LoadTrue(a) => out.extend_from_slice(&[LOADTRUE, a]),
            Op::LoadFalse(a) => out.extend_from_slice(&[LOADFALSE, a]),
            Op::LoadSelf(a) => out.extend_from_slice(&[LOADSELF, a]),
            Op::LoadI(a, i) => {
                out.extend_from_slice(&[LOADI, a]);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Op::LoadK(a, k) => encode_a_u16(out, LOADK, a, k),
            Op::GetTop(a, s) => encode_a_u16(out, GETTOP, a, s),
            Op::SetTop(a, s) => encode_a_u16(out, SETTOP, a, s),
            Op::GetConst(a, s) => encode_a_u16(out, GETCONST, a, s),
            Op::SetConst(a, s) => encode_a_u16(out, SETCONST, a, s),
            Op::Add(a) => out.extend_from_slice(&[ADD, a]),
            Op::Sub(a) => out.extend_from_slice(&[SUB, a]),
            Op::Mul(a) => out.extend_from_slice(&[MUL, a]),
            Op::Div(a) => out.extend_from_slice(&[DIV, a]),
            Op::Mod(a) => out.extend_from_slice(&[MOD, a]),
            Op::Eq(a) => out.extend_from_slice(&[EQ, a]),
            Op::Lt(a) => out.extend_from_slice(&[LT, a]),
            Op::Le(a) => out.extend_from_slice(&[LE, a]),
            Op::Gt(a) => out.extend_from_slice(&[GT, a]),
            Op::Ge(a) => out.extend_from_slice(&[GE, a]),
            Op::Not(a) => out.extend_from_slice(&[NOT, a]),
            Op::Jmp(t) => {
                out.push(JMP);
                out.extend_from_slice(&t.to_le_bytes());
            }
            Op::JmpIf(a, t) => encode_a_u16(out, JMPIF, a, t),
            Op::JmpNot(a, t) => encode_a_u16(out, JMPNOT, a, t),
            Op::Send(a, sym, argc) => {
                encode_a_u16(out, SEND, a, sym);
                out.push(argc);
            }
            Op::Def(a, sym, irep) => {
                encode_a_u16(out, DEF, a, sym);
                out.extend_from_slice(&irep.to_le_bytes());
            }
            Op::Class(a, sym) => encode_a_u16(out, CLASS, a, sym),
            Op::EndClass => out.push(ENDCLASS),
            Op::Return(a) => out.extend_from_slice(&[RETURN, a]),
        }
    }

    /// Decode the instruction at `pc`, returning it and the next pc.
    pub fn decode(code: &[u8], pc: usize) -> Result<(Op, usize), BytecodeError> {
        use opcode::*;
        let mut r = Reader::at(code, pc);
        let byte = r.u8()?;
        let op = match byte {
            NOP => Op::Nop,
            MOVE => Op::Move(r.u8()?, r.u8()?),
            LOADNIL => Op::LoadNil(r.u8()?),
            LOADTRUE => Op::LoadTrue(r.u8()?),
            LOADFALSE => Op::LoadFalse(r.u8()?),
            LOADSELF => Op::LoadSelf(r.u8()?),
            LOADI => Op::LoadI(r.u8()?, r.u16()? as i16),
            LOADK => Op::LoadK(r.u8()?, r.u16()?),
            GETTOP => Op::GetTop(r.u8()?, r.u16()?),
            SETTOP => Op::SetTop(r.u8()?, r.u16()?),
            GETCONST => Op::GetConst(r.u8()?, r.u16()?),
            SETCONST => Op::SetConst(r.u8()?, r.u16()?),
            ADD => Op::Add(r.u8()?),
            SUB => Op::Sub(r.u8()?),
            MUL => Op::Mul(r.u8()?),
            DIV => Op::Div(r.u8()?),
            MOD => Op::Mod(r.u8()?),
            EQ => Op::Eq(r.u8()?),
            LT => Op::Lt(r.u8()?),
            LE => Op::Le(r.u8()?),
            GT => Op::Gt(r.u8()?),
            GE => Op::Ge(r.u8()?),
            NOT => Op::Not(r.u8()?),
            JMP => Op::Jmp(r.u16()?),
            JMPIF => Op::JmpIf(r.u8()?, r.u16()?),
            JMPNOT => Op::JmpNot(r.u8()?, r.u16()?),
            SEND => Op::Send(r.u8()?, r.u16()?, r.u8()?),
            DEF => Op::Def(r.u8()?, r.u16()?, r.u16()?),
            CLASS => Op::Class(r.u8()?, r.u16()?),
            ENDCLASS => Op::EndClass,
            RETURN => Op::Return(r.u8()?),
            opcode => return Err(BytecodeError::InvalidOpcode { offset: pc, opcode }),
        };
        Ok((op, r.pos))
    }

    /// Highest register the instruction touches.
    fn max_register(&self) -> Option<usize> {
        let reg = match *self {
            Op::Nop | Op::Jmp(_) | Op::EndClass => return None,
            Op::Move(a, b) => a.max(b) as usize,
            Op::Add(a)
            | Op::Sub(a)
            | Op::Mul(a)
            | Op::Div(a)
            | Op::Mod(a)
            | Op::Eq(a)
            | Op::Lt(a)
            | Op::Le(a)
            | Op::Gt(a)
            | Op::Ge(a) => a as usize + 1,
            Op::Send(a, _, argc) => a as usize + argc as usize,
            Op::LoadNil(a)
            | Op::LoadTrue(a)
            | Op::LoadFalse(a)
            | Op::LoadSelf(a)
            | Op::LoadI(a, _)
            | Op::LoadK(a, _)
            | Op::GetTop(a, _)
            | Op::SetTop(a, _)
            | Op::GetConst(a, _)
            | Op::SetConst(a, _)
            | Op::Not(a)
            | Op::JmpIf(a, _)
            | Op::JmpNot(a, _)
            | Op::Def(a, _, _)
            | Op::Class(a, _)
            | Op::Return(a) => a as usize,
        };
        Some(reg)
    }
}

fn encode_a_u16(out: &mut Vec<u8>, opcode: u8, a: u8, operand: u16) {
    out.extend_from_slice(&[opcode, a]);
    out.extend_from_slice(&operand.to_le_bytes());
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Const {
    Int(i64),
    Str(String),
}

/// Instruction sequence plus its pools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Irep {
    /// Registers used, including `R0` (self).
    pub nregs: u16,
    /// Parameters, held in `R1..=nparams`.
    pub nparams: u8,
    pub code: Vec<u8>,
    pub consts: Vec<Const>,
    pub syms: Vec<String>,
}

impl Irep {
    /// Symbol at `index`.
    pub fn sym(&self, index: u16) -> &str {
        self.syms.get(index as usize).map_or("", |s| s.as_str())
    }
}

/// A decoded, validated blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Top-level slots the statement needs.
    pub top_slots: u16,
    /// Irep 0 is the entry point.
    pub ireps: Vec<Rc<Irep>>,
}

impl Program {
    /// Entry irep.
    pub fn entry(&self) -> Option<&Rc<Irep>> {
        self.ireps.first()
    }

    /// Serialize to a blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.push(FORMAT_VERSION);
        out.push(0);
        out.extend_from_slice(&self.top_slots.to_le_bytes());
        // patched below
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(self.ireps.len() as u16).to_le_bytes());

        for irep in &self.ireps {
            out.extend_from_slice(&irep.nregs.to_le_bytes());
            out.push(irep.nparams);
            out.push(0);
            out.extend_from_slice(&(irep.code.len() as u32).to_le_bytes());
            out.extend_from_slice(&irep.code);

            out.extend_from_slice(&(irep.consts.len() as u16).to_le_bytes());
            for constant in &irep.consts {
                match constant {
                    Const::Int(n) => {
                        out.push(TAG_INT);
                        out.extend_from_slice(&n.to_le_bytes());
                    }
                    Const::Str(s) => {
                        out.push(TAG_STR);
                        out.extend_from_slice(&(s.len() as u16).to_le_bytes());
                        out.extend_from_slice(s.as_bytes());
                    }
                }
            }

            out.extend_from_slice(&(irep.syms.len() as u16).to_le_bytes());
            for sym in &irep.syms {
                out.extend_from_slice(&(sym.len() as u16).to_le_bytes());
                out.extend_from_slice(sym.as_bytes());
            }
        }

        let len = (out.len() as u32).to_le_bytes();
        out[8..12].copy_from_slice(&len);
        out
    }

    /// Parse and structurally validate a blob.
    pub fn decode(blob: &[u8]) -> Result<Program, BytecodeError> {
        let mut r = Reader::at(blob, 0);
        if r.bytes(4)? != MAGIC {
            return Err(BytecodeError::BadMagic);
        }
        let version = r.u8()?;
        if version != FORMAT_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let _flags = r.u8()?;
        let top_slots = r.u16()?;
        let declared = r.u32()? as usize;
        if declared != blob.len() {
            return Err(BytecodeError::LengthMismatch {
                declared,
                actual: blob.len(),
            });
        }
        let count = r.u16()? as usize;
        if count == 0 {
            return Err(BytecodeError::Empty);
        }

        let mut ireps = Vec::with_capacity(count);
        for _ in 0..count {
            ireps.push(Rc::new(read_irep(&mut r)?));
        }
        if r.pos != blob.len() {
            return Err(BytecodeError::LengthMismatch {
                declared: r.pos,
                actual: blob.len(),
            });
        }

        let program = Program { top_slots, ireps };
        program.validate()?;
        Ok(program)
    }

    /// Check every irep's instruction stream against its pools.
    pub fn validate(&self) -> Result<(), BytecodeError> {
        for (index, irep) in self.ireps.iter().enumerate() {
            if index == 0 && irep.nparams != 0 {
                return Err(BytecodeError::RegisterOutOfRange { offset: 0 });
            }
            if irep.nregs == 0 || irep.nparams as u16 >= irep.nregs {
                return Err(BytecodeError::RegisterOutOfRange { offset: 0 });
            }
            self.validate_irep(irep)?;
        }
        Ok(())
    }

    fn validate_irep(&self, irep: &Irep) -> Result<(), BytecodeError> {
        let code = &irep.code;
        let mut boundaries = vec![false; code.len()];
        let mut jumps = Vec::new();
        let mut last = None;
        let mut pc = 0;

        while pc < code.len() {
            boundaries[pc] = true;
            let (op, next) = Op::decode(code, pc)?;

            if let Some(reg) = op.max_register() {
                if reg >= irep.nregs as usize {
                    return Err(BytecodeError::RegisterOutOfRange { offset: pc });
                }
            }

            match op {
                Op::LoadK(_, k) if k as usize >= irep.consts.len() => {
                    return Err(BytecodeError::ConstantOutOfRange { offset: pc })
                }
                Op::SetTop(_, slot) | Op::GetTop(_, slot) if slot >= self.top_slots => {
                    return Err(BytecodeError::RegisterOutOfRange { offset: pc })
                }
                Op::GetConst(_, sym)
                | Op::SetConst(_, sym)
                | Op::Send(_, sym, _)
                | Op::Class(_, sym)
                | Op::Def(_, sym, _)
                    if sym as usize >= irep.syms.len() =>
                {
                    return Err(BytecodeError::SymbolOutOfRange { offset: pc })
                }
                Op::Def(_, _, target) if target == 0 || target as usize >= self.ireps.len() => {
                    return Err(BytecodeError::IrepOutOfRange { offset: pc })
                }
                Op::Jmp(target) | Op::JmpIf(_, target) | Op::JmpNot(_, target) => {
                    jumps.push((pc, target as usize));
                }
                _ => {}
            }

            last = Some(op);
            pc = next;
        }

        for (offset, target) in jumps {
            if !boundaries.get(target).copied().unwrap_or(false) {
                return Err(BytecodeError::BadJumpTarget { offset });
            }
        }

        match last {
            Some(Op::Return(_)) | Some(Op::Jmp(_)) => Ok(()),
            _ => Err(BytecodeError::MissingReturn),
        }
    }
}

fn read_irep(r: &mut Reader<'_>) -> Result<Irep, BytecodeError> {
    let nregs = r.u16()?;
    let nparams = r.u8()?;
    let _reserved = r.u8()?;
    let code_len = r.u32()? as usize;
    let code = r.bytes(code_len)?.to_vec();

    let const_count = r.u16()? as usize;
    let mut consts = Vec::with_capacity(const_count);
    for _ in 0..const_count {
        let tag = r.u8()?;
        let constant = match tag {
            TAG_INT => Const::Int(r.i64()?),
            TAG_STR => Const::Str(r.string()?),
            tag => return Err(BytecodeError::InvalidConstant { tag }),
        };
        consts.push(constant);
    }

    let sym_count = r.u16()? as usize;
    let mut syms = Vec::with_capacity(sym_count);
    for _ in 0..sym_count {
        syms.push(r.string()?);
    }

    Ok(Irep {
        nregs,
        nparams,
        code,
        consts,
        syms,
    })
}

/// Bounds-checked little-endian reader.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at(data: &'a [u8], pos: usize) -> Self {
        Reader { data, pos }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], BytecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(BytecodeError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BytecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.bytes(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, BytecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, BytecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, BytecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, BytecodeError> {
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;
        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| BytecodeError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(code: Vec<Op>, nregs: u16) -> Program {
        let mut bytes = Vec::new();
        for op in &code {
            op.encode(&mut bytes);
        }
        Program {
            top_slots: 0,
            ireps: vec![Rc::new(Irep {
                nregs,
                nparams: 0,
                code: bytes,
                consts: vec![Const::Str("hi".into())],
                syms: vec!["puts".into()],
            })],
        }
    }

    #[test]
    fn test_blob_decodes() {
        let prog = program(
            vec![
                Op::LoadSelf(1),
                Op::LoadK(2, 0),
                Op::Send(1, 0, 1),
                Op::Return(1),
            ],
            3,
        );
        let blob = prog.encode();
        assert_eq!(&blob[..4], b"MRBS");
        assert_eq!(Program::decode(&blob).unwrap(), prog);
    }

    #[test]
    fn test_rejects_bad_header() {
        let blob = program(vec![Op::Return(0)], 1).encode();

        let mut bad = blob.clone();
        bad[0] = b'X';
        assert_eq!(Program::decode(&bad), Err(BytecodeError::BadMagic));

        let mut bad = blob.clone();
        bad[4] = 9;
        assert_eq!(
            Program::decode(&bad),
            Err(BytecodeError::UnsupportedVersion(9))
        );

        assert!(matches!(
            Program::decode(&blob[..blob.len() - 1]),
            Err(BytecodeError::LengthMismatch { .. })
        ));
        assert!(Program::decode(&[]).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_operands() {
        let blob = program(vec![Op::LoadNil(5), Op::Return(0)], 2).encode();
        assert_eq!(
            Program::decode(&blob),
            Err(BytecodeError::RegisterOutOfRange { offset: 0 })
        );

        let blob = program(vec![Op::LoadK(1, 7), Op::Return(0)], 2).encode();
        assert_eq!(
            Program::decode(&blob),
            Err(BytecodeError::ConstantOutOfRange { offset: 0 })
        );

        let blob = program(vec![Op::Def(1, 0, 1), Op::Return(0)], 2).encode();
        assert_eq!(
            Program::decode(&blob),
            Err(BytecodeError::IrepOutOfRange { offset: 0 })
        );
    }

    #[test]
    fn test_rejects_jump_into_instruction() {
        // offset 1 is the operand byte of LoadNil
        let blob = program(vec![Op::LoadNil(0), Op::Jmp(1)], 1).encode();
        assert_eq!(
            Program::decode(&blob),
            Err(BytecodeError::BadJumpTarget { offset: 2 })
        );
    }

    #[test]
    fn test_rejects_unknown_opcode_and_missing_return() {
        let mut prog = program(vec![Op::Return(0)], 1);
        Rc::make_mut(&mut prog.ireps[0]).code = vec![0xEE];
        assert_eq!(
            Program::decode(&prog.encode()),
            Err(BytecodeError::InvalidOpcode {
                offset: 0,
                opcode: 0xEE
            })
        );

        let blob = program(vec![Op::LoadNil(0)], 1).encode();
        assert_eq!(Program::decode(&blob), Err(BytecodeError::MissingReturn));
    }
}
