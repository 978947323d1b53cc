//! Fixed-width instruction records and the opcode set

use serde::{Deserialize, Serialize};
use std::fmt;
use via_common::{ViaError, ViaResult};

/// Placeholder for an unused operand.
pub const OPERAND_NONE: u16 = 0xFFFF;

/// Serialized instruction width: one opcode byte plus three little-endian
/// 16-bit operands.
pub const INSTRUCTION_BYTES: usize = 7;

/// Runtime type tags used by `TypeAssert`.
pub mod type_tag {
    pub const NIL: u16 = 0;
    pub const INT: u16 = 1;
    pub const FLOAT: u16 = 2;
    pub const BOOL: u16 = 3;
    pub const STR: u16 = 4;

    pub fn name(tag: u16) -> &'static str {
        match tag {
            NIL => "nil",
            INT => "int",
            FLOAT => "float",
            BOOL => "bool",
            STR => "string",
            _ => "unknown",
        }
    }
}

/// The opcode set. Arithmetic comes in a generic (runtime-dispatched) form
/// plus typed variants emitted when the semantic pass proved both operand
/// types. Jump targets are absolute instruction indices; the label layer
/// lives in the builder and never reaches the emitted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// `R[a] <- R[b]`
    Move = 0,
    /// `R[a] <- const[b]`
    LoadK,
    /// `R[a] <- nil`
    LoadNil,

    // Generic arithmetic: `R[a] <- R[b] op R[c]`
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    // Integer-typed variants
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    ModInt,
    PowInt,
    // Float-typed variants (int operands coerce)
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    ModFloat,
    PowFloat,

    /// `R[a] <- -R[b]`
    Neg,
    /// `R[a] <- not truthy(R[b])`
    Not,
    /// `R[a] <- ~R[b]`
    BitNot,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    // Comparisons: `R[a] <- R[b] cmp R[c]`
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// `pc <- a`
    Jump,
    /// `if truthy(R[a]) { pc <- b }`
    JumpIfTrue,
    /// `if !truthy(R[a]) { pc <- b }`
    JumpIfFalse,

    /// Call `R[a]` with `b` args in `R[a+1]..`, result into `R[c]`
    Call,
    /// Like `Call` but reuses the current frame
    TailCall,
    /// Return `R[a]`
    Return,
    ReturnNil,

    /// `R[a] <- closure(proto[b])`
    Closure,
    /// `R[a] <- upvalue[b]`
    GetUpvalue,
    /// `upvalue[b] <- R[a]`
    SetUpvalue,
    /// `R[a] <- globals[b]`
    GetGlobal,
    /// `globals[b] <- R[a]`
    SetGlobal,

    /// `R[a] <- []` with capacity hint `b`
    NewArray,
    /// `R[a] <- {}`
    NewTable,
    /// `R[a] <- R[b][R[c]]`
    GetIndex,
    /// `R[a][R[b]] <- R[c]`
    SetIndex,
    /// `R[a] <- length(R[b])`
    Len,

    /// `R[a] <- tostring(R[b]) .. tostring(R[c])`
    Concat,
    /// Error unless `tag(R[a]) == b`
    TypeAssert,

    /// Stop the machine; exit status in effect
    Halt,
}

/// Opcodes in discriminant order; index with the opcode byte to decode.
const OPCODES: &[Opcode] = &[
    Opcode::Move,
    Opcode::LoadK,
    Opcode::LoadNil,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::Pow,
    Opcode::AddInt,
    Opcode::SubInt,
    Opcode::MulInt,
    Opcode::DivInt,
    Opcode::ModInt,
    Opcode::PowInt,
    Opcode::AddFloat,
    Opcode::SubFloat,
    Opcode::MulFloat,
    Opcode::DivFloat,
    Opcode::ModFloat,
    Opcode::PowFloat,
    Opcode::Neg,
    Opcode::Not,
    Opcode::BitNot,
    Opcode::BitAnd,
    Opcode::BitOr,
    Opcode::BitXor,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Lt,
    Opcode::Le,
    Opcode::Gt,
    Opcode::Ge,
    Opcode::Jump,
    Opcode::JumpIfTrue,
    Opcode::JumpIfFalse,
    Opcode::Call,
    Opcode::TailCall,
    Opcode::Return,
    Opcode::ReturnNil,
    Opcode::Closure,
    Opcode::GetUpvalue,
    Opcode::SetUpvalue,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::NewArray,
    Opcode::NewTable,
    Opcode::GetIndex,
    Opcode::SetIndex,
    Opcode::Len,
    Opcode::Concat,
    Opcode::TypeAssert,
    Opcode::Halt,
];

impl Opcode {
    /// Case-insensitive lookup by mnemonic; the debugger's `exec` command
    /// uses this.
    pub fn parse(name: &str) -> Option<Opcode> {
        OPCODES
            .iter()
            .copied()
            .find(|op| format!("{:?}", op).eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ViaError;

    fn try_from(value: u8) -> ViaResult<Self> {
        OPCODES
            .get(value as usize)
            .copied()
            .ok_or_else(|| ViaError::image(format!("unknown opcode byte 0x{:02x}", value)))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One fixed-width instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl Instruction {
    pub fn new(op: Opcode, a: u16, b: u16, c: u16) -> Self {
        Self { op, a, b, c }
    }

    pub fn op_a(op: Opcode, a: u16) -> Self {
        Self::new(op, a, OPERAND_NONE, OPERAND_NONE)
    }

    pub fn op_ab(op: Opcode, a: u16, b: u16) -> Self {
        Self::new(op, a, b, OPERAND_NONE)
    }

    /// 7-byte little-endian wire form.
    pub fn encode(&self) -> [u8; INSTRUCTION_BYTES] {
        let a = self.a.to_le_bytes();
        let b = self.b.to_le_bytes();
        let c = self.c.to_le_bytes();
        [self.op as u8, a[0], a[1], b[0], b[1], c[0], c[1]]
    }

    pub fn decode(bytes: &[u8]) -> ViaResult<Self> {
        if bytes.len() < INSTRUCTION_BYTES {
            return Err(ViaError::image("truncated instruction record"));
        }
        Ok(Self {
            op: Opcode::try_from(bytes[0])?,
            a: u16::from_le_bytes([bytes[1], bytes[2]]),
            b: u16::from_le_bytes([bytes[3], bytes[4]]),
            c: u16::from_le_bytes([bytes[5], bytes[6]]),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12}", self.op.to_string())?;
        for operand in [self.a, self.b, self.c] {
            if operand == OPERAND_NONE {
                write!(f, " {:>5}", "-")?;
            } else {
                write!(f, " {:>5}", operand)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_decode_round_trip() {
        let instr = Instruction::new(Opcode::Call, 3, 2, 7);
        let decoded = Instruction::decode(&instr.encode()).unwrap();
        assert_eq!(decoded, instr);
    }

    #[test]
    fn unused_operands_are_sentinel() {
        let instr = Instruction::op_a(Opcode::ReturnNil, 0);
        assert_eq!(instr.b, OPERAND_NONE);
        let bytes = instr.encode();
        assert_eq!(&bytes[3..5], &[0xFF, 0xFF]);
    }

    #[test]
    fn every_opcode_survives_the_byte_round_trip() {
        for (i, &op) in OPCODES.iter().enumerate() {
            assert_eq!(op as u8 as usize, i, "discriminant order for {:?}", op);
            assert_eq!(Opcode::try_from(op as u8).unwrap(), op);
        }
    }

    #[test]
    fn unknown_opcode_byte_is_rejected() {
        assert!(Opcode::try_from(0xEE).is_err());
    }
}
