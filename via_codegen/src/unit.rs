//! The compiled translation unit

use crate::constant::Constant;
use crate::instruction::{Instruction, Opcode, OPERAND_NONE};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One closure capture as the VM reads it at `Closure` time: either a local
/// slot of the enclosing frame or one of the enclosing closure's upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub from_parent: bool,
    pub index: u16,
}

/// Metadata for one compiled function body. Index 0 is the main body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncProto {
    /// Absolute instruction index of the entry point.
    pub entry: u32,
    pub param_count: u16,
    pub local_slots: u16,
    pub captures: Vec<CaptureSpec>,
}

/// A global binding's compile-time record; the VM's global array lines up
/// with this list by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSpec {
    pub name: String,
}

/// Everything the VM needs to run one compiled program.
#[derive(Debug, Clone)]
pub struct Unit {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub globals: Vec<GlobalSpec>,
    pub protos: Vec<FuncProto>,
    /// Per-instruction dump comments; empty after image decode.
    pub comments: Vec<String>,
}

impl Unit {
    pub fn main_proto(&self) -> &FuncProto {
        &self.protos[0]
    }

    /// Human-readable listing with operands and side-band comments.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (i, instr) in self.instructions.iter().enumerate() {
            let comment = self.comments.get(i).map(String::as_str).unwrap_or("");
            if comment.is_empty() {
                let _ = writeln!(out, "{:04}  {}", i, instr);
            } else {
                let _ = writeln!(out, "{:04}  {:<34} ; {}", i, instr.to_string(), comment);
            }
        }
        out
    }

    pub fn dump_constants(&self) -> String {
        let mut out = String::new();
        for (i, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "k{:<4} {}", i, constant);
        }
        out
    }

    /// Registers the main body needs; used by the CLI debugger's `locals`.
    pub fn main_local_slots(&self) -> u16 {
        self.main_proto().local_slots
    }

    /// Sanity pass over operand ranges; used by tests and image decoding.
    pub fn validate(&self) -> Result<(), String> {
        let code_len = self.instructions.len() as u32;
        for (i, instr) in self.instructions.iter().enumerate() {
            let target = match instr.op {
                Opcode::Jump => Some(instr.a),
                Opcode::JumpIfTrue | Opcode::JumpIfFalse => Some(instr.b),
                _ => None,
            };
            if let Some(target) = target {
                if target == OPERAND_NONE || target as u32 > code_len {
                    return Err(format!("instruction {} jumps out of range", i));
                }
            }
            if instr.op == Opcode::LoadK && instr.b as usize >= self.constants.len() {
                return Err(format!("instruction {} reads a missing constant", i));
            }
            if instr.op == Opcode::Closure && instr.b as usize >= self.protos.len() {
                return Err(format!("instruction {} builds a missing proto", i));
            }
        }
        for (i, proto) in self.protos.iter().enumerate() {
            if proto.entry > code_len {
                return Err(format!("proto {} entry out of range", i));
            }
        }
        Ok(())
    }
}
