//! Bytecode builder: instruction emission and label patching

use crate::instruction::{Instruction, Opcode, OPERAND_NONE};
use via_common::{ViaError, ViaResult};

/// Symbolic jump target handed out by [`BytecodeBuilder::new_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// Collects instructions with side-band comments, and resolves forward
/// jumps: a jump emitted against an unplaced label carries a placeholder
/// operand that `resolve_labels` rewrites to the absolute target index.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    instructions: Vec<Instruction>,
    comments: Vec<String>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next emitted instruction will get.
    pub fn next_index(&self) -> u32 {
        self.instructions.len() as u32
    }

    pub fn emit(&mut self, instr: Instruction, comment: impl Into<String>) {
        self.instructions.push(instr);
        self.comments.push(comment.into());
    }

    pub fn new_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        Label(id)
    }

    /// Pin `label` to the current instruction index.
    pub fn place_label(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.next_index());
    }

    /// `Jump label`.
    pub fn emit_jump(&mut self, label: Label, comment: impl Into<String>) {
        self.patches.push((self.instructions.len(), label));
        self.emit(
            Instruction::op_a(Opcode::Jump, OPERAND_NONE),
            comment,
        );
    }

    /// `JumpIfTrue`/`JumpIfFalse cond, label`.
    pub fn emit_cond_jump(
        &mut self,
        op: Opcode,
        cond: u16,
        label: Label,
        comment: impl Into<String>,
    ) {
        debug_assert!(matches!(op, Opcode::JumpIfTrue | Opcode::JumpIfFalse));
        self.patches.push((self.instructions.len(), label));
        self.emit(Instruction::op_ab(op, cond, OPERAND_NONE), comment);
    }

    /// Rewrite every jump placeholder to its label's absolute index. An
    /// unresolved label is a compile error; the emitted stream contains no
    /// label artifacts afterwards.
    pub fn resolve_labels(&mut self) -> ViaResult<()> {
        for &(index, label) in &self.patches {
            let target = self.labels[label.0 as usize]
                .ok_or_else(|| ViaError::codegen(format!("unresolved label {}", label.0)))?;
            if target >= OPERAND_NONE as u32 {
                return Err(ViaError::codegen("function too large: jump target overflow"));
            }
            let instr = &mut self.instructions[index];
            match instr.op {
                Opcode::Jump => instr.a = target as u16,
                Opcode::JumpIfTrue | Opcode::JumpIfFalse => instr.b = target as u16,
                other => {
                    return Err(ViaError::codegen(format!(
                        "label patch on non-jump opcode {}",
                        other
                    )))
                }
            }
        }
        self.patches.clear();
        Ok(())
    }

    pub fn finish(self) -> (Vec<Instruction>, Vec<String>) {
        debug_assert!(self.patches.is_empty(), "labels must be resolved first");
        (self.instructions, self.comments)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn forward_jump_is_patched_to_absolute_index() {
        let mut b = BytecodeBuilder::new();
        let end = b.new_label();
        b.emit_jump(end, "skip");
        b.emit(Instruction::op_a(Opcode::LoadNil, 0), "");
        b.emit(Instruction::op_a(Opcode::LoadNil, 1), "");
        b.place_label(end);
        b.emit(Instruction::op_a(Opcode::Halt, 0), "");
        b.resolve_labels().unwrap();
        let (instrs, _) = b.finish();
        assert_eq!(instrs[0].op, Opcode::Jump);
        assert_eq!(instrs[0].a, 3);
    }

    #[test]
    fn backward_jump_targets_placed_label() {
        let mut b = BytecodeBuilder::new();
        let head = b.new_label();
        b.place_label(head);
        b.emit(Instruction::op_a(Opcode::LoadNil, 0), "");
        b.emit_cond_jump(Opcode::JumpIfFalse, 0, head, "loop");
        b.resolve_labels().unwrap();
        assert_eq!(b.instructions()[1].b, 0);
    }

    #[test]
    fn unplaced_label_is_a_compile_error() {
        let mut b = BytecodeBuilder::new();
        let dangling = b.new_label();
        b.emit_jump(dangling, "");
        assert!(b.resolve_labels().is_err());
    }
}
