//! Lexical scopes and per-function resolution state

use crate::Ty;
use serde::Serialize;
use smallvec::SmallVec;

/// Where an identifier landed after resolution. Attached to the symbol's
/// node id; read by codegen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resolution {
    Local(u16),
    Upvalue(u16),
    Global(u16),
    Unresolved,
}

/// One closure capture: either a local slot of the directly enclosing
/// function, or one of the enclosing function's own upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capture {
    pub from_parent: bool,
    pub index: u16,
}

/// A local binding inside a function frame.
#[derive(Debug, Clone)]
pub struct LocalBinding {
    pub name: String,
    pub slot: u16,
    pub ty: Ty,
    pub is_const: bool,
    pub initialized: bool,
}

/// Named capture record kept during resolution so repeated references reuse
/// the same upvalue index and carry the binding's metadata along.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub name: String,
    pub capture: Capture,
    pub ty: Ty,
    pub is_const: bool,
}

/// The highest local slot a function may use; the rest of the 256-register
/// frame window is temporary space for codegen.
pub const MAX_LOCAL_SLOTS: u16 = 200;

/// Per-function resolution frame: a stack of lexical scopes over one flat
/// local list, plus the function's accumulated captures.
///
/// Slots are never reused after a scope pops. An inner closure may hold an
/// open upvalue into any slot until the whole frame unwinds, so
/// reclaiming slots per-scope would alias captured variables.
#[derive(Debug, Default)]
pub struct FuncFrame {
    locals: Vec<LocalBinding>,
    scope_marks: SmallVec<[usize; 8]>,
    next_slot: u16,
    pub captures: Vec<CaptureRecord>,
    pub ret: Ty,
    pub loop_depth: u32,
}

impl FuncFrame {
    pub fn new(ret: Ty) -> Self {
        Self {
            ret,
            ..Self::default()
        }
    }

    pub fn enter_scope(&mut self) {
        self.scope_marks.push(self.locals.len());
    }

    pub fn exit_scope(&mut self) {
        let mark = self.scope_marks.pop().unwrap_or(0);
        self.locals.truncate(mark);
    }

    /// Declare a local in the current scope. Returns `None` when the frame
    /// is out of slots.
    pub fn declare(
        &mut self,
        name: &str,
        ty: Ty,
        is_const: bool,
        initialized: bool,
    ) -> Option<u16> {
        if self.next_slot >= MAX_LOCAL_SLOTS {
            return None;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.locals.push(LocalBinding {
            name: name.to_string(),
            slot,
            ty,
            is_const,
            initialized,
        });
        Some(slot)
    }

    /// Innermost binding with this name, if any.
    pub fn find_local(&self, name: &str) -> Option<&LocalBinding> {
        self.locals.iter().rev().find(|b| b.name == name)
    }

    pub fn find_local_mut(&mut self, name: &str) -> Option<&mut LocalBinding> {
        self.locals.iter_mut().rev().find(|b| b.name == name)
    }

    pub fn local_by_slot_mut(&mut self, slot: u16) -> Option<&mut LocalBinding> {
        self.locals.iter_mut().rev().find(|b| b.slot == slot)
    }

    pub fn find_capture(&self, name: &str) -> Option<u16> {
        self.captures
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as u16)
    }

    pub fn add_capture(&mut self, record: CaptureRecord) -> u16 {
        let idx = self.captures.len() as u16;
        self.captures.push(record);
        idx
    }

    /// Total slots this frame needs.
    pub fn slot_count(&self) -> u16 {
        self.next_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_and_pops() {
        let mut frame = FuncFrame::new(Ty::Any);
        frame.enter_scope();
        frame.declare("x", Ty::Int, false, true).unwrap();
        frame.enter_scope();
        frame.declare("x", Ty::Str, false, true).unwrap();
        assert_eq!(frame.find_local("x").unwrap().ty, Ty::Str);
        frame.exit_scope();
        assert_eq!(frame.find_local("x").unwrap().ty, Ty::Int);
        frame.exit_scope();
        assert!(frame.find_local("x").is_none());
    }

    #[test]
    fn slots_are_not_reused_across_sibling_scopes() {
        let mut frame = FuncFrame::new(Ty::Any);
        frame.enter_scope();
        frame.enter_scope();
        let a = frame.declare("a", Ty::Any, false, true).unwrap();
        frame.exit_scope();
        frame.enter_scope();
        let b = frame.declare("b", Ty::Any, false, true).unwrap();
        frame.exit_scope();
        assert_ne!(a, b);
        assert_eq!(frame.slot_count(), 2);
    }
}
