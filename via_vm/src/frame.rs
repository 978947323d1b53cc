//! Call frames and register-file geometry

use crate::object::VmFunction;
use std::rc::Rc;

/// Total register file size.
pub const REGISTER_FILE_SIZE: usize = 65536;

/// Each frame owns a fixed 256-slot window; `base = depth * 256`.
pub const FRAME_WINDOW: usize = 256;

/// Maximum live frames (the file holds exactly this many windows).
pub const MAX_CALL_DEPTH: usize = REGISTER_FILE_SIZE / FRAME_WINDOW;

/// One activation record. `dst` is the caller-frame register the return
/// value lands in, recorded at call time.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub return_pc: u32,
    pub base: usize,
    pub dst: u16,
    pub local_slots: u16,
    /// `None` only for the main frame.
    pub closure: Option<Rc<VmFunction>>,
    /// Errors unwinding through this frame stop here.
    pub error_handler: bool,
}

impl CallFrame {
    pub fn main(local_slots: u16) -> Self {
        Self {
            return_pc: 0,
            base: 0,
            dst: 0,
            local_slots,
            closure: None,
            error_handler: false,
        }
    }
}
