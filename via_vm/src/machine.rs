//! The interpreter: fetch-decode-execute over a compiled unit

use crate::frame::{CallFrame, FRAME_WINDOW, MAX_CALL_DEPTH, REGISTER_FILE_SIZE};
use crate::natives::install_prelude;
use crate::object::{StringInterner, Upvalue, VmArray, VmFunction, VmTable};
use crate::value::{display_value, upvalue_get, values_equal, Value};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use via_codegen::{type_tag, Constant, Instruction, Opcode, Unit};

/// Errors the running program can raise. They unwind the frame stack
/// looking for an error-handler frame; unhandled, they stop the machine
/// with a traceback.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("negative exponent in integer power")]
    NegativeExponent,
    #[error("type error: {0}")]
    Type(String),
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("stack overflow: call depth exceeded")]
    StackOverflow,
    #[error("unknown global '{0}'")]
    UnknownGlobal(String),
    #[error("type assertion failed: expected {expected}, found {found}")]
    TypeAssert {
        expected: &'static str,
        found: &'static str,
    },
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("{0}")]
    Runtime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Halted,
}

/// One VM instance. Single-threaded, non-reentrant; it borrows the unit it
/// runs and owns everything else.
pub struct Vm<'u> {
    unit: &'u Unit,
    registers: Vec<Value>,
    frames: Vec<CallFrame>,
    pc: u32,
    globals: Vec<Value>,
    constants: Vec<Value>,
    interner: StringInterner,
    /// Upvalues still aliasing live register slots, sorted by slot.
    open_upvalues: Vec<(usize, Rc<RefCell<Upvalue>>)>,
    out: Box<dyn Write>,
    started: Instant,
    exit_code: i32,
    halted: bool,
    traceback: Option<String>,
}

impl<'u> Vm<'u> {
    pub fn new(unit: &'u Unit) -> Self {
        Self::with_output(unit, Box::new(std::io::stdout()))
    }

    pub fn with_output(unit: &'u Unit, out: Box<dyn Write>) -> Self {
        let mut interner = StringInterner::new();
        let constants = unit
            .constants
            .iter()
            .map(|c| match c {
                Constant::Nil => Value::Nil,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(x) => Value::Float(*x),
                Constant::Str(s) => Value::Str(interner.intern(s)),
            })
            .collect();
        let globals = install_prelude(&unit.globals, &mut interner);
        let main = unit.main_proto();
        Self {
            unit,
            registers: vec![Value::Nil; REGISTER_FILE_SIZE],
            frames: vec![CallFrame::main(main.local_slots)],
            pc: main.entry,
            globals,
            constants,
            interner,
            open_upvalues: Vec::new(),
            out,
            started: Instant::now(),
            exit_code: 0,
            halted: false,
            traceback: None,
        }
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    /// Run to completion. `Err` means an uncaught VM error; the traceback
    /// is available afterwards.
    pub fn run(&mut self) -> Result<i32, VmError> {
        while self.step()? == VmStatus::Running {}
        Ok(self.exit_code)
    }

    /// Execute one instruction, handling error unwinding.
    pub fn step(&mut self) -> Result<VmStatus, VmError> {
        if self.halted {
            return Ok(VmStatus::Halted);
        }
        let Some(&instr) = self.unit.instructions.get(self.pc as usize) else {
            self.halted = true;
            return Ok(VmStatus::Halted);
        };
        self.pc += 1;
        if let Err(err) = self.dispatch(instr) {
            self.unwind(err)?;
        }
        Ok(if self.halted {
            VmStatus::Halted
        } else {
            VmStatus::Running
        })
    }

    /// Execute an arbitrary instruction against the current state; used by
    /// the debugger's `exec` command. The pc is not advanced.
    pub fn execute_instruction(&mut self, instr: Instruction) -> Result<(), VmError> {
        self.dispatch(instr)
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    /// Current-frame register read; debugger surface.
    pub fn register(&self, r: u16) -> &Value {
        &self.registers[self.base() + r as usize]
    }

    /// The current frame's local slots; empty once the machine has torn
    /// down its last frame.
    pub fn local_values(&self) -> &[Value] {
        match self.frames.last() {
            Some(frame) => &self.registers[frame.base..frame.base + frame.local_slots as usize],
            None => &[],
        }
    }

    /// Resolved values of the current closure's upvalues.
    pub fn upvalue_values(&self) -> Vec<Value> {
        self.frames
            .last()
            .and_then(|f| f.closure.as_ref())
            .map(|closure| {
                closure
                    .upvalues
                    .iter()
                    .map(|uv| upvalue_get(uv, &self.registers))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    #[doc(hidden)]
    pub fn open_upvalue_slots(&self) -> Vec<usize> {
        self.open_upvalues.iter().map(|(slot, _)| *slot).collect()
    }

    // Hooks for the native prelude.

    pub fn write_line(&mut self, text: &str) -> Result<(), VmError> {
        writeln!(self.out, "{}", text).map_err(|e| VmError::Runtime(format!("i/o error: {}", e)))
    }

    pub fn intern_value(&mut self, text: &str) -> Value {
        Value::Str(self.interner.intern(text))
    }

    pub fn deep_clone_value(&mut self, value: &Value) -> Value {
        value.deep_clone(&mut self.interner)
    }

    pub fn request_exit(&mut self, code: i32) {
        self.exit_code = code;
        self.halted = true;
    }

    pub fn clock_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    fn reg(&self, r: u16) -> &Value {
        &self.registers[self.base() + r as usize]
    }

    fn set_reg(&mut self, r: u16, value: Value) {
        let at = self.base() + r as usize;
        self.registers[at] = value;
    }

    fn dispatch(&mut self, instr: Instruction) -> Result<(), VmError> {
        let Instruction { op, a, b, c } = instr;
        match op {
            Opcode::Move => {
                let value = self.reg(b).clone();
                self.set_reg(a, value);
            }
            Opcode::LoadK => {
                let value = self.constants[b as usize].clone();
                self.set_reg(a, value);
            }
            Opcode::LoadNil => self.set_reg(a, Value::Nil),

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
                let result = arith_generic(op, self.reg(b), self.reg(c))?;
                self.set_reg(a, result);
            }
            Opcode::AddInt
            | Opcode::SubInt
            | Opcode::MulInt
            | Opcode::DivInt
            | Opcode::ModInt
            | Opcode::PowInt => {
                let result = arith_int(op, self.reg(b), self.reg(c))?;
                self.set_reg(a, result);
            }
            Opcode::AddFloat
            | Opcode::SubFloat
            | Opcode::MulFloat
            | Opcode::DivFloat
            | Opcode::ModFloat
            | Opcode::PowFloat => {
                let result = arith_float(op, self.reg(b), self.reg(c))?;
                self.set_reg(a, result);
            }

            Opcode::Neg => {
                let result = match self.reg(b) {
                    Value::Int(i) => Value::Int(i.wrapping_neg()),
                    Value::Float(x) => Value::Float(-x),
                    other => {
                        return Err(VmError::Type(format!(
                            "cannot negate a {} value",
                            other.type_name()
                        )))
                    }
                };
                self.set_reg(a, result);
            }
            Opcode::Not => {
                let result = Value::Bool(!self.reg(b).is_truthy());
                self.set_reg(a, result);
            }
            Opcode::BitNot => {
                let result = match self.reg(b) {
                    Value::Int(i) => Value::Int(!i),
                    other => {
                        return Err(VmError::Type(format!(
                            "bitwise operand must be int, found {}",
                            other.type_name()
                        )))
                    }
                };
                self.set_reg(a, result);
            }
            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::Shl | Opcode::Shr => {
                let result = bitwise(op, self.reg(b), self.reg(c))?;
                self.set_reg(a, result);
            }

            Opcode::Eq => {
                let result = Value::Bool(values_equal(self.reg(b), self.reg(c)));
                self.set_reg(a, result);
            }
            Opcode::Ne => {
                let result = Value::Bool(!values_equal(self.reg(b), self.reg(c)));
                self.set_reg(a, result);
            }
            Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let result = Value::Bool(compare(op, self.reg(b), self.reg(c))?);
                self.set_reg(a, result);
            }

            Opcode::Jump => self.pc = a as u32,
            Opcode::JumpIfTrue => {
                if self.reg(a).is_truthy() {
                    self.pc = b as u32;
                }
            }
            Opcode::JumpIfFalse => {
                if !self.reg(a).is_truthy() {
                    self.pc = b as u32;
                }
            }

            Opcode::Call => self.call_value(a, b, c)?,
            Opcode::TailCall => self.tail_call(a, b)?,
            Opcode::Return => {
                let value = self.reg(a).clone();
                self.do_return(value);
            }
            Opcode::ReturnNil => self.do_return(Value::Nil),

            Opcode::Closure => self.make_closure(a, b)?,
            Opcode::GetUpvalue => {
                let closure = self.current_closure()?;
                let upvalue = closure
                    .upvalues
                    .get(b as usize)
                    .ok_or_else(|| VmError::Runtime("upvalue index out of range".into()))?;
                let value = upvalue_get(upvalue, &self.registers);
                self.set_reg(a, value);
            }
            Opcode::SetUpvalue => {
                let value = self.reg(a).clone();
                let closure = self.current_closure()?;
                let upvalue = closure
                    .upvalues
                    .get(b as usize)
                    .ok_or_else(|| VmError::Runtime("upvalue index out of range".into()))?;
                let open_slot = match &*upvalue.borrow() {
                    Upvalue::Open(slot) => Some(*slot),
                    Upvalue::Closed(_) => None,
                };
                match open_slot {
                    Some(slot) => self.registers[slot] = value,
                    None => *upvalue.borrow_mut() = Upvalue::Closed(value),
                }
            }
            Opcode::GetGlobal => {
                let value = self
                    .globals
                    .get(b as usize)
                    .cloned()
                    .unwrap_or(Value::Nil);
                if matches!(value, Value::Nil) {
                    let name = self
                        .unit
                        .globals
                        .get(b as usize)
                        .map(|g| g.name.clone())
                        .unwrap_or_else(|| format!("#{}", b));
                    return Err(VmError::UnknownGlobal(name));
                }
                self.set_reg(a, value);
            }
            Opcode::SetGlobal => {
                let value = self.reg(a).clone();
                if let Some(slot) = self.globals.get_mut(b as usize) {
                    *slot = value;
                }
            }

            Opcode::NewArray => {
                let array = VmArray::with_capacity_hint(b as usize);
                self.set_reg(a, Value::Array(Rc::new(RefCell::new(array))));
            }
            Opcode::NewTable => {
                self.set_reg(a, Value::Table(Rc::new(RefCell::new(VmTable::new()))));
            }
            Opcode::GetIndex => {
                let target = self.reg(b).clone();
                let key = self.reg(c).clone();
                let result = self.index_get(&target, &key)?;
                self.set_reg(a, result);
            }
            Opcode::SetIndex => {
                self.index_set(a, b, c)?;
            }
            Opcode::Len => {
                let result = match self.reg(b) {
                    Value::Array(array) => Value::Int(array.borrow().len() as i64),
                    Value::Table(table) => Value::Int(table.borrow().len() as i64),
                    Value::Str(s) => Value::Int(s.as_str().chars().count() as i64),
                    other => {
                        return Err(VmError::Type(format!(
                            "cannot take the length of a {} value",
                            other.type_name()
                        )))
                    }
                };
                self.set_reg(a, result);
            }

            Opcode::Concat => {
                let left = self.reg(b);
                let right = self.reg(c);
                for operand in [left, right] {
                    if !operand.is_concatenable() {
                        return Err(VmError::Type(format!(
                            "cannot concatenate a {} value",
                            operand.type_name()
                        )));
                    }
                }
                let text = format!("{}{}", display_value(left), display_value(right));
                let value = self.intern_value(&text);
                self.set_reg(a, value);
            }
            Opcode::TypeAssert => {
                let value = self.reg(a);
                if value.primitive_tag() != Some(b) {
                    return Err(VmError::TypeAssert {
                        expected: type_tag::name(b),
                        found: value.type_name(),
                    });
                }
            }

            Opcode::Halt => self.halted = true,
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls and frames
    // ------------------------------------------------------------------

    fn current_closure(&self) -> Result<Rc<VmFunction>, VmError> {
        self.frames
            .last()
            .and_then(|f| f.closure.clone())
            .ok_or_else(|| VmError::Runtime("no upvalues outside of a function".into()))
    }

    fn call_value(&mut self, callee_reg: u16, argc: u16, dst: u16) -> Result<(), VmError> {
        let callee = self.reg(callee_reg).clone();
        match callee {
            Value::Function(f) => self.push_frame(f, callee_reg, argc, dst),
            Value::Native(native) => {
                let base = self.base();
                let args: Vec<Value> = (0..argc as usize)
                    .map(|i| self.registers[base + callee_reg as usize + 1 + i].clone())
                    .collect();
                let result = (native.func)(self, &args)?;
                self.set_reg(dst, result);
                Ok(())
            }
            other => Err(VmError::Type(format!(
                "cannot call a {} value",
                other.type_name()
            ))),
        }
    }

    fn push_frame(
        &mut self,
        f: Rc<VmFunction>,
        callee_reg: u16,
        argc: u16,
        dst: u16,
    ) -> Result<(), VmError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(VmError::StackOverflow);
        }
        let caller_base = self.base();
        let new_base = self.frames.len() * FRAME_WINDOW;
        let params = f.param_count as usize;

        // Missing arguments become nil, extras are dropped; arity against
        // statically-known callees was settled at compile time.
        for i in 0..params {
            let value = if i < argc as usize {
                self.registers[caller_base + callee_reg as usize + 1 + i].clone()
            } else {
                Value::Nil
            };
            self.registers[new_base + i] = value;
        }
        for slot in params..f.local_slots as usize {
            self.registers[new_base + slot] = Value::Nil;
        }

        self.frames.push(CallFrame {
            return_pc: self.pc,
            base: new_base,
            dst,
            local_slots: f.local_slots,
            error_handler: f.error_handler,
            closure: Some(Rc::clone(&f)),
        });
        self.pc = f.entry;
        Ok(())
    }

    /// Reuse the current frame for a call in tail position.
    fn tail_call(&mut self, callee_reg: u16, argc: u16) -> Result<(), VmError> {
        let callee = self.reg(callee_reg).clone();
        match callee {
            Value::Function(f) => {
                let base = self.base();
                self.close_upvalues(base);
                // The argument window overlaps the destination slots; stage
                // through a buffer.
                let args: Vec<Value> = (0..argc as usize)
                    .map(|i| self.registers[base + callee_reg as usize + 1 + i].clone())
                    .collect();
                let params = f.param_count as usize;
                for i in 0..params {
                    self.registers[base + i] = args.get(i).cloned().unwrap_or(Value::Nil);
                }
                for slot in params..f.local_slots as usize {
                    self.registers[base + slot] = Value::Nil;
                }
                let entry = f.entry;
                let frame = self.frames.last_mut().expect("live frame");
                frame.local_slots = f.local_slots;
                frame.error_handler = frame.error_handler || f.error_handler;
                frame.closure = Some(f);
                self.pc = entry;
                Ok(())
            }
            Value::Native(native) => {
                let base = self.base();
                let args: Vec<Value> = (0..argc as usize)
                    .map(|i| self.registers[base + callee_reg as usize + 1 + i].clone())
                    .collect();
                let result = (native.func)(self, &args)?;
                self.do_return(result);
                Ok(())
            }
            other => Err(VmError::Type(format!(
                "cannot call a {} value",
                other.type_name()
            ))),
        }
    }

    fn do_return(&mut self, value: Value) {
        let frame = self.frames.pop().expect("live frame");
        self.close_upvalues(frame.base);
        // Drop the dead window's handles.
        for slot in frame.base..frame.base + FRAME_WINDOW {
            self.registers[slot] = Value::Nil;
        }
        if self.frames.is_empty() {
            // Main returned.
            self.halted = true;
            return;
        }
        self.pc = frame.return_pc;
        let parent_base = self.base();
        self.registers[parent_base + frame.dst as usize] = value;
    }

    fn make_closure(&mut self, dst: u16, proto_idx: u16) -> Result<(), VmError> {
        let proto = self
            .unit
            .protos
            .get(proto_idx as usize)
            .ok_or_else(|| VmError::Runtime("missing function proto".into()))?;
        let mut upvalues = Vec::with_capacity(proto.captures.len());
        for capture in &proto.captures {
            if capture.from_parent {
                let slot = self.base() + capture.index as usize;
                upvalues.push(self.find_or_open_upvalue(slot));
            } else {
                let parent = self.current_closure()?;
                let shared = parent
                    .upvalues
                    .get(capture.index as usize)
                    .ok_or_else(|| VmError::Runtime("capture index out of range".into()))?;
                upvalues.push(Rc::clone(shared));
            }
        }
        let function = VmFunction {
            entry: proto.entry,
            param_count: proto.param_count,
            local_slots: proto.local_slots,
            upvalues,
            error_handler: false,
        };
        self.set_reg(dst, Value::Function(Rc::new(function)));
        Ok(())
    }

    fn find_or_open_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        match self
            .open_upvalues
            .binary_search_by_key(&slot, |(s, _)| *s)
        {
            Ok(i) => Rc::clone(&self.open_upvalues[i].1),
            Err(i) => {
                let upvalue = Rc::new(RefCell::new(Upvalue::Open(slot)));
                self.open_upvalues.insert(i, (slot, Rc::clone(&upvalue)));
                upvalue
            }
        }
    }

    /// Close every open upvalue at or above `from`. The list is sorted by
    /// slot, so the affected range is its tail.
    fn close_upvalues(&mut self, from: usize) {
        let split = self.open_upvalues.partition_point(|(slot, _)| *slot < from);
        for (slot, upvalue) in self.open_upvalues.split_off(split) {
            let value = self.registers[slot].clone();
            *upvalue.borrow_mut() = Upvalue::Closed(value);
        }
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    fn index_get(&mut self, target: &Value, key: &Value) -> Result<Value, VmError> {
        match (target, key) {
            (Value::Array(array), Value::Int(i)) => {
                let array = array.borrow();
                let len = array.len();
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| array.get(i).cloned())
                    .ok_or(VmError::IndexOutOfBounds { index: *i, len })
            }
            (Value::Table(table), Value::Str(key)) => {
                Ok(table.borrow().get(key).cloned().unwrap_or(Value::Nil))
            }
            (Value::Str(s), Value::Int(i)) => {
                let ch = usize::try_from(*i).ok().and_then(|i| s.as_str().chars().nth(i));
                match ch {
                    Some(ch) => Ok(self.intern_value(&ch.to_string())),
                    None => Err(VmError::IndexOutOfBounds {
                        index: *i,
                        len: s.as_str().chars().count(),
                    }),
                }
            }
            (Value::Array(_), other) => Err(VmError::Type(format!(
                "array index must be int, found {}",
                other.type_name()
            ))),
            (Value::Table(_), other) => Err(VmError::Type(format!(
                "table key must be string, found {}",
                other.type_name()
            ))),
            (other, _) => Err(VmError::Type(format!(
                "cannot index a {} value",
                other.type_name()
            ))),
        }
    }

    fn index_set(&mut self, obj_reg: u16, key_reg: u16, value_reg: u16) -> Result<(), VmError> {
        let target = self.reg(obj_reg).clone();
        let key = self.reg(key_reg).clone();
        let value = self.reg(value_reg).clone();
        match (target, key) {
            (Value::Array(array), Value::Int(i)) => match usize::try_from(i) {
                Ok(i) => {
                    array.borrow_mut().set(i, value);
                    Ok(())
                }
                Err(_) => Err(VmError::IndexOutOfBounds {
                    index: i,
                    len: array.borrow().len(),
                }),
            },
            (Value::Table(table), Value::Str(key)) => {
                table.borrow_mut().set(key, value);
                Ok(())
            }
            (Value::Array(_), other) => Err(VmError::Type(format!(
                "array index must be int, found {}",
                other.type_name()
            ))),
            (Value::Table(_), other) => Err(VmError::Type(format!(
                "table key must be string, found {}",
                other.type_name()
            ))),
            (other, _) => Err(VmError::Type(format!(
                "cannot index a {} value",
                other.type_name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Error unwinding
    // ------------------------------------------------------------------

    /// Walk the frame stack for an error handler. Found: the handler
    /// frame's call site receives the error message and execution resumes.
    /// Not found: record the traceback and stop with a non-zero status.
    fn unwind(&mut self, err: VmError) -> Result<(), VmError> {
        let traceback = self.render_traceback(&err);
        while self.frames.len() > 1 {
            let handler = self.frames.last().map(|f| f.error_handler).unwrap_or(false);
            let frame = self.frames.pop().expect("live frame");
            self.close_upvalues(frame.base);
            for slot in frame.base..frame.base + FRAME_WINDOW {
                self.registers[slot] = Value::Nil;
            }
            if handler {
                self.pc = frame.return_pc;
                let message = self.intern_value(&err.to_string());
                let parent_base = self.base();
                self.registers[parent_base + frame.dst as usize] = message;
                return Ok(());
            }
        }
        self.traceback = Some(traceback);
        self.halted = true;
        self.exit_code = 1;
        Err(err)
    }

    fn render_traceback(&self, err: &VmError) -> String {
        let mut out = format!("runtime error: {}\n", err);
        for (depth, frame) in self.frames.iter().enumerate().rev() {
            let what = match &frame.closure {
                Some(closure) => format!("function @{}", closure.entry),
                None => "<main>".to_string(),
            };
            out.push_str(&format!("  #{} {} (base r{})\n", depth, what, frame.base));
        }
        out.push_str(&format!("  at pc {}", self.pc.saturating_sub(1)));
        out
    }
}

// ----------------------------------------------------------------------
// Operator helpers
// ----------------------------------------------------------------------

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn int_pow(base: i64, exp: i64) -> Result<i64, VmError> {
    if exp < 0 {
        return Err(VmError::NegativeExponent);
    }
    Ok(base.wrapping_pow(exp.min(u32::MAX as i64) as u32))
}

fn int_arith(op: Opcode, x: i64, y: i64) -> Result<Value, VmError> {
    let result = match op {
        Opcode::Add | Opcode::AddInt => x.wrapping_add(y),
        Opcode::Sub | Opcode::SubInt => x.wrapping_sub(y),
        Opcode::Mul | Opcode::MulInt => x.wrapping_mul(y),
        Opcode::Div | Opcode::DivInt => {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            x.wrapping_div(y)
        }
        Opcode::Mod | Opcode::ModInt => {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            x.wrapping_rem(y)
        }
        Opcode::Pow | Opcode::PowInt => int_pow(x, y)?,
        _ => unreachable!("non-arithmetic opcode"),
    };
    Ok(Value::Int(result))
}

fn float_arith(op: Opcode, x: f64, y: f64) -> Value {
    let result = match op {
        Opcode::Add | Opcode::AddFloat => x + y,
        Opcode::Sub | Opcode::SubFloat => x - y,
        Opcode::Mul | Opcode::MulFloat => x * y,
        // IEEE semantics: division by zero yields inf/NaN.
        Opcode::Div | Opcode::DivFloat => x / y,
        Opcode::Mod | Opcode::ModFloat => x % y,
        Opcode::Pow | Opcode::PowFloat => x.powf(y),
        _ => unreachable!("non-arithmetic opcode"),
    };
    Value::Float(result)
}

fn arith_generic(op: Opcode, left: &Value, right: &Value) -> Result<Value, VmError> {
    match (left, right) {
        (Value::Int(x), Value::Int(y)) => int_arith(op, *x, *y),
        (Value::Float(x), Value::Float(y)) => Ok(float_arith(op, *x, *y)),
        (Value::Int(x), Value::Float(y)) => Ok(float_arith(op, *x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Ok(float_arith(op, *x, *y as f64)),
        _ => Err(VmError::Type(format!(
            "arithmetic on {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn arith_int(op: Opcode, left: &Value, right: &Value) -> Result<Value, VmError> {
    match (left, right) {
        (Value::Int(x), Value::Int(y)) => int_arith(op, *x, *y),
        _ => Err(VmError::Type(format!(
            "integer arithmetic on {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn arith_float(op: Opcode, left: &Value, right: &Value) -> Result<Value, VmError> {
    match (as_f64(left), as_f64(right)) {
        (Some(x), Some(y)) => Ok(float_arith(op, x, y)),
        _ => Err(VmError::Type(format!(
            "float arithmetic on {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn bitwise(op: Opcode, left: &Value, right: &Value) -> Result<Value, VmError> {
    match (left, right) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(match op {
            Opcode::BitAnd => x & y,
            Opcode::BitOr => x | y,
            Opcode::BitXor => x ^ y,
            Opcode::Shl => x.wrapping_shl(*y as u32),
            Opcode::Shr => x.wrapping_shr(*y as u32),
            _ => unreachable!("non-bitwise opcode"),
        })),
        _ => Err(VmError::Type(format!(
            "bitwise operands must be int, found {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn compare(op: Opcode, left: &Value, right: &Value) -> Result<bool, VmError> {
    let ordering = match (left, right) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Str(x), Value::Str(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => {
            return Err(VmError::Type(format!(
                "cannot compare {} and {}",
                left.type_name(),
                right.type_name()
            )))
        }
    };
    // NaN comparisons are false either way.
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        Opcode::Lt => ordering.is_lt(),
        Opcode::Le => ordering.is_le(),
        Opcode::Gt => ordering.is_gt(),
        Opcode::Ge => ordering.is_ge(),
        _ => unreachable!("non-comparison opcode"),
    })
}

/// Run a unit to completion. Uncaught VM errors print a traceback to
/// stderr and yield exit status 1.
pub fn execute(unit: &Unit) -> i32 {
    let mut vm = Vm::new(unit);
    match vm.run() {
        Ok(code) => code,
        Err(err) => {
            match vm.traceback() {
                Some(tb) => eprintln!("{}", tb),
                None => eprintln!("runtime error: {}", err),
            }
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_WINDOW;
    use pretty_assertions::assert_eq;
    use via_codegen::compile;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn compile_unit(source: &str) -> Unit {
        let compilation = compile(source);
        assert!(
            !compilation.diagnostics.has_errors(),
            "compile errors: {:?}",
            compilation.diagnostics.messages
        );
        compilation.unit.expect("unit")
    }

    fn run_program(source: &str) -> (Result<i32, VmError>, String) {
        let unit = compile_unit(source);
        let buf = SharedBuf::default();
        let result = {
            let mut vm = Vm::with_output(&unit, Box::new(buf.clone()));
            vm.run()
        };
        let output = String::from_utf8(buf.0.borrow().clone()).expect("utf-8 output");
        (result, output)
    }

    fn run_ok(source: &str) -> String {
        let (result, output) = run_program(source);
        assert_eq!(result.expect("program succeeds"), 0, "output: {}", output);
        output
    }

    fn run_err(source: &str) -> VmError {
        let (result, output) = run_program(source);
        result.expect_err(&format!("expected a VM error, output: {}", output))
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_ok("print(1 + 2 * 3)"), "7\n");
    }

    #[test]
    fn local_mutation() {
        assert_eq!(run_ok("var x = 10; x = x + 1; print(x)"), "11\n");
    }

    #[test]
    fn recursive_factorial() {
        let source = "fn fact(n) { if n <= 1 { return 1 } return n * fact(n - 1) } print(fact(5))";
        assert_eq!(run_ok(source), "120\n");
    }

    #[test]
    fn closure_counter() {
        let source = "fn mk() { var c = 0; return fn() { c = c + 1; return c } } \
                      var f = mk(); print(f()); print(f()); print(f())";
        assert_eq!(run_ok(source), "1\n2\n3\n");
    }

    #[test]
    fn independent_counters() {
        let source = "fn mk() { var c = 0; return fn() { c = c + 1; return c } } \
                      var a = mk(); var b = mk(); print(a()); print(a()); print(b())";
        assert_eq!(run_ok(source), "1\n2\n1\n");
    }

    #[test]
    fn table_store_and_load() {
        let source = "var t = {}; t[\"a\"] = 1; t[\"b\"] = 2; print(t[\"a\"] + t[\"b\"])";
        assert_eq!(run_ok(source), "3\n");
    }

    #[test]
    fn array_literal_indexing() {
        assert_eq!(run_ok("var a = [10, 20, 30]; print(a[0] + a[2])"), "40\n");
    }

    #[test]
    fn integer_division_by_zero_raises() {
        let err = run_err("var d = 0\nvar x = 1 / d");
        assert!(matches!(err, VmError::DivisionByZero));
    }

    #[test]
    fn literal_division_by_zero_survives_folding() {
        let err = run_err("var x = 1 / 0");
        assert!(matches!(err, VmError::DivisionByZero));
    }

    #[test]
    fn float_division_follows_ieee() {
        assert_eq!(run_ok("print(1.0 / 0.0)"), "inf\n");
    }

    #[test]
    fn integer_overflow_wraps() {
        assert_eq!(
            run_ok("print(9223372036854775807 + 1)"),
            "-9223372036854775808\n"
        );
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            run_ok("var s = 0 var i = 1 while i <= 4 { s += i; i += 1 } print(s)"),
            "10\n"
        );
    }

    #[test]
    fn for_range_sums() {
        assert_eq!(run_ok("var s = 0 for i = 1, 5 { s += i } print(s)"), "15\n");
    }

    #[test]
    fn for_range_negative_step() {
        assert_eq!(run_ok("for i = 3, 1, -1 { print(i) }"), "3\n2\n1\n");
    }

    #[test]
    fn for_each_over_array() {
        assert_eq!(run_ok("for x in [10, 20] { print(x) }"), "10\n20\n");
    }

    #[test]
    fn break_and_continue() {
        let source = "var s = 0 for i = 1, 10 { if i % 2 == 0 { continue } \
                      if i > 7 { break } s += i } print(s)";
        assert_eq!(run_ok(source), "16\n");
    }

    #[test]
    fn concat_coerces_scalars() {
        assert_eq!(run_ok("print(\"n=\" .. 5)"), "n=5\n");
        assert_eq!(run_ok("print(true .. \"!\")"), "true!\n");
    }

    #[test]
    fn concat_rejects_aggregates() {
        let err = run_err("var joined = \"x\" .. [1]");
        assert!(matches!(err, VmError::Type(_)));
    }

    #[test]
    fn string_table_functions() {
        assert_eq!(run_ok("print(string.upper(\"abc\"))"), "ABC\n");
        assert_eq!(run_ok("print(string.sub(\"hello\", 2, 4))"), "ell\n");
        assert_eq!(run_ok("print(string.rep(\"ab\", 3))"), "ababab\n");
    }

    #[test]
    fn math_table_functions() {
        assert_eq!(run_ok("print(math.abs(-3), math.floor(2.7))"), "3 2\n");
        assert_eq!(run_ok("print(math.max(1, 5, 3))"), "5\n");
    }

    #[test]
    fn keys_iterates_tables_deterministically() {
        let source = "var t = { b = 2, a = 1 } for k in keys(t) { print(k) }";
        assert_eq!(run_ok(source), "a\nb\n");
    }

    #[test]
    fn protected_call_absorbs_vm_errors() {
        let source = "fn boom() { return 1 / 0 } var safe = protect(boom) \
                      print(safe()) print(\"alive\")";
        assert_eq!(run_ok(source), "integer division by zero\nalive\n");
    }

    #[test]
    fn unprotected_error_reports_a_traceback() {
        let unit = compile_unit("fn f() { return 1 / 0 } print(f())");
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(&unit, Box::new(buf.clone()));
        assert!(vm.run().is_err());
        assert_eq!(vm.exit_code(), 1);
        let traceback = vm.traceback().expect("traceback recorded");
        assert!(traceback.contains("integer division by zero"));
        assert!(traceback.contains("<main>"));
    }

    #[test]
    fn type_assert_fires_on_dynamic_annotation_violation() {
        let err = run_err("fn f() { return \"s\" } var x: int = f()");
        assert!(matches!(err, VmError::TypeAssert { expected: "int", .. }));
    }

    #[test]
    fn assert_builtin() {
        assert_eq!(run_ok("print(assert(41 + 1))"), "42\n");
        let err = run_err("assert(false, \"boom\")");
        assert!(matches!(err, VmError::Assertion(ref m) if m == "boom"));
    }

    #[test]
    fn exit_builtin_sets_status_and_stops() {
        let (result, output) = run_program("exit(3) print(\"never\")");
        assert_eq!(result.expect("clean exit"), 3);
        assert_eq!(output, "");
    }

    #[test]
    fn array_read_out_of_bounds_raises() {
        let err = run_err("var a = [1] print(a[5])");
        assert!(matches!(err, VmError::IndexOutOfBounds { index: 5, len: 1 }));
    }

    #[test]
    fn sparse_array_write_extends_length() {
        assert_eq!(run_ok("var a = [] a[3] = 9 print(len(a)) print(a[0])"), "4\nnil\n");
    }

    #[test]
    fn string_indexing_yields_one_char_strings() {
        assert_eq!(run_ok("print(\"abc\"[1])"), "b\n");
    }

    #[test]
    fn missing_table_key_is_nil() {
        assert_eq!(run_ok("var t = {} print(t[\"nope\"])"), "nil\n");
    }

    #[test]
    fn shared_capture_sees_mutations() {
        let source = "fn mk() { var v = 0 \
                      var inc = fn () { v = v + 1 } \
                      var get = fn () { return v } \
                      inc() inc() print(get()) } mk()";
        assert_eq!(run_ok(source), "2\n");
    }

    #[test]
    fn deep_recursion_overflows_recoverably() {
        let source = "fn r(n) { if n == 0 { return 0 } return 1 + r(n - 1) } print(r(300))";
        let err = run_err(source);
        assert!(matches!(err, VmError::StackOverflow));
    }

    #[test]
    fn tail_calls_do_not_grow_the_stack() {
        let source =
            "fn upto(n, i) { if i >= n { return i } return upto(n, i + 1) } print(upto(10000, 0))";
        assert_eq!(run_ok(source), "10000\n");
    }

    #[test]
    fn frame_bases_stay_aligned_to_windows() {
        let unit = compile_unit(
            "fn g(x) { return x + 1 } fn f(x) { return g(x) + g(x) } print(f(1))",
        );
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(&unit, Box::new(buf.clone()));
        while vm.step().expect("no vm error") == VmStatus::Running {
            for (depth, frame) in vm.frames().iter().enumerate() {
                assert_eq!(frame.base, depth * FRAME_WINDOW);
            }
        }
        assert_eq!(
            String::from_utf8(buf.0.borrow().clone()).unwrap(),
            "4\n"
        );
    }

    #[test]
    fn open_upvalues_point_into_live_frames() {
        let source = "fn mk() { var c = 0; return fn() { c = c + 1; return c } } \
                      var f = mk(); print(f()); print(f())";
        let unit = compile_unit(source);
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(&unit, Box::new(buf.clone()));
        while vm.step().expect("no vm error") == VmStatus::Running {
            let live_top = vm.frames().len() * FRAME_WINDOW;
            for slot in vm.open_upvalue_slots() {
                assert!(slot < live_top, "open upvalue at dead slot {}", slot);
            }
        }
    }

    #[test]
    fn nested_capture_chains() {
        let source = "fn outer() { var v = 41 \
                      return fn () { return fn () { return v + 1 } } } \
                      print(outer()()())";
        assert_eq!(run_ok(source), "42\n");
    }

    #[test]
    fn scopes_shadow_without_clobbering() {
        let source = "var x = 1 { var x = 10 print(x) } print(x)";
        assert_eq!(run_ok(source), "10\n1\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        // The right side must not run when the left decides.
        let source = "fn boom() { return 1 / 0 } \
                      var ok = false and boom() \
                      print(ok) \
                      var also = true or boom() \
                      print(also)";
        assert_eq!(run_ok(source), "false\ntrue\n");
    }

    #[test]
    fn member_access_reads_table_fields() {
        assert_eq!(run_ok("var t = { size = 7 } print(t.size)"), "7\n");
    }

    #[test]
    fn compound_assignment_on_elements() {
        assert_eq!(run_ok("var a = [1, 2] a[0] += 10 print(a[0])"), "11\n");
    }

    #[test]
    fn type_builtin_reports_tags() {
        assert_eq!(
            run_ok("print(type(1), type(1.5), type(\"s\"), type(nil), type(print))"),
            "int float string nil function\n"
        );
    }

    #[test]
    fn clone_detaches_aggregates() {
        let source = "var a = [1] var b = clone(a) b[0] = 9 print(a[0], b[0])";
        assert_eq!(run_ok(source), "1 9\n");
    }

    #[test]
    fn assignment_shares_aggregate_handles() {
        let source = "var a = [1] var b = a b[0] = 9 print(a[0])";
        assert_eq!(run_ok(source), "9\n");
    }

    #[test]
    fn main_return_stops_the_program() {
        let (result, output) = run_program("print(1) return; print(2)");
        assert_eq!(result.expect("clean"), 0);
        assert_eq!(output, "1\n");
    }
}
