//! The runtime value representation

use crate::machine::{Vm, VmError};
use crate::object::{StringInterner, Upvalue, VmArray, VmFunction, VmString, VmTable};
use std::cell::RefCell;
use std::rc::Rc;

/// Native function pointer: called synchronously on the VM thread with a
/// cloned argument window.
pub type NativeFn = fn(&mut Vm<'_>, &[Value]) -> Result<Value, VmError>;

/// A native (host) function plus its error-handler flag.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
    pub error_handler: bool,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Tagged runtime value. Scalars live inline; aggregates hold shared
/// handles to heap objects, dropped when the last handle goes away.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<VmString>),
    Array(Rc<RefCell<VmArray>>),
    Table(Rc<RefCell<VmTable>>),
    Function(Rc<VmFunction>),
    Native(NativeFunction),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Native(_) => "function",
        }
    }

    /// `nil` and `false` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Primitive tag for `TypeAssert`; aggregates have none.
    pub fn primitive_tag(&self) -> Option<u16> {
        match self {
            Value::Nil => Some(0),
            Value::Int(_) => Some(1),
            Value::Float(_) => Some(2),
            Value::Bool(_) => Some(3),
            Value::Str(_) => Some(4),
            _ => None,
        }
    }

    /// Whether this value is scalar-coercible for `..`.
    pub fn is_concatenable(&self) -> bool {
        matches!(
            self,
            Value::Nil | Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_)
        )
    }

    /// Deep copy: aggregates are cloned structurally, strings stay shared
    /// (they are immutable), closures stay shared (captured state is the
    /// point of a closure).
    pub fn deep_clone(&self, interner: &mut StringInterner) -> Value {
        match self {
            Value::Array(array) => {
                let mut copy = VmArray::new();
                for (i, elem) in array.borrow().iter().enumerate() {
                    copy.set(i, elem.deep_clone(interner));
                }
                Value::Array(Rc::new(RefCell::new(copy)))
            }
            Value::Table(table) => {
                let mut copy = VmTable::new();
                for (key, value) in table.borrow().iter() {
                    copy.set(Rc::clone(key), value.deep_clone(interner));
                }
                Value::Table(Rc::new(RefCell::new(copy)))
            }
            other => other.clone(),
        }
    }
}

/// Equality per the language: numbers compare across int/float, strings by
/// content, aggregates by identity, functions by identity.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Native(a), Value::Native(b)) => std::ptr::eq(a.func as *const (), b.func as *const ()),
        _ => false,
    }
}

/// Render a value the way `print` and `..` see it. Aggregates render
/// shallowly with a recursion guard; cyclic structures are legal (they
/// leak, by design) and must not hang the printer.
pub fn display_value(value: &Value) -> String {
    display_with_depth(value, 0)
}

const MAX_DISPLAY_DEPTH: usize = 4;

fn display_with_depth(value: &Value, depth: usize) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => {
            if x.fract() == 0.0 && x.is_finite() {
                format!("{:.1}", x)
            } else {
                x.to_string()
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => s.as_str().to_string(),
        Value::Array(array) => {
            if depth >= MAX_DISPLAY_DEPTH {
                return "[...]".to_string();
            }
            let inner: Vec<String> = array
                .borrow()
                .iter()
                .map(|v| display_with_depth(v, depth + 1))
                .collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Table(table) => {
            if depth >= MAX_DISPLAY_DEPTH {
                return "{...}".to_string();
            }
            let table = table.borrow();
            let inner: Vec<String> = table
                .sorted_keys()
                .into_iter()
                .map(|key| {
                    let value = table.get(&key).cloned().unwrap_or(Value::Nil);
                    format!("{} = {}", key.as_str(), display_with_depth(&value, depth + 1))
                })
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Function(f) => format!("function @{}", f.entry),
        Value::Native(n) => format!("builtin {}", n.name),
    }
}

/// Read through an upvalue without caring whether it is open or closed.
pub fn upvalue_get(upvalue: &Rc<RefCell<Upvalue>>, registers: &[Value]) -> Value {
    match &*upvalue.borrow() {
        Upvalue::Open(slot) => registers[*slot].clone(),
        Upvalue::Closed(value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Int(1), &Value::Float(1.5)));
    }

    #[test]
    fn aggregate_equality_is_identity() {
        let a = Value::Array(Rc::new(RefCell::new(VmArray::new())));
        let b = Value::Array(Rc::new(RefCell::new(VmArray::new())));
        assert!(!values_equal(&a, &b));
        assert!(values_equal(&a, &a.clone()));
    }

    #[test]
    fn deep_clone_detaches_aggregates() {
        let mut interner = StringInterner::new();
        let original = Value::Array(Rc::new(RefCell::new(VmArray::new())));
        if let Value::Array(array) = &original {
            array.borrow_mut().set(0, Value::Int(1));
        }
        let copy = original.deep_clone(&mut interner);
        if let (Value::Array(a), Value::Array(b)) = (&original, &copy) {
            a.borrow_mut().set(0, Value::Int(99));
            assert!(matches!(b.borrow().get(0), Some(Value::Int(1))));
        } else {
            panic!("expected arrays");
        }
    }

    #[test]
    fn display_shapes() {
        assert_eq!(display_value(&Value::Nil), "nil");
        assert_eq!(display_value(&Value::Int(42)), "42");
        assert_eq!(display_value(&Value::Float(2.0)), "2.0");
        assert_eq!(display_value(&Value::Float(2.5)), "2.5");
        let array = Value::Array(Rc::new(RefCell::new(VmArray::new())));
        if let Value::Array(a) = &array {
            a.borrow_mut().push(Value::Int(1));
            a.borrow_mut().push(Value::Bool(true));
        }
        assert_eq!(display_value(&array), "[1, true]");
    }
}
