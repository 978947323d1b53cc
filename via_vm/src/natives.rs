//! The native prelude: built-in functions and the math/string/os tables

use crate::machine::{Vm, VmError};
use crate::object::{StringInterner, VmFunction, VmTable};
use crate::value::{display_value, NativeFunction, Value};
use std::cell::RefCell;
use std::rc::Rc;
use via_codegen::GlobalSpec;

fn native(name: &'static str, func: fn(&mut Vm<'_>, &[Value]) -> Result<Value, VmError>) -> Value {
    Value::Native(NativeFunction {
        name,
        func,
        error_handler: false,
    })
}

/// Build the VM's global array to match the compile-time global table.
/// Prelude names get their built-in values; everything else starts nil.
pub fn install_prelude(globals: &[GlobalSpec], interner: &mut StringInterner) -> Vec<Value> {
    globals
        .iter()
        .map(|spec| match spec.name.as_str() {
            "print" => native("print", native_print),
            "error" => native("error", native_error),
            "exit" => native("exit", native_exit),
            "type" => native("type", native_type),
            "typeof" => native("typeof", native_type),
            "assert" => native("assert", native_assert),
            "len" => native("len", native_len),
            "clone" => native("clone", native_clone),
            "keys" => native("keys", native_keys),
            "protect" => native("protect", native_protect),
            "math" => math_table(interner),
            "string" => string_table(interner),
            "os" => os_table(interner),
            _ => Value::Nil,
        })
        .collect()
}

fn table_of(interner: &mut StringInterner, entries: &[(&'static str, Value)]) -> Value {
    let mut table = VmTable::new();
    for (name, value) in entries {
        table.set(interner.intern(name), value.clone());
    }
    Value::Table(Rc::new(RefCell::new(table)))
}

fn math_table(interner: &mut StringInterner) -> Value {
    table_of(
        interner,
        &[
            ("abs", native("math.abs", math_abs)),
            ("floor", native("math.floor", math_floor)),
            ("ceil", native("math.ceil", math_ceil)),
            ("sqrt", native("math.sqrt", math_sqrt)),
            ("min", native("math.min", math_min)),
            ("max", native("math.max", math_max)),
            ("pi", Value::Float(std::f64::consts::PI)),
        ],
    )
}

fn string_table(interner: &mut StringInterner) -> Value {
    table_of(
        interner,
        &[
            ("len", native("string.len", string_len)),
            ("sub", native("string.sub", string_sub)),
            ("upper", native("string.upper", string_upper)),
            ("lower", native("string.lower", string_lower)),
            ("rep", native("string.rep", string_rep)),
        ],
    )
}

fn os_table(interner: &mut StringInterner) -> Value {
    table_of(
        interner,
        &[
            ("clock", native("os.clock", os_clock)),
            ("time", native("os.time", os_time)),
        ],
    )
}

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

fn want_number(who: &str, args: &[Value], at: usize) -> Result<f64, VmError> {
    match args.get(at) {
        Some(Value::Int(i)) => Ok(*i as f64),
        Some(Value::Float(x)) => Ok(*x),
        other => Err(VmError::Type(format!(
            "{}: argument {} must be a number, found {}",
            who,
            at + 1,
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

fn want_int(who: &str, args: &[Value], at: usize) -> Result<i64, VmError> {
    match args.get(at) {
        Some(Value::Int(i)) => Ok(*i),
        other => Err(VmError::Type(format!(
            "{}: argument {} must be int, found {}",
            who,
            at + 1,
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

fn want_str<'a>(who: &str, args: &'a [Value], at: usize) -> Result<&'a str, VmError> {
    match args.get(at) {
        Some(Value::Str(s)) => Ok(s.as_str()),
        other => Err(VmError::Type(format!(
            "{}: argument {} must be string, found {}",
            who,
            at + 1,
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

// ----------------------------------------------------------------------
// Core builtins
// ----------------------------------------------------------------------

fn native_print(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let parts: Vec<String> = args.iter().map(display_value).collect();
    vm.write_line(&parts.join(" "))?;
    Ok(Value::Nil)
}

fn native_error(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let message = args
        .first()
        .map(display_value)
        .unwrap_or_else(|| "error".to_string());
    Err(VmError::Runtime(message))
}

fn native_exit(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let code = match args.first() {
        Some(Value::Int(i)) => *i as i32,
        _ => 0,
    };
    vm.request_exit(code);
    Ok(Value::Nil)
}

fn native_type(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let name = args.first().map(Value::type_name).unwrap_or("nil");
    Ok(vm.intern_value(name))
}

fn native_assert(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(value) if value.is_truthy() => Ok(value.clone()),
        _ => {
            let message = args
                .get(1)
                .map(display_value)
                .unwrap_or_else(|| "assertion failed".to_string());
            Err(VmError::Assertion(message))
        }
    }
}

fn native_len(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(Value::Array(array)) => Ok(Value::Int(array.borrow().len() as i64)),
        Some(Value::Table(table)) => Ok(Value::Int(table.borrow().len() as i64)),
        Some(Value::Str(s)) => Ok(Value::Int(s.as_str().chars().count() as i64)),
        other => Err(VmError::Type(format!(
            "len: cannot take the length of a {} value",
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

fn native_clone(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    Ok(args
        .first()
        .map(|v| vm.deep_clone_value(v))
        .unwrap_or(Value::Nil))
}

/// Sorted key array of a table; the deterministic path for table
/// iteration (`for k in keys(t)`).
fn native_keys(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(Value::Table(table)) => {
            let keys = table.borrow().sorted_keys();
            let mut array = crate::object::VmArray::new();
            for key in keys {
                array.push(Value::Str(key));
            }
            Ok(Value::Array(Rc::new(RefCell::new(array))))
        }
        other => Err(VmError::Type(format!(
            "keys: expected table, found {}",
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

/// Wrap a function so VM errors raised below it stop at its frame: the
/// call returns the error message string instead of unwinding further.
fn native_protect(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(Value::Function(f)) => Ok(Value::Function(Rc::new(VmFunction {
            entry: f.entry,
            param_count: f.param_count,
            local_slots: f.local_slots,
            upvalues: f.upvalues.clone(),
            error_handler: true,
        }))),
        other => Err(VmError::Type(format!(
            "protect: expected function, found {}",
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

// ----------------------------------------------------------------------
// math
// ----------------------------------------------------------------------

fn math_abs(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(i.wrapping_abs())),
        Some(Value::Float(x)) => Ok(Value::Float(x.abs())),
        other => Err(VmError::Type(format!(
            "math.abs: expected number, found {}",
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

fn math_floor(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Float(x)) => Ok(Value::Int(x.floor() as i64)),
        other => Err(VmError::Type(format!(
            "math.floor: expected number, found {}",
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

fn math_ceil(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Float(x)) => Ok(Value::Int(x.ceil() as i64)),
        other => Err(VmError::Type(format!(
            "math.ceil: expected number, found {}",
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

fn math_sqrt(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let x = want_number("math.sqrt", args, 0)?;
    Ok(Value::Float(x.sqrt()))
}

fn fold_extremum(
    who: &str,
    args: &[Value],
    pick_left: fn(f64, f64) -> bool,
) -> Result<Value, VmError> {
    if args.is_empty() {
        return Err(VmError::Type(format!("{}: expected at least one number", who)));
    }
    let mut best = args[0].clone();
    let mut best_num = want_number(who, args, 0)?;
    for at in 1..args.len() {
        let candidate = want_number(who, args, at)?;
        if !pick_left(best_num, candidate) {
            best = args[at].clone();
            best_num = candidate;
        }
    }
    Ok(best)
}

fn math_min(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    fold_extremum("math.min", args, |best, candidate| best <= candidate)
}

fn math_max(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    fold_extremum("math.max", args, |best, candidate| best >= candidate)
}

// ----------------------------------------------------------------------
// string
// ----------------------------------------------------------------------

fn string_len(_vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let s = want_str("string.len", args, 0)?;
    Ok(Value::Int(s.chars().count() as i64))
}

/// `string.sub(s, start, end)` — 1-based, inclusive, clamped.
fn string_sub(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let s = want_str("string.sub", args, 0)?;
    let start = want_int("string.sub", args, 1)?;
    let end = want_int("string.sub", args, 2)?;
    let chars: Vec<char> = s.chars().collect();
    let from = start.max(1) as usize - 1;
    let to = end.clamp(0, chars.len() as i64) as usize;
    let text: String = if from >= to {
        String::new()
    } else {
        chars[from..to].iter().collect()
    };
    Ok(vm.intern_value(&text))
}

fn string_upper(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let s = want_str("string.upper", args, 0)?.to_uppercase();
    Ok(vm.intern_value(&s))
}

fn string_lower(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let s = want_str("string.lower", args, 0)?.to_lowercase();
    Ok(vm.intern_value(&s))
}

fn string_rep(vm: &mut Vm<'_>, args: &[Value]) -> Result<Value, VmError> {
    let s = want_str("string.rep", args, 0)?;
    let n = want_int("string.rep", args, 1)?.max(0) as usize;
    let text = s.repeat(n);
    Ok(vm.intern_value(&text))
}

// ----------------------------------------------------------------------
// os
// ----------------------------------------------------------------------

fn os_clock(vm: &mut Vm<'_>, _args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Float(vm.clock_seconds()))
}

fn os_time(_vm: &mut Vm<'_>, _args: &[Value]) -> Result<Value, VmError> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(Value::Int(secs))
}
