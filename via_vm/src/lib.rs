//! Register-based virtual machine for the via language
//!
//! Executes a compiled [`via_codegen::Unit`] against a 64K-slot register
//! file, a bounded call stack, closures with open/closed upvalues and
//! heap-allocated strings, arrays and tables. Single-threaded and
//! non-reentrant; native functions run synchronously on the VM thread.

pub mod frame;
pub mod machine;
pub mod natives;
pub mod object;
pub mod value;

pub use frame::*;
pub use machine::*;
pub use natives::*;
pub use object::*;
pub use value::*;
