//! Bytecode compiler for the via language
//!
//! Turns a resolved AST into a linear stream of three-operand register
//! instructions plus a constant pool, a global table and function protos.
//! Also owns the `%viac%` binary image format and the `compile()` pipeline
//! entry point.

pub mod builder;
pub mod codegen;
pub mod constant;
pub mod image;
pub mod instruction;
pub mod regalloc;
pub mod unit;

pub use builder::*;
pub use codegen::*;
pub use constant::*;
pub use image::*;
pub use instruction::*;
pub use regalloc::*;
pub use unit::*;
