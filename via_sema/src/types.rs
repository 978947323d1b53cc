//! The static type model

use serde::Serialize;
use std::fmt;
use via_parser::{BinaryOp, PrimitiveType, TypeExpr, TypeExprKind, UnaryOp};

/// Static types as the semantic pass knows them. `Any` is the dynamic
/// type: whatever mixes with it defers checking to the VM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Ty {
    Any,
    Nil,
    Int,
    Float,
    Bool,
    Str,
    Table,
    Array(Box<Ty>),
    Tuple(Vec<Ty>),
    Function { params: Vec<Ty>, ret: Box<Ty> },
    /// Produced by earlier errors; compatible with everything to stop
    /// cascades.
    Error,
}

impl Default for Ty {
    fn default() -> Self {
        Ty::Any
    }
}

impl Ty {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float | Ty::Any | Ty::Error)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Ty::Any | Ty::Error)
    }

    /// Operand acceptable to `..` (coerced to string by the VM).
    pub fn is_concatenable(&self) -> bool {
        matches!(
            self,
            Ty::Int | Ty::Float | Ty::Bool | Ty::Str | Ty::Nil | Ty::Any | Ty::Error
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Ty::Function { .. } | Ty::Any | Ty::Error)
    }

    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            Ty::Array(_) | Ty::Tuple(_) | Ty::Table | Ty::Str | Ty::Any | Ty::Error
        )
    }

    /// Assignment compatibility: `value` may be stored where `self` is
    /// declared.
    pub fn accepts(&self, value: &Ty) -> bool {
        if self.is_dynamic() || value.is_dynamic() {
            return true;
        }
        match (self, value) {
            // An int initializer satisfies a float annotation.
            (Ty::Float, Ty::Int) => true,
            (Ty::Array(a), Ty::Array(b)) => a.accepts(b),
            (Ty::Tuple(a), Ty::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.accepts(y))
            }
            (
                Ty::Function { params: pa, ret: ra },
                Ty::Function { params: pb, ret: rb },
            ) => pa.len() == pb.len()
                && pa.iter().zip(pb).all(|(x, y)| x.accepts(y))
                && ra.accepts(rb),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Any => write!(f, "any"),
            Ty::Nil => write!(f, "nil"),
            Ty::Int => write!(f, "int"),
            Ty::Float => write!(f, "float"),
            Ty::Bool => write!(f, "bool"),
            Ty::Str => write!(f, "string"),
            Ty::Table => write!(f, "table"),
            Ty::Array(elem) => write!(f, "[{}]", elem),
            Ty::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Ty::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ") -> {}", ret)
            }
            Ty::Error => write!(f, "<error>"),
        }
    }
}

/// Result type of an arithmetic operator, or `None` when the operand
/// combination is a compile error.
pub fn arithmetic_result(left: &Ty, right: &Ty) -> Option<Ty> {
    if left.is_dynamic() || right.is_dynamic() {
        return Some(Ty::Any);
    }
    match (left, right) {
        (Ty::Int, Ty::Int) => Some(Ty::Int),
        (Ty::Float, Ty::Float) | (Ty::Int, Ty::Float) | (Ty::Float, Ty::Int) => Some(Ty::Float),
        _ => None,
    }
}

/// Result type of a relational operator (`<`, `<=`, `>`, `>=`).
pub fn relational_result(left: &Ty, right: &Ty) -> Option<Ty> {
    if left.is_dynamic() || right.is_dynamic() {
        return Some(Ty::Bool);
    }
    match (left, right) {
        (Ty::Int | Ty::Float, Ty::Int | Ty::Float) => Some(Ty::Bool),
        (Ty::Str, Ty::Str) => Some(Ty::Bool),
        _ => None,
    }
}

/// Result type of a bitwise/shift operator.
pub fn bitwise_result(left: &Ty, right: &Ty) -> Option<Ty> {
    if left.is_dynamic() || right.is_dynamic() {
        return Some(Ty::Any);
    }
    match (left, right) {
        (Ty::Int, Ty::Int) => Some(Ty::Int),
        _ => None,
    }
}

/// Result type of a unary operator, or `None` on a type error.
pub fn unary_result(op: UnaryOp, operand: &Ty) -> Option<Ty> {
    match op {
        UnaryOp::Neg => match operand {
            Ty::Int => Some(Ty::Int),
            Ty::Float => Some(Ty::Float),
            t if t.is_dynamic() => Some(Ty::Any),
            _ => None,
        },
        // `!x` is defined on every value through truthiness.
        UnaryOp::Not => Some(Ty::Bool),
        UnaryOp::BitNot => match operand {
            Ty::Int => Some(Ty::Int),
            t if t.is_dynamic() => Some(Ty::Any),
            _ => None,
        },
    }
}

/// Whether a binary operator is in the arithmetic family.
pub fn is_arithmetic(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow
    )
}

pub fn is_relational(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
}

pub fn is_bitwise(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
    )
}

/// Lower a written annotation to a `Ty`. Unknown named types come back as
/// `Err` with the offending name.
pub fn from_annotation<'src>(annotation: &TypeExpr<'src>) -> Result<Ty, &'src str> {
    match &*annotation.kind {
        TypeExprKind::Primitive(p) => Ok(match p {
            PrimitiveType::Int => Ty::Int,
            PrimitiveType::Float => Ty::Float,
            PrimitiveType::Bool => Ty::Bool,
            PrimitiveType::Str => Ty::Str,
            PrimitiveType::Nil => Ty::Nil,
        }),
        TypeExprKind::Array(elem) => Ok(Ty::Array(Box::new(from_annotation(elem)?))),
        TypeExprKind::Tuple(items) => {
            let items = items
                .iter()
                .map(from_annotation)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Ty::Tuple(items))
        }
        TypeExprKind::Function { params, ret } => {
            let params = params
                .iter()
                .map(from_annotation)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Ty::Function {
                params,
                ret: Box::new(from_annotation(ret)?),
            })
        }
        TypeExprKind::Named { name, .. } => match name.value {
            // `table` and `any` are spelled as named types.
            "table" => Ok(Ty::Table),
            "any" => Ok(Ty::Any),
            other => Err(other),
        },
    }
}
