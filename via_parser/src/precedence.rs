//! Operator precedence handling

use crate::BinaryOp;
use via_lexer::TokenKind;

/// Binary operator precedence levels, lowest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None = 0,
    Or = 1,          // or ||
    And = 2,         // and &&
    Equality = 3,    // == !=
    Comparison = 4,  // < <= > >=
    Concat = 5,      // .. (right-associative)
    BitOr = 6,       // |
    BitXor = 7,      // ^
    BitAnd = 8,      // &
    Shift = 9,       // shl shr
    Term = 10,       // + -
    Factor = 11,     // * / %
    Power = 12,      // ** (right-associative)
    Unary = 13,      // ! - ~ not
    Call = 14,       // () [] .
    Primary = 15,
}

impl Precedence {
    /// The next-tighter level; used as the right-hand bound for
    /// left-associative operators.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Concat,
            Precedence::Concat => Precedence::BitOr,
            Precedence::BitOr => Precedence::BitXor,
            Precedence::BitXor => Precedence::BitAnd,
            Precedence::BitAnd => Precedence::Shift,
            Precedence::Shift => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Power,
            Precedence::Power => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Infix table entry: `(precedence, operator, right-associative)`.
pub fn binary_operator(kind: TokenKind) -> Option<(Precedence, BinaryOp, bool)> {
    let entry = match kind {
        TokenKind::KwOr | TokenKind::PipePipe => (Precedence::Or, BinaryOp::Or, false),
        TokenKind::KwAnd | TokenKind::AmpAmp => (Precedence::And, BinaryOp::And, false),
        TokenKind::EqEq => (Precedence::Equality, BinaryOp::Eq, false),
        TokenKind::BangEq => (Precedence::Equality, BinaryOp::Ne, false),
        TokenKind::Less => (Precedence::Comparison, BinaryOp::Lt, false),
        TokenKind::LessEq => (Precedence::Comparison, BinaryOp::Le, false),
        TokenKind::Greater => (Precedence::Comparison, BinaryOp::Gt, false),
        TokenKind::GreaterEq => (Precedence::Comparison, BinaryOp::Ge, false),
        TokenKind::Concat => (Precedence::Concat, BinaryOp::Concat, true),
        TokenKind::Pipe => (Precedence::BitOr, BinaryOp::BitOr, false),
        TokenKind::Caret => (Precedence::BitXor, BinaryOp::BitXor, false),
        TokenKind::Ampersand => (Precedence::BitAnd, BinaryOp::BitAnd, false),
        TokenKind::KwShl => (Precedence::Shift, BinaryOp::Shl, false),
        TokenKind::KwShr => (Precedence::Shift, BinaryOp::Shr, false),
        TokenKind::Plus => (Precedence::Term, BinaryOp::Add, false),
        TokenKind::Minus => (Precedence::Term, BinaryOp::Sub, false),
        TokenKind::Star => (Precedence::Factor, BinaryOp::Mul, false),
        TokenKind::Slash => (Precedence::Factor, BinaryOp::Div, false),
        TokenKind::Percent => (Precedence::Factor, BinaryOp::Mod, false),
        TokenKind::Pow => (Precedence::Power, BinaryOp::Pow, true),
        _ => return None,
    };
    Some(entry)
}

/// Compound-assignment table: `x op= v` desugars to `x = x op v`.
pub fn compound_operator(kind: TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::PlusEq => BinaryOp::Add,
        TokenKind::MinusEq => BinaryOp::Sub,
        TokenKind::StarEq => BinaryOp::Mul,
        TokenKind::SlashEq => BinaryOp::Div,
        TokenKind::PercentEq => BinaryOp::Mod,
        TokenKind::PowEq => BinaryOp::Pow,
        TokenKind::AmpEq => BinaryOp::BitAnd,
        TokenKind::CaretEq => BinaryOp::BitXor,
        TokenKind::PipeEq => BinaryOp::BitOr,
        TokenKind::ConcatEq => BinaryOp::Concat,
        _ => return None,
    };
    Some(op)
}
