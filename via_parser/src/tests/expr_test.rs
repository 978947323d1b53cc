//! Expression parsing tests

use super::{parse, parse_ok};
use crate::{BinaryOp, ExprKind, LiteralKind, StmtKind, UnaryOp};
use pretty_assertions::assert_eq;

fn first_expr(source: &str) -> crate::Expr<'_> {
    let program = parse_ok(source);
    match program.stmts.into_iter().next().expect("one statement").kind {
        StmtKind::Expr(expr) => expr,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let expr = first_expr("1 + 2 * 3");
    let ExprKind::Binary { op, right, .. } = *expr.kind else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOp::Add);
    let ExprKind::Binary { op: inner, .. } = *right.kind else {
        panic!("expected nested binary node");
    };
    assert_eq!(inner, BinaryOp::Mul);
}

#[test]
fn power_is_right_associative() {
    // 2 ** 3 ** 2 parses as 2 ** (3 ** 2)
    let expr = first_expr("2 ** 3 ** 2");
    let ExprKind::Binary { op, left, right } = *expr.kind else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOp::Pow);
    assert!(matches!(*left.kind, ExprKind::Literal(_)));
    assert!(matches!(
        *right.kind,
        ExprKind::Binary {
            op: BinaryOp::Pow,
            ..
        }
    ));
}

#[test]
fn concat_is_right_associative() {
    let expr = first_expr("\"a\" .. \"b\" .. \"c\"");
    let ExprKind::Binary { op, right, .. } = *expr.kind else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOp::Concat);
    assert!(matches!(
        *right.kind,
        ExprKind::Binary {
            op: BinaryOp::Concat,
            ..
        }
    ));
}

#[test]
fn comparison_binds_tighter_than_logic() {
    let expr = first_expr("a < b and c > d");
    let ExprKind::Binary { op, left, right } = *expr.kind else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOp::And);
    assert!(matches!(*left.kind, ExprKind::Binary { op: BinaryOp::Lt, .. }));
    assert!(matches!(*right.kind, ExprKind::Binary { op: BinaryOp::Gt, .. }));
}

#[test]
fn unary_chains() {
    let expr = first_expr("- -x");
    let ExprKind::Unary { op, operand } = *expr.kind else {
        panic!("expected unary node");
    };
    assert_eq!(op, UnaryOp::Neg);
    assert!(matches!(
        *operand.kind,
        ExprKind::Unary {
            op: UnaryOp::Neg,
            ..
        }
    ));
}

#[test]
fn postfix_binds_tighter_than_unary() {
    let expr = first_expr("-f(1)");
    let ExprKind::Unary { operand, .. } = *expr.kind else {
        panic!("expected unary node");
    };
    assert!(matches!(*operand.kind, ExprKind::Call { .. }));
}

#[test]
fn call_subscript_member_chain() {
    let expr = first_expr("obj.items[0](1, 2)");
    let ExprKind::Call { callee, args } = *expr.kind else {
        panic!("expected call node");
    };
    assert_eq!(args.len(), 2);
    let ExprKind::Subscript { target, .. } = *callee.kind else {
        panic!("expected subscript node");
    };
    assert!(matches!(*target.kind, ExprKind::Member { .. }));
}

#[test]
fn integer_literal_radixes() {
    for (source, expected) in [("255", 255i64), ("0xFF", 255), ("0b1010", 10)] {
        let expr = first_expr(source);
        let ExprKind::Literal(lit) = *expr.kind else {
            panic!("expected literal");
        };
        let LiteralKind::Int(value) = lit.kind else {
            panic!("expected int literal for {}", source);
        };
        assert_eq!(value, expected, "for {}", source);
    }
}

#[test]
fn hex_literal_wraps_to_negative() {
    let expr = first_expr("0xFFFFFFFFFFFFFFFF");
    let ExprKind::Literal(lit) = *expr.kind else {
        panic!("expected literal");
    };
    assert!(matches!(lit.kind, LiteralKind::Int(-1)));
}

#[test]
fn string_literal_strips_quotes_only() {
    let expr = first_expr(r#""he\nllo""#);
    let ExprKind::Literal(lit) = *expr.kind else {
        panic!("expected literal");
    };
    // Escapes stay raw for the semantic pass.
    assert!(matches!(lit.kind, LiteralKind::Str(s) if s == "he\\nllo"));
}

#[test]
fn array_and_table_literals() {
    let expr = first_expr("[1, 2, 3]");
    assert!(matches!(*expr.kind, ExprKind::Array(ref items) if items.len() == 3));

    let program = parse_ok("var t = { a = 1, [\"b\"] = 2 }");
    let StmtKind::VarDecl { init: Some(init), .. } = &program.stmts[0].kind else {
        panic!("expected var decl");
    };
    assert!(matches!(*init.kind, ExprKind::Table(ref entries) if entries.len() == 2));
}

#[test]
fn empty_braces_are_an_empty_table() {
    let program = parse_ok("var t = {}");
    let StmtKind::VarDecl { init: Some(init), .. } = &program.stmts[0].kind else {
        panic!("expected var decl");
    };
    assert!(matches!(*init.kind, ExprKind::Table(ref entries) if entries.is_empty()));
}

#[test]
fn tuple_and_group() {
    let expr = first_expr("(1, 2)");
    assert!(matches!(*expr.kind, ExprKind::Tuple(ref items) if items.len() == 2));
    let expr = first_expr("(1)");
    assert!(matches!(*expr.kind, ExprKind::Group(_)));
}

#[test]
fn lambda_expression() {
    let program = parse_ok("var f = fn (a: int, b) -> int { return a + b }");
    let StmtKind::VarDecl { init: Some(init), .. } = &program.stmts[0].kind else {
        panic!("expected var decl");
    };
    let ExprKind::Lambda(lambda) = &*init.kind else {
        panic!("expected lambda");
    };
    assert_eq!(lambda.params.len(), 2);
    assert!(lambda.params[0].ty.is_some());
    assert!(lambda.params[1].ty.is_none());
    assert!(lambda.ret.is_some());
}

#[test]
fn macro_identifier_is_rejected() {
    let (_, diagnostics) = parse("dump!(x)");
    assert!(diagnostics.has_errors());
}

#[test]
fn parser_is_deterministic() {
    let source = "fn f(n) { if n <= 1 { return 1 } return n * f(n - 1) } print(f(5))";
    let (first, _) = parse(source);
    let (second, _) = parse(source);
    assert_eq!(format!("{:?}", first), format!("{:?}", second));
}
