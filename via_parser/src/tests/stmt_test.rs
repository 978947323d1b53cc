//! Statement parsing tests

use super::parse_ok;
use crate::{BinaryOp, StmtKind};
use pretty_assertions::assert_eq;

#[test]
fn var_and_const_declarations() {
    let program = parse_ok("var x: int = 1; const y = 2");
    assert!(matches!(
        program.stmts[0].kind,
        StmtKind::VarDecl {
            is_const: false,
            ty: Some(_),
            init: Some(_),
            ..
        }
    ));
    assert!(matches!(
        program.stmts[1].kind,
        StmtKind::VarDecl { is_const: true, .. }
    ));
}

#[test]
fn semicolons_are_optional_terminators() {
    let program = parse_ok("var x = 1\nvar y = 2;");
    assert_eq!(program.stmts.len(), 2);
}

#[test]
fn lone_semicolon_is_empty_statement() {
    let program = parse_ok(";");
    assert!(matches!(program.stmts[0].kind, StmtKind::Empty));
}

#[test]
fn fn_declaration() {
    let program = parse_ok("fn add(a, b) { return a + b }");
    let StmtKind::FnDecl { name, lambda } = &program.stmts[0].kind else {
        panic!("expected fn declaration");
    };
    assert_eq!(name.value, "add");
    assert_eq!(lambda.params.len(), 2);
    assert_eq!(lambda.body.len(), 1);
}

#[test]
fn if_else_chain() {
    let program = parse_ok("if a { } else if b { } else { var z = 1 }");
    let StmtKind::If { arms, else_body } = &program.stmts[0].kind else {
        panic!("expected if statement");
    };
    assert_eq!(arms.len(), 2);
    assert_eq!(else_body.as_ref().map(|b| b.len()), Some(1));
}

#[test]
fn while_with_break_and_continue() {
    let program = parse_ok("while x < 10 { if x == 5 { break } continue }");
    let StmtKind::While { body, .. } = &program.stmts[0].kind else {
        panic!("expected while statement");
    };
    assert_eq!(body.len(), 2);
}

#[test]
fn for_range_with_and_without_step() {
    let program = parse_ok("for i = 1, 10 { } for j = 10, 0, -2 { }");
    assert!(matches!(
        program.stmts[0].kind,
        StmtKind::ForRange { step: None, .. }
    ));
    assert!(matches!(
        program.stmts[1].kind,
        StmtKind::ForRange { step: Some(_), .. }
    ));
}

#[test]
fn for_each() {
    let program = parse_ok("for item in items { print(item) }");
    let StmtKind::ForEach { var, .. } = &program.stmts[0].kind else {
        panic!("expected for-each statement");
    };
    assert_eq!(var.value, "item");
}

#[test]
fn assignment_forms() {
    let program = parse_ok("x = 1 x += 2 t[0] = 3 obj.field = 4 x++");
    assert!(matches!(
        program.stmts[0].kind,
        StmtKind::Assign { op: None, .. }
    ));
    assert!(matches!(
        program.stmts[1].kind,
        StmtKind::Assign {
            op: Some(BinaryOp::Add),
            ..
        }
    ));
    assert!(matches!(program.stmts[2].kind, StmtKind::Assign { .. }));
    assert!(matches!(program.stmts[3].kind, StmtKind::Assign { .. }));
    // x++ desugars into x = x + 1
    assert!(matches!(
        program.stmts[4].kind,
        StmtKind::Assign {
            op: Some(BinaryOp::Add),
            ..
        }
    ));
}

#[test]
fn scope_statement() {
    let program = parse_ok("{ var inner = 1 }");
    let StmtKind::Scope(body) = &program.stmts[0].kind else {
        panic!("expected scope statement");
    };
    assert_eq!(body.len(), 1);
}

#[test]
fn return_with_and_without_value() {
    let program = parse_ok("fn f() { return } fn g() { return 1 }");
    let StmtKind::FnDecl { lambda, .. } = &program.stmts[0].kind else {
        panic!("expected fn");
    };
    assert!(matches!(lambda.body[0].kind, StmtKind::Return(None)));
    let StmtKind::FnDecl { lambda, .. } = &program.stmts[1].kind else {
        panic!("expected fn");
    };
    assert!(matches!(lambda.body[0].kind, StmtKind::Return(Some(_))));
}
