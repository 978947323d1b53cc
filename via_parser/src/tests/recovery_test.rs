//! Error recovery tests: the parser must never abort and must resume at
//! statement boundaries.

use super::parse;
use crate::StmtKind;
use pretty_assertions::assert_eq;

#[test]
fn missing_initializer_expression() {
    let (program, diagnostics) = parse("var x = ;");
    assert!(diagnostics.has_errors());
    // The declaration survives with an error placeholder inside, and the
    // trailing semicolon is consumed as part of recovery.
    assert!(matches!(program.stmts[0].kind, StmtKind::VarDecl { .. }));
}

#[test]
fn recovery_resumes_at_next_statement() {
    let (program, diagnostics) = parse("var x = @@@\nvar y = 2");
    assert!(diagnostics.has_errors());
    let decls = program
        .stmts
        .iter()
        .filter(|s| matches!(s.kind, StmtKind::VarDecl { .. }))
        .count();
    assert_eq!(decls, 2, "second declaration must parse after recovery");
}

#[test]
fn unclosed_paren_does_not_loop_forever() {
    let (_, diagnostics) = parse("print(1 + ");
    assert!(diagnostics.has_errors());
}

#[test]
fn stray_closing_brace() {
    let (program, diagnostics) = parse("}\nvar ok = 1");
    assert!(diagnostics.has_errors());
    assert!(program
        .stmts
        .iter()
        .any(|s| matches!(s.kind, StmtKind::VarDecl { .. })));
}

#[test]
fn const_without_initializer_is_an_error() {
    let (_, diagnostics) = parse("const k");
    assert!(diagnostics.has_errors());
}

#[test]
fn invalid_assignment_target() {
    let (_, diagnostics) = parse("1 + 2 = 3");
    assert!(diagnostics.has_errors());
}

#[test]
fn illegal_token_is_reported_not_fatal() {
    let (program, diagnostics) = parse("var s = \"unterminated");
    assert!(diagnostics.has_errors());
    assert!(!program.stmts.is_empty());
}

#[test]
fn error_placeholders_keep_ast_shape() {
    let (program, diagnostics) = parse("while { print(1) }");
    assert!(diagnostics.has_errors());
    // The while statement still exists; its condition is a placeholder.
    assert!(program
        .stmts
        .iter()
        .any(|s| matches!(s.kind, StmtKind::While { .. } | StmtKind::Error)));
}
