//! Semantic pass tests

#[cfg(test)]
mod tests {
    use crate::{analyze, Resolution, SemaResult, Ty};
    use pretty_assertions::assert_eq;
    use via_common::Diagnostics;
    use via_parser::{parse_source, ExprKind, StmtKind};

    fn check(source: &str) -> (SemaResult, Diagnostics) {
        let (program, parse_diags) = parse_source(source);
        assert!(
            !parse_diags.has_errors(),
            "unexpected parse errors: {:?}",
            parse_diags.messages
        );
        analyze(&program)
    }

    fn check_ok(source: &str) -> SemaResult {
        let (sema, diagnostics) = check(source);
        assert!(
            !diagnostics.has_errors(),
            "unexpected sema errors: {:?}",
            diagnostics.messages
        );
        sema
    }

    fn check_err(source: &str) -> Diagnostics {
        let (_, diagnostics) = check(source);
        assert!(diagnostics.has_errors(), "expected a semantic error");
        diagnostics
    }

    #[test]
    fn locals_resolve_to_slots() {
        let source = "var a = 1\nvar b = 2\nprint(a + b)";
        let (program, _) = parse_source(source);
        let (sema, diagnostics) = analyze(&program);
        assert!(!diagnostics.has_errors());

        // The two declarations take main-frame slots 0 and 1.
        assert_eq!(sema.functions[0].local_slots, 2);
        let StmtKind::Expr(call) = &program.stmts[2].kind else {
            panic!("expected call statement");
        };
        let ExprKind::Call { args, .. } = &*call.kind else {
            panic!("expected call");
        };
        let ExprKind::Binary { left, right, .. } = &*args[0].kind else {
            panic!("expected binary arg");
        };
        assert_eq!(sema.resolution(left.id), Resolution::Local(0));
        assert_eq!(sema.resolution(right.id), Resolution::Local(1));
    }

    #[test]
    fn prelude_names_resolve_to_globals() {
        let source = "print(1)";
        let (program, _) = parse_source(source);
        let (sema, _) = analyze(&program);
        let StmtKind::Expr(call) = &program.stmts[0].kind else {
            panic!("expected call statement");
        };
        let ExprKind::Call { callee, .. } = &*call.kind else {
            panic!("expected call");
        };
        assert_eq!(sema.resolution(callee.id), Resolution::Global(0));
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let diagnostics = check_err("print(y)");
        assert!(diagnostics
            .errors()
            .any(|d| d.message.contains("undeclared identifier 'y'")));
    }

    #[test]
    fn undeclared_identifier_reported_once() {
        let diagnostics = check_err("print(y)\nprint(y)");
        let count = diagnostics
            .errors()
            .filter(|d| d.message.contains("undeclared identifier"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn const_reassignment_rejected() {
        let diagnostics = check_err("const k = 1\nk = 2");
        assert!(diagnostics
            .errors()
            .any(|d| d.message.contains("cannot assign to constant")));
    }

    #[test]
    fn annotated_declaration_mismatch() {
        check_err("var x: int = \"a\"");
    }

    #[test]
    fn annotated_assignment_mismatch() {
        let diagnostics = check_err("var x: int = 1\nx = \"a\"");
        assert!(diagnostics
            .errors()
            .any(|d| d.message.contains("type mismatch")));
    }

    #[test]
    fn int_initializer_satisfies_float_annotation() {
        check_ok("var x: float = 1");
    }

    #[test]
    fn arithmetic_types_propagate() {
        let sema = check_ok("var a = 1 + 2\nvar b = 1.5 + 1\nvar c = \"x\" .. 1");
        // Find the binary expression types through the declared bindings.
        let tys: Vec<Ty> = sema
            .types
            .values()
            .filter(|t| matches!(t, Ty::Int | Ty::Float | Ty::Str))
            .cloned()
            .collect();
        assert!(tys.contains(&Ty::Int));
        assert!(tys.contains(&Ty::Float));
        assert!(tys.contains(&Ty::Str));
    }

    #[test]
    fn arithmetic_on_string_rejected() {
        check_err("var x = \"a\" * 2");
    }

    #[test]
    fn calling_a_non_callable_rejected() {
        let diagnostics = check_err("var x = 1\nx()");
        assert!(diagnostics
            .errors()
            .any(|d| d.message.contains("cannot call")));
    }

    #[test]
    fn subscripting_a_non_indexable_rejected() {
        let diagnostics = check_err("var x = 1\nvar y = x[0]");
        assert!(diagnostics
            .errors()
            .any(|d| d.message.contains("cannot index")));
    }

    #[test]
    fn wrong_arity_rejected_for_known_functions() {
        let diagnostics = check_err("fn add(a: int, b: int) -> int { return a + b }\nadd(1)");
        assert!(diagnostics
            .errors()
            .any(|d| d.message.contains("argument")));
    }

    #[test]
    fn fn_decl_can_recurse() {
        check_ok("fn fact(n) { if n <= 1 { return 1 } return n * fact(n - 1) }");
    }

    #[test]
    fn closures_capture_upvalues() {
        let source = "fn mk() { var c = 0\nreturn fn () { c = c + 1\nreturn c } }";
        let sema = check_ok(source);
        // main, mk, inner lambda
        assert_eq!(sema.functions.len(), 3);
        let inner = sema
            .functions
            .iter()
            .find(|f| !f.captures.is_empty())
            .expect("inner lambda captures c");
        assert_eq!(inner.captures.len(), 1);
        assert!(inner.captures[0].from_parent);
    }

    #[test]
    fn capture_chains_thread_through_intermediate_functions() {
        let source = "fn outer() { var v = 1\nreturn fn () { return fn () { return v } } }";
        let sema = check_ok(source);
        assert_eq!(sema.functions.len(), 4);
        // The middle lambda captures from its parent's locals, the
        // innermost captures the middle one's upvalue.
        let captured: Vec<_> = sema
            .functions
            .iter()
            .filter(|f| !f.captures.is_empty())
            .collect();
        assert_eq!(captured.len(), 2);
        assert!(captured.iter().any(|f| f.captures[0].from_parent));
        assert!(captured.iter().any(|f| !f.captures[0].from_parent));
    }

    #[test]
    fn break_outside_loop_rejected() {
        check_err("break");
    }

    #[test]
    fn shadowing_in_inner_scope_is_allowed() {
        check_ok("var x = 1 { var x = \"s\"\nprint(x) } print(x)");
    }

    #[test]
    fn table_and_array_literals_type() {
        check_ok("var t = { a = 1 }\nvar xs = [1, 2, 3]\nvar n = xs[0] + t[\"a\"]");
    }

    #[test]
    fn foreach_over_int_rejected() {
        check_err("var n = 3\nfor x in n { }");
    }

    #[test]
    fn string_escapes_are_decoded() {
        let sema = check_ok(r#"var s = "a\nb""#);
        assert!(sema.strings.values().any(|s| s == "a\nb"));
    }

    #[test]
    fn bad_escape_is_a_semantic_error() {
        check_err(r#"var s = "a\qb""#);
    }

    #[test]
    fn assigning_to_builtin_rejected() {
        check_err("print = 1");
    }

    #[test]
    fn globals_list_prelude_then_interned() {
        let (sema, _) = check("print(1)");
        assert_eq!(sema.globals.get(0).unwrap().name, "print");
        assert!(sema.globals.len() >= crate::PRELUDE.len());
    }
}
