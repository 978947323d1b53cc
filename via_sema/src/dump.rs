//! Typed-tree dump (`--dump ttree`)

use crate::SemaResult;
use via_parser::{Expr, ExprKind, Program, Stmt, StmtKind};

/// Render the statement tree with the type the semantic pass attached to
/// every expression node.
pub fn typed_tree(program: &Program<'_>, sema: &SemaResult) -> String {
    let mut out = String::new();
    for stmt in &program.stmts {
        dump_stmt(stmt, sema, 0, &mut out);
    }
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn dump_stmt(stmt: &Stmt<'_>, sema: &SemaResult, depth: usize, out: &mut String) {
    indent(depth, out);
    match &stmt.kind {
        StmtKind::VarDecl { name, is_const, init, .. } => {
            let kw = if *is_const { "const" } else { "var" };
            out.push_str(&format!("{} {}\n", kw, name.value));
            if let Some(init) = init {
                dump_expr(init, sema, depth + 1, out);
            }
        }
        StmtKind::FnDecl { name, lambda } => {
            out.push_str(&format!("fn {}\n", name.value));
            for inner in &lambda.body {
                dump_stmt(inner, sema, depth + 1, out);
            }
        }
        StmtKind::Scope(body) => {
            out.push_str("scope\n");
            for inner in body {
                dump_stmt(inner, sema, depth + 1, out);
            }
        }
        StmtKind::If { arms, else_body } => {
            out.push_str("if\n");
            for arm in arms {
                dump_expr(&arm.cond, sema, depth + 1, out);
                for inner in &arm.body {
                    dump_stmt(inner, sema, depth + 1, out);
                }
            }
            if let Some(body) = else_body {
                indent(depth, out);
                out.push_str("else\n");
                for inner in body {
                    dump_stmt(inner, sema, depth + 1, out);
                }
            }
        }
        StmtKind::While { cond, body } => {
            out.push_str("while\n");
            dump_expr(cond, sema, depth + 1, out);
            for inner in body {
                dump_stmt(inner, sema, depth + 1, out);
            }
        }
        StmtKind::ForRange { var, body, .. } => {
            out.push_str(&format!("for-range {}\n", var.value));
            for inner in body {
                dump_stmt(inner, sema, depth + 1, out);
            }
        }
        StmtKind::ForEach { var, iter, body } => {
            out.push_str(&format!("for-each {}\n", var.value));
            dump_expr(iter, sema, depth + 1, out);
            for inner in body {
                dump_stmt(inner, sema, depth + 1, out);
            }
        }
        StmtKind::Assign { target, value, .. } => {
            out.push_str("assign\n");
            dump_expr(target, sema, depth + 1, out);
            dump_expr(value, sema, depth + 1, out);
        }
        StmtKind::Return(value) => {
            out.push_str("return\n");
            if let Some(value) = value {
                dump_expr(value, sema, depth + 1, out);
            }
        }
        StmtKind::Break => out.push_str("break\n"),
        StmtKind::Continue => out.push_str("continue\n"),
        StmtKind::Empty => out.push_str("empty\n"),
        StmtKind::Expr(expr) => {
            out.push_str("expr\n");
            dump_expr(expr, sema, depth + 1, out);
        }
        StmtKind::Error => out.push_str("<error>\n"),
    }
}

fn dump_expr(expr: &Expr<'_>, sema: &SemaResult, depth: usize, out: &mut String) {
    indent(depth, out);
    let label = match &*expr.kind {
        ExprKind::Literal(_) => "literal".to_string(),
        ExprKind::Symbol(name) => format!("symbol {} [{:?}]", name.value, sema.resolution(expr.id)),
        ExprKind::Unary { op, .. } => format!("unary {}", op),
        ExprKind::Binary { op, .. } => format!("binary {}", op),
        ExprKind::Group(_) => "group".to_string(),
        ExprKind::Call { .. } => "call".to_string(),
        ExprKind::Subscript { .. } => "subscript".to_string(),
        ExprKind::Member { field, .. } => format!("member .{}", field.value),
        ExprKind::Tuple(_) => "tuple".to_string(),
        ExprKind::Array(_) => "array".to_string(),
        ExprKind::Table(_) => "table".to_string(),
        ExprKind::Lambda(_) => "lambda".to_string(),
        ExprKind::Error => "<error>".to_string(),
    };
    out.push_str(&format!("{} : {}\n", label, sema.ty(expr.id)));

    match &*expr.kind {
        ExprKind::Unary { operand, .. } => dump_expr(operand, sema, depth + 1, out),
        ExprKind::Binary { left, right, .. } => {
            dump_expr(left, sema, depth + 1, out);
            dump_expr(right, sema, depth + 1, out);
        }
        ExprKind::Group(inner) => dump_expr(inner, sema, depth + 1, out),
        ExprKind::Call { callee, args } => {
            dump_expr(callee, sema, depth + 1, out);
            for arg in args {
                dump_expr(arg, sema, depth + 1, out);
            }
        }
        ExprKind::Subscript { target, index } => {
            dump_expr(target, sema, depth + 1, out);
            dump_expr(index, sema, depth + 1, out);
        }
        ExprKind::Member { target, .. } => dump_expr(target, sema, depth + 1, out),
        ExprKind::Tuple(items) | ExprKind::Array(items) => {
            for item in items {
                dump_expr(item, sema, depth + 1, out);
            }
        }
        ExprKind::Table(entries) => {
            for entry in entries {
                dump_expr(&entry.value, sema, depth + 1, out);
            }
        }
        ExprKind::Lambda(lambda) => {
            for stmt in &lambda.body {
                dump_stmt(stmt, sema, depth + 1, out);
            }
        }
        _ => {}
    }
}
