//! Name resolution and type propagation

use crate::escape::unescape;
use crate::globals::GlobalTable;
use crate::scope::{Capture, CaptureRecord, FuncFrame, Resolution};
use crate::types::{
    arithmetic_result, bitwise_result, from_annotation, is_arithmetic, is_bitwise, is_relational,
    relational_result, unary_result, Ty,
};
use hashbrown::HashMap;
use via_common::{Diagnostics, Span, Spanned};
use via_parser::{
    BinaryOp, Expr, ExprKind, Lambda, LiteralKind, NodeId, Program, Stmt, StmtKind, TableKey,
};

/// Everything codegen needs to know about one function body. Index 0 is the
/// main body.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub param_count: u16,
    pub local_slots: u16,
    pub captures: Vec<Capture>,
    pub ret: Ty,
}

/// Output of the semantic pass: side tables keyed by node id, per-function
/// records and the populated global table. The AST itself is untouched.
#[derive(Debug)]
pub struct SemaResult {
    pub resolutions: HashMap<NodeId, Resolution>,
    pub types: HashMap<NodeId, Ty>,
    /// Decoded string-literal values, keyed by the literal expression's id.
    pub strings: HashMap<NodeId, String>,
    pub functions: Vec<FuncInfo>,
    /// Lambda expression / fn declaration node id → function index.
    pub fn_ids: HashMap<NodeId, u16>,
    pub globals: GlobalTable,
}

impl SemaResult {
    pub fn resolution(&self, id: NodeId) -> Resolution {
        self.resolutions
            .get(&id)
            .copied()
            .unwrap_or(Resolution::Unresolved)
    }

    pub fn ty(&self, id: NodeId) -> Ty {
        self.types.get(&id).cloned().unwrap_or(Ty::Any)
    }
}

/// Run the semantic pass over a parsed program.
pub fn analyze(program: &Program<'_>) -> (SemaResult, Diagnostics) {
    let mut resolver = Resolver::new();
    resolver.run(program);
    let Resolver {
        diagnostics,
        globals,
        infos,
        resolutions,
        types,
        strings,
        fn_ids,
        ..
    } = resolver;
    (
        SemaResult {
            resolutions,
            types,
            strings,
            functions: infos,
            fn_ids,
            globals,
        },
        diagnostics,
    )
}

enum SymbolUse {
    Read,
    Write,
}

struct Resolver {
    diagnostics: Diagnostics,
    globals: GlobalTable,
    /// Active function stack; parallel to `info_indices`.
    frames: Vec<FuncFrame>,
    info_indices: Vec<usize>,
    infos: Vec<FuncInfo>,
    resolutions: HashMap<NodeId, Resolution>,
    types: HashMap<NodeId, Ty>,
    strings: HashMap<NodeId, String>,
    fn_ids: HashMap<NodeId, u16>,
}

impl Resolver {
    fn new() -> Self {
        Self {
            diagnostics: Diagnostics::new(),
            globals: GlobalTable::with_prelude(),
            frames: Vec::new(),
            info_indices: Vec::new(),
            infos: Vec::new(),
            resolutions: HashMap::new(),
            types: HashMap::new(),
            strings: HashMap::new(),
            fn_ids: HashMap::new(),
        }
    }

    fn run(&mut self, program: &Program<'_>) {
        self.enter_function(Ty::Any);
        self.frames.last_mut().expect("main frame").enter_scope();
        for stmt in &program.stmts {
            self.visit_stmt(stmt);
        }
        let frame = self.frames.last_mut().expect("main frame");
        frame.exit_scope();
        self.exit_function(0);
    }

    // ------------------------------------------------------------------
    // Function frames
    // ------------------------------------------------------------------

    fn enter_function(&mut self, ret: Ty) -> u16 {
        let index = self.infos.len();
        self.infos.push(FuncInfo {
            param_count: 0,
            local_slots: 0,
            captures: Vec::new(),
            ret: ret.clone(),
        });
        self.frames.push(FuncFrame::new(ret));
        self.info_indices.push(index);
        index as u16
    }

    fn exit_function(&mut self, param_count: u16) {
        let frame = self.frames.pop().expect("function frame");
        let index = self.info_indices.pop().expect("function index");
        let info = &mut self.infos[index];
        info.param_count = param_count;
        info.local_slots = frame.slot_count();
        info.captures = frame.captures.iter().map(|r| r.capture).collect();
    }

    fn frame(&mut self) -> &mut FuncFrame {
        self.frames.last_mut().expect("active frame")
    }

    // ------------------------------------------------------------------
    // Identifier resolution
    // ------------------------------------------------------------------

    /// Resolve `name` through the lexical frames, materializing upvalue
    /// capture chains on the way out. `None` means not lexically bound.
    fn resolve_lexical(&mut self, depth: usize, name: &str) -> Option<(Resolution, Ty, bool)> {
        if let Some(binding) = self.frames[depth].find_local(name) {
            return Some((
                Resolution::Local(binding.slot),
                binding.ty.clone(),
                binding.is_const,
            ));
        }
        if let Some(idx) = self.frames[depth].find_capture(name) {
            let record = &self.frames[depth].captures[idx as usize];
            return Some((Resolution::Upvalue(idx), record.ty.clone(), record.is_const));
        }
        if depth == 0 {
            return None;
        }
        let (resolution, ty, is_const) = self.resolve_lexical(depth - 1, name)?;
        let capture = match resolution {
            Resolution::Local(slot) => Capture {
                from_parent: true,
                index: slot,
            },
            Resolution::Upvalue(idx) => Capture {
                from_parent: false,
                index: idx,
            },
            _ => return Some((resolution, ty, is_const)),
        };
        let idx = self.frames[depth].add_capture(CaptureRecord {
            name: name.to_string(),
            capture,
            ty: ty.clone(),
            is_const,
        });
        Some((Resolution::Upvalue(idx), ty, is_const))
    }

    /// Resolve a symbol node, record its annotation and return its type.
    fn resolve_symbol(&mut self, id: NodeId, name: Spanned<&str>, usage: SymbolUse) -> Ty {
        let depth = self.frames.len() - 1;
        if let Some((resolution, ty, is_const)) = self.resolve_lexical(depth, name.value) {
            match usage {
                SymbolUse::Read => {
                    if let Resolution::Local(slot) = resolution {
                        let mut first_uninit_read = false;
                        if let Some(binding) = self.frame().local_by_slot_mut(slot) {
                            if !binding.initialized {
                                // Warn once per binding.
                                binding.initialized = true;
                                first_uninit_read = true;
                            }
                        }
                        if first_uninit_read {
                            self.diagnostics.warning(
                                format!("'{}' is used before initialization", name.value),
                                name.span,
                            );
                        }
                    }
                }
                SymbolUse::Write => {
                    if is_const {
                        self.diagnostics.error(
                            format!("cannot assign to constant '{}'", name.value),
                            name.span,
                        );
                    }
                    if let Resolution::Local(slot) = resolution {
                        if let Some(binding) = self.frame().local_by_slot_mut(slot) {
                            binding.initialized = true;
                        }
                    }
                }
            }
            self.resolutions.insert(id, resolution);
            self.types.insert(id, ty.clone());
            return ty;
        }

        if let Some(idx) = self.globals.lookup(name.value) {
            let binding = self.globals.get(idx).expect("looked-up global");
            if matches!(usage, SymbolUse::Write) && binding.is_const {
                self.diagnostics.error(
                    format!("cannot assign to built-in '{}'", name.value),
                    name.span,
                );
            }
            let ty = binding.ty.clone();
            self.resolutions.insert(id, Resolution::Global(idx));
            self.types.insert(id, ty.clone());
            return ty;
        }

        // First sighting of an unknown name: diagnose once and intern it so
        // later references resolve quietly.
        self.diagnostics.error(
            format!("undeclared identifier '{}'", name.value),
            name.span,
        );
        self.globals.intern(name.value, Ty::Any);
        self.resolutions.insert(id, Resolution::Unresolved);
        self.types.insert(id, Ty::Error);
        Ty::Error
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn visit_expr(&mut self, expr: &Expr<'_>) -> Ty {
        let ty = match &*expr.kind {
            ExprKind::Literal(lit) => match &lit.kind {
                LiteralKind::Int(_) => Ty::Int,
                LiteralKind::Float(_) => Ty::Float,
                LiteralKind::Bool(_) => Ty::Bool,
                LiteralKind::Nil => Ty::Nil,
                LiteralKind::Str(raw) => {
                    match unescape(raw) {
                        Ok(decoded) => {
                            self.strings.insert(expr.id, decoded);
                        }
                        Err(err) => {
                            // +1 skips the opening quote the parser stripped.
                            let at = lit.span.start + 1 + err.offset as u32;
                            self.diagnostics
                                .error(err.message, Span::new(at, (at + 2).min(lit.span.end)));
                            self.strings.insert(expr.id, raw.to_string());
                        }
                    }
                    Ty::Str
                }
            },
            ExprKind::Symbol(name) => self.resolve_symbol(expr.id, *name, SymbolUse::Read),
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.visit_expr(operand);
                match unary_result(*op, &operand_ty) {
                    Some(ty) => ty,
                    None => {
                        self.diagnostics.error(
                            format!(
                                "unary operator '{}' cannot be applied to {}",
                                op, operand_ty
                            ),
                            expr.span,
                        );
                        Ty::Error
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let lt = self.visit_expr(left);
                let rt = self.visit_expr(right);
                self.binary_type(*op, &lt, &rt, expr.span)
            }
            ExprKind::Group(inner) => self.visit_expr(inner),
            ExprKind::Call { callee, args } => {
                let callee_ty = self.visit_expr(callee);
                let arg_tys: Vec<Ty> = args.iter().map(|a| self.visit_expr(a)).collect();
                match &callee_ty {
                    Ty::Function { params, ret } => {
                        if params.len() != arg_tys.len() {
                            self.diagnostics.error(
                                format!(
                                    "expected {} argument(s), found {}",
                                    params.len(),
                                    arg_tys.len()
                                ),
                                expr.span,
                            );
                        } else {
                            for (i, (param, arg)) in params.iter().zip(&arg_tys).enumerate() {
                                if !param.accepts(arg) {
                                    self.diagnostics.error(
                                        format!(
                                            "argument {} has type {}, expected {}",
                                            i + 1,
                                            arg,
                                            param
                                        ),
                                        args[i].span,
                                    );
                                }
                            }
                        }
                        (**ret).clone()
                    }
                    t if t.is_dynamic() => Ty::Any,
                    other => {
                        self.diagnostics.error(
                            format!("cannot call a value of type {}", other),
                            callee.span,
                        );
                        Ty::Error
                    }
                }
            }
            ExprKind::Subscript { target, index } => {
                let target_ty = self.visit_expr(target);
                let index_ty = self.visit_expr(index);
                self.subscript_type(&target_ty, &index_ty, index, expr.span)
            }
            ExprKind::Member { target, .. } => {
                let target_ty = self.visit_expr(target);
                match &target_ty {
                    Ty::Table => Ty::Any,
                    t if t.is_dynamic() => Ty::Any,
                    other => {
                        self.diagnostics.error(
                            format!("cannot access a member of a value of type {}", other),
                            expr.span,
                        );
                        Ty::Error
                    }
                }
            }
            ExprKind::Tuple(items) => {
                let tys = items.iter().map(|i| self.visit_expr(i)).collect();
                Ty::Tuple(tys)
            }
            ExprKind::Array(items) => {
                let mut elem = None;
                for item in items {
                    let ty = self.visit_expr(item);
                    elem = Some(match elem {
                        None => ty,
                        Some(prev) if prev == ty => prev,
                        Some(_) => Ty::Any,
                    });
                }
                Ty::Array(Box::new(elem.unwrap_or(Ty::Any)))
            }
            ExprKind::Table(entries) => {
                for entry in entries {
                    if let TableKey::Expr(key) = &entry.key {
                        let key_ty = self.visit_expr(key);
                        if !matches!(key_ty, Ty::Str | Ty::Any | Ty::Error) {
                            self.diagnostics.error(
                                format!("table keys must be strings, found {}", key_ty),
                                key.span,
                            );
                        }
                    }
                    self.visit_expr(&entry.value);
                }
                Ty::Table
            }
            ExprKind::Lambda(lambda) => self.visit_lambda(expr.id, lambda),
            ExprKind::Error => Ty::Error,
        };
        self.types.insert(expr.id, ty.clone());
        ty
    }

    fn binary_type(&mut self, op: BinaryOp, left: &Ty, right: &Ty, span: Span) -> Ty {
        match op {
            BinaryOp::And | BinaryOp::Or => Ty::Bool,
            BinaryOp::Eq | BinaryOp::Ne => Ty::Bool,
            BinaryOp::Concat => {
                if left.is_concatenable() && right.is_concatenable() {
                    Ty::Str
                } else {
                    self.diagnostics.error(
                        format!("'..' cannot concatenate {} and {}", left, right),
                        span,
                    );
                    Ty::Error
                }
            }
            op if is_relational(op) => match relational_result(left, right) {
                Some(ty) => ty,
                None => {
                    self.diagnostics.error(
                        format!("operator '{}' cannot compare {} and {}", op, left, right),
                        span,
                    );
                    Ty::Error
                }
            },
            op if is_arithmetic(op) => match arithmetic_result(left, right) {
                Some(ty) => ty,
                None => {
                    self.diagnostics.error(
                        format!(
                            "operator '{}' cannot be applied to {} and {}",
                            op, left, right
                        ),
                        span,
                    );
                    Ty::Error
                }
            },
            op if is_bitwise(op) => match bitwise_result(left, right) {
                Some(ty) => ty,
                None => {
                    self.diagnostics.error(
                        format!(
                            "operator '{}' requires integer operands, found {} and {}",
                            op, left, right
                        ),
                        span,
                    );
                    Ty::Error
                }
            },
            _ => Ty::Any,
        }
    }

    fn subscript_type(
        &mut self,
        target: &Ty,
        index: &Ty,
        index_expr: &Expr<'_>,
        span: Span,
    ) -> Ty {
        match target {
            Ty::Array(elem) => {
                if !matches!(index, Ty::Int | Ty::Any | Ty::Error) {
                    self.diagnostics
                        .error(format!("array index must be int, found {}", index), span);
                }
                (**elem).clone()
            }
            Ty::Tuple(items) => {
                if let ExprKind::Literal(lit) = &*index_expr.kind {
                    if let LiteralKind::Int(i) = lit.kind {
                        if let Some(item) = usize::try_from(i).ok().and_then(|i| items.get(i)) {
                            return item.clone();
                        }
                        self.diagnostics.error(
                            format!("tuple index {} is out of bounds (length {})", i, items.len()),
                            span,
                        );
                        return Ty::Error;
                    }
                }
                Ty::Any
            }
            Ty::Table => {
                if !matches!(index, Ty::Str | Ty::Any | Ty::Error) {
                    self.diagnostics
                        .error(format!("table keys are strings, found {}", index), span);
                }
                Ty::Any
            }
            Ty::Str => {
                if !matches!(index, Ty::Int | Ty::Any | Ty::Error) {
                    self.diagnostics
                        .error(format!("string index must be int, found {}", index), span);
                }
                Ty::Str
            }
            t if t.is_dynamic() => Ty::Any,
            other => {
                self.diagnostics.error(
                    format!("cannot index a value of type {}", other),
                    span,
                );
                Ty::Error
            }
        }
    }

    fn visit_lambda(&mut self, node_id: NodeId, lambda: &Lambda<'_>) -> Ty {
        let param_tys: Vec<Ty> = lambda
            .params
            .iter()
            .map(|p| self.annotation_ty(p.ty.as_ref(), p.span))
            .collect();
        let ret = lambda
            .ret
            .as_ref()
            .map(|r| self.annotation_ty(Some(r), r.span))
            .unwrap_or(Ty::Any);

        let fn_index = self.enter_function(ret.clone());
        self.frame().enter_scope();
        for (param, ty) in lambda.params.iter().zip(&param_tys) {
            if self
                .frame()
                .declare(param.name.value, ty.clone(), false, true)
                .is_none()
            {
                self.diagnostics
                    .error("too many local variables in function", param.span);
            }
        }
        for stmt in &lambda.body {
            self.visit_stmt(stmt);
        }
        self.frame().exit_scope();
        self.exit_function(lambda.params.len() as u16);
        self.fn_ids.insert(node_id, fn_index);

        Ty::Function {
            params: param_tys,
            ret: Box::new(ret),
        }
    }

    fn annotation_ty(
        &mut self,
        annotation: Option<&via_parser::TypeExpr<'_>>,
        span: Span,
    ) -> Ty {
        let Some(annotation) = annotation else {
            return Ty::Any;
        };
        match from_annotation(annotation) {
            Ok(ty) => ty,
            Err(name) => {
                self.diagnostics
                    .error(format!("unknown type name '{}'", name), span);
                Ty::Error
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn visit_stmt(&mut self, stmt: &Stmt<'_>) {
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                ty,
                init,
                is_const,
            } => {
                let init_ty = init.as_ref().map(|e| self.visit_expr(e));
                let annotated = ty.as_ref().map(|t| self.annotation_ty(Some(t), t.span));

                if let (Some(annotated), Some(init_ty)) = (&annotated, &init_ty) {
                    if !annotated.accepts(init_ty) {
                        self.diagnostics.error(
                            format!("type mismatch: expected {}, found {}", annotated, init_ty),
                            init.as_ref().expect("checked init").span,
                        );
                    }
                }

                let declared = annotated.or(init_ty).unwrap_or(Ty::Any);
                match self
                    .frame()
                    .declare(name.value, declared, *is_const, init.is_some())
                {
                    Some(slot) => {
                        // Codegen reads the declaration's slot off the
                        // statement node.
                        self.resolutions.insert(stmt.id, Resolution::Local(slot));
                    }
                    None => self
                        .diagnostics
                        .error("too many local variables in function", name.span),
                }
            }
            StmtKind::FnDecl { name, lambda } => {
                // Bind the name before the body so the function can recurse.
                let param_tys: Vec<Ty> = lambda
                    .params
                    .iter()
                    .map(|p| {
                        p.ty.as_ref()
                            .map(|t| from_annotation(t).unwrap_or(Ty::Error))
                            .unwrap_or(Ty::Any)
                    })
                    .collect();
                let ret = lambda
                    .ret
                    .as_ref()
                    .map(|t| from_annotation(t).unwrap_or(Ty::Error))
                    .unwrap_or(Ty::Any);
                let fn_ty = Ty::Function {
                    params: param_tys,
                    ret: Box::new(ret),
                };
                match self.frame().declare(name.value, fn_ty, true, true) {
                    Some(slot) => {
                        self.resolutions.insert(stmt.id, Resolution::Local(slot));
                    }
                    None => self
                        .diagnostics
                        .error("too many local variables in function", name.span),
                }
                self.visit_lambda(stmt.id, lambda);
            }
            StmtKind::Scope(body) => {
                self.frame().enter_scope();
                for inner in body {
                    self.visit_stmt(inner);
                }
                self.frame().exit_scope();
            }
            StmtKind::If { arms, else_body } => {
                for arm in arms {
                    self.visit_expr(&arm.cond);
                    self.visit_scoped_block(&arm.body);
                }
                if let Some(body) = else_body {
                    self.visit_scoped_block(body);
                }
            }
            StmtKind::While { cond, body } => {
                self.visit_expr(cond);
                self.frame().loop_depth += 1;
                self.visit_scoped_block(body);
                self.frame().loop_depth -= 1;
            }
            StmtKind::ForRange {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let mut bound_tys = vec![self.visit_expr(start), self.visit_expr(limit)];
                if let Some(step) = step {
                    bound_tys.push(self.visit_expr(step));
                }
                for (ty, expr) in bound_tys
                    .iter()
                    .zip([Some(start), Some(limit), step.as_ref()].into_iter().flatten())
                {
                    if !ty.is_numeric() {
                        self.diagnostics.error(
                            format!("for-range bounds must be numeric, found {}", ty),
                            expr.span,
                        );
                    }
                }
                let var_ty = if bound_tys.iter().all(|t| *t == Ty::Int) {
                    Ty::Int
                } else if bound_tys
                    .iter()
                    .all(|t| matches!(t, Ty::Int | Ty::Float))
                {
                    Ty::Float
                } else {
                    Ty::Any
                };
                self.frame().enter_scope();
                match self.frame().declare(var.value, var_ty, false, true) {
                    Some(slot) => {
                        self.resolutions.insert(stmt.id, Resolution::Local(slot));
                    }
                    None => self
                        .diagnostics
                        .error("too many local variables in function", var.span),
                }
                self.frame().loop_depth += 1;
                for inner in body {
                    self.visit_stmt(inner);
                }
                self.frame().loop_depth -= 1;
                self.frame().exit_scope();
            }
            StmtKind::ForEach { var, iter, body } => {
                let iter_ty = self.visit_expr(iter);
                let var_ty = match &iter_ty {
                    Ty::Array(elem) => (**elem).clone(),
                    Ty::Table => {
                        self.diagnostics.add(
                            via_common::Diagnostic::error(
                                "cannot iterate a table directly",
                                iter.span,
                            )
                            .with_help("iterate keys(t) instead"),
                        );
                        Ty::Error
                    }
                    t if t.is_dynamic() => Ty::Any,
                    other => {
                        self.diagnostics.error(
                            format!("cannot iterate a value of type {}", other),
                            iter.span,
                        );
                        Ty::Error
                    }
                };
                self.frame().enter_scope();
                match self.frame().declare(var.value, var_ty, false, true) {
                    Some(slot) => {
                        self.resolutions.insert(stmt.id, Resolution::Local(slot));
                    }
                    None => self
                        .diagnostics
                        .error("too many local variables in function", var.span),
                }
                self.frame().loop_depth += 1;
                for inner in body {
                    self.visit_stmt(inner);
                }
                self.frame().loop_depth -= 1;
                self.frame().exit_scope();
            }
            StmtKind::Assign { target, op, value } => {
                let target_ty = match &*target.kind {
                    ExprKind::Symbol(name) => {
                        let ty = self.resolve_symbol(target.id, *name, SymbolUse::Write);
                        self.types.insert(target.id, ty.clone());
                        ty
                    }
                    _ => self.visit_expr(target),
                };
                let value_ty = self.visit_expr(value);
                let effective = match op {
                    Some(op) => self.binary_type(*op, &target_ty, &value_ty, value.span),
                    None => value_ty,
                };
                if !target_ty.accepts(&effective) {
                    self.diagnostics.error(
                        format!(
                            "type mismatch: cannot assign {} to a binding of type {}",
                            effective, target_ty
                        ),
                        value.span,
                    );
                }
            }
            StmtKind::Return(value) => {
                let value_ty = value
                    .as_ref()
                    .map(|v| self.visit_expr(v))
                    .unwrap_or(Ty::Nil);
                let ret = self.frame().ret.clone();
                if !ret.accepts(&value_ty) {
                    self.diagnostics.error(
                        format!("return type mismatch: expected {}, found {}", ret, value_ty),
                        value.as_ref().map(|v| v.span).unwrap_or(stmt.span),
                    );
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.frame().loop_depth == 0 {
                    let what = if matches!(stmt.kind, StmtKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    self.diagnostics
                        .error(format!("'{}' outside of a loop", what), stmt.span);
                }
            }
            StmtKind::Expr(expr) => {
                self.visit_expr(expr);
            }
            StmtKind::Empty | StmtKind::Error => {}
        }
    }

    fn visit_scoped_block(&mut self, body: &[Stmt<'_>]) {
        self.frame().enter_scope();
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.frame().exit_scope();
    }
}
