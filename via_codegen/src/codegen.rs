//! AST → bytecode translation

use crate::builder::{BytecodeBuilder, Label};
use crate::constant::{Constant, ConstantPool};
use crate::instruction::{type_tag, Instruction, Opcode, OPERAND_NONE};
use crate::regalloc::RegisterAllocator;
use crate::unit::{CaptureSpec, FuncProto, GlobalSpec, Unit};
use via_common::{Diagnostics, ViaError, ViaResult};
use via_parser::{
    BinaryOp, Expr, ExprKind, Lambda, LiteralKind, NodeId, Program, Stmt, StmtKind, TableKey,
    TypeExpr, UnaryOp,
};
use via_sema::{analyze, from_annotation, Resolution, SemaResult, Ty};

/// Result of running the front-end pipeline: a unit when compilation
/// succeeded, plus whatever the passes had to say either way.
#[derive(Debug)]
pub struct Compilation {
    pub unit: Option<Unit>,
    pub diagnostics: Diagnostics,
}

/// Lex, parse, analyze and generate code for `source` at `-O1`.
pub fn compile(source: &str) -> Compilation {
    compile_with_options(source, 1)
}

pub fn compile_with_options(source: &str, opt_level: u8) -> Compilation {
    let (program, mut diagnostics) = via_parser::parse_source(source);
    let (sema, sema_diags) = analyze(&program);
    diagnostics.extend(sema_diags);
    if diagnostics.has_errors() {
        return Compilation {
            unit: None,
            diagnostics,
        };
    }
    match generate(&program, &sema, opt_level) {
        Ok(unit) => Compilation {
            unit: Some(unit),
            diagnostics,
        },
        Err(err) => {
            diagnostics.error(err.to_string(), program.span);
            Compilation {
                unit: None,
                diagnostics,
            }
        }
    }
}

/// Generate code for an already-analyzed program.
pub fn generate(program: &Program<'_>, sema: &SemaResult, opt_level: u8) -> ViaResult<Unit> {
    CodeGen::new(sema, opt_level).run(program)
}

struct LoopFrame {
    continue_label: Label,
    break_label: Label,
}

struct FuncState {
    regs: RegisterAllocator,
    loops: Vec<LoopFrame>,
}

impl FuncState {
    fn new(local_slots: u16) -> Self {
        Self {
            regs: RegisterAllocator::new(local_slots),
            loops: Vec::new(),
        }
    }
}

struct CodeGen<'a> {
    sema: &'a SemaResult,
    opt_level: u8,
    builder: BytecodeBuilder,
    pool: ConstantPool,
    protos: Vec<FuncProto>,
    funcs: Vec<FuncState>,
}

impl<'a> CodeGen<'a> {
    fn new(sema: &'a SemaResult, opt_level: u8) -> Self {
        Self {
            sema,
            opt_level,
            builder: BytecodeBuilder::new(),
            pool: ConstantPool::new(),
            protos: Vec::new(),
            funcs: Vec::new(),
        }
    }

    fn run(mut self, program: &Program<'_>) -> ViaResult<Unit> {
        let main = &self.sema.functions[0];
        self.protos.push(FuncProto {
            entry: 0,
            param_count: 0,
            local_slots: main.local_slots,
            captures: Vec::new(),
        });
        self.funcs.push(FuncState::new(main.local_slots));

        for stmt in &program.stmts {
            self.gen_stmt(stmt)?;
        }
        self.builder.emit(
            Instruction::new(Opcode::Halt, OPERAND_NONE, OPERAND_NONE, OPERAND_NONE),
            "end of program",
        );
        self.builder.resolve_labels()?;

        let (instructions, comments) = self.builder.finish();
        Ok(Unit {
            instructions,
            constants: self.pool.into_values(),
            globals: self
                .sema
                .globals
                .iter()
                .map(|g| GlobalSpec {
                    name: g.name.clone(),
                })
                .collect(),
            protos: self.protos,
            comments,
        })
    }

    fn regs(&mut self) -> &mut RegisterAllocator {
        &mut self.funcs.last_mut().expect("active function").regs
    }

    fn loops(&mut self) -> &mut Vec<LoopFrame> {
        &mut self.funcs.last_mut().expect("active function").loops
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt<'_>) -> ViaResult<()> {
        match &stmt.kind {
            StmtKind::VarDecl { ty, init, .. } => {
                let Resolution::Local(slot) = self.sema.resolution(stmt.id) else {
                    return Ok(());
                };
                match init {
                    Some(init) => {
                        self.gen_expr_to(init, slot)?;
                        self.maybe_type_assert(slot, ty.as_ref(), init.id);
                    }
                    None => self
                        .builder
                        .emit(Instruction::op_a(Opcode::LoadNil, slot), "var without init"),
                }
                Ok(())
            }
            StmtKind::FnDecl { name, lambda } => {
                let Resolution::Local(slot) = self.sema.resolution(stmt.id) else {
                    return Ok(());
                };
                self.gen_lambda(stmt.id, lambda, slot, name.value)
            }
            StmtKind::Scope(body) => {
                for inner in body {
                    self.gen_stmt(inner)?;
                }
                Ok(())
            }
            StmtKind::If { arms, else_body } => {
                let end = self.builder.new_label();
                for arm in arms {
                    let next = self.builder.new_label();
                    let cond = self.regs().allocate()?;
                    self.gen_expr_to(&arm.cond, cond)?;
                    self.builder
                        .emit_cond_jump(Opcode::JumpIfFalse, cond, next, "if cond");
                    self.regs().free(cond);
                    for inner in &arm.body {
                        self.gen_stmt(inner)?;
                    }
                    self.builder.emit_jump(end, "skip other arms");
                    self.builder.place_label(next);
                }
                if let Some(body) = else_body {
                    for inner in body {
                        self.gen_stmt(inner)?;
                    }
                }
                self.builder.place_label(end);
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let head = self.builder.new_label();
                let end = self.builder.new_label();
                self.builder.place_label(head);
                let cond_reg = self.regs().allocate()?;
                self.gen_expr_to(cond, cond_reg)?;
                self.builder
                    .emit_cond_jump(Opcode::JumpIfFalse, cond_reg, end, "while cond");
                self.regs().free(cond_reg);

                self.loops().push(LoopFrame {
                    continue_label: head,
                    break_label: end,
                });
                for inner in body {
                    self.gen_stmt(inner)?;
                }
                self.loops().pop();

                self.builder.emit_jump(head, "loop");
                self.builder.place_label(end);
                Ok(())
            }
            StmtKind::ForRange {
                start,
                limit,
                step,
                body,
                ..
            } => self.gen_for_range(stmt.id, start, limit, step.as_ref(), body),
            StmtKind::ForEach { iter, body, .. } => self.gen_for_each(stmt.id, iter, body),
            StmtKind::Assign { target, op, value } => self.gen_assign(target, *op, value),
            StmtKind::Return(value) => self.gen_return(value.as_ref()),
            StmtKind::Break => {
                if let Some(frame) = self.loops().last() {
                    let label = frame.break_label;
                    self.builder.emit_jump(label, "break");
                }
                Ok(())
            }
            StmtKind::Continue => {
                if let Some(frame) = self.loops().last() {
                    let label = frame.continue_label;
                    self.builder.emit_jump(label, "continue");
                }
                Ok(())
            }
            StmtKind::Expr(expr) => {
                let reg = self.regs().allocate()?;
                self.gen_expr_to(expr, reg)?;
                self.regs().free(reg);
                Ok(())
            }
            StmtKind::Empty | StmtKind::Error => Ok(()),
        }
    }

    /// `for x = start, limit[, step]` — inclusive of the limit, negative
    /// steps supported. The bounds evaluate once, before the first
    /// iteration.
    fn gen_for_range(
        &mut self,
        stmt_id: NodeId,
        start: &Expr<'_>,
        limit: &Expr<'_>,
        step: Option<&Expr<'_>>,
        body: &[Stmt<'_>],
    ) -> ViaResult<()> {
        let Resolution::Local(var) = self.sema.resolution(stmt_id) else {
            return Ok(());
        };

        self.gen_expr_to(start, var)?;
        let limit_reg = self.regs().allocate()?;
        self.gen_expr_to(limit, limit_reg)?;
        let step_reg = self.regs().allocate()?;
        match step {
            Some(step) => self.gen_expr_to(step, step_reg)?,
            None => {
                let one = self.pool.intern(Constant::Int(1))?;
                self.builder.emit(
                    Instruction::op_ab(Opcode::LoadK, step_reg, one),
                    "default step",
                );
            }
        }

        // The step's sign is loop-invariant; test it once.
        let negative_reg = self.regs().allocate()?;
        let zero = self.pool.intern(Constant::Int(0))?;
        let zero_reg = self.regs().allocate()?;
        self.builder
            .emit(Instruction::op_ab(Opcode::LoadK, zero_reg, zero), "");
        self.builder.emit(
            Instruction::new(Opcode::Lt, negative_reg, step_reg, zero_reg),
            "step < 0",
        );
        self.regs().free(zero_reg);

        let head = self.builder.new_label();
        let end = self.builder.new_label();
        let continue_label = self.builder.new_label();
        self.builder.place_label(head);

        let cond = self.regs().allocate()?;
        let descending = self.builder.new_label();
        let test_done = self.builder.new_label();
        self.builder
            .emit_cond_jump(Opcode::JumpIfTrue, negative_reg, descending, "");
        self.builder.emit(
            Instruction::new(Opcode::Le, cond, var, limit_reg),
            "ascending bound",
        );
        self.builder.emit_jump(test_done, "");
        self.builder.place_label(descending);
        self.builder.emit(
            Instruction::new(Opcode::Ge, cond, var, limit_reg),
            "descending bound",
        );
        self.builder.place_label(test_done);
        self.builder
            .emit_cond_jump(Opcode::JumpIfFalse, cond, end, "for cond");
        self.regs().free(cond);

        self.loops().push(LoopFrame {
            continue_label,
            break_label: end,
        });
        for inner in body {
            self.gen_stmt(inner)?;
        }
        self.loops().pop();

        self.builder.place_label(continue_label);
        self.builder.emit(
            Instruction::new(Opcode::Add, var, var, step_reg),
            "advance loop var",
        );
        self.builder.emit_jump(head, "loop");
        self.builder.place_label(end);

        self.regs().free(negative_reg);
        self.regs().free(step_reg);
        self.regs().free(limit_reg);
        Ok(())
    }

    /// `for x in expr` — positional iteration; the length is read once.
    fn gen_for_each(
        &mut self,
        stmt_id: NodeId,
        iter: &Expr<'_>,
        body: &[Stmt<'_>],
    ) -> ViaResult<()> {
        let Resolution::Local(var) = self.sema.resolution(stmt_id) else {
            return Ok(());
        };

        let iter_reg = self.regs().allocate()?;
        self.gen_expr_to(iter, iter_reg)?;
        let len_reg = self.regs().allocate()?;
        self.builder.emit(
            Instruction::op_ab(Opcode::Len, len_reg, iter_reg),
            "iteration length",
        );
        let index_reg = self.regs().allocate()?;
        let zero = self.pool.intern(Constant::Int(0))?;
        self.builder
            .emit(Instruction::op_ab(Opcode::LoadK, index_reg, zero), "");
        let one_reg = self.regs().allocate()?;
        let one = self.pool.intern(Constant::Int(1))?;
        self.builder
            .emit(Instruction::op_ab(Opcode::LoadK, one_reg, one), "");

        let head = self.builder.new_label();
        let end = self.builder.new_label();
        let continue_label = self.builder.new_label();
        self.builder.place_label(head);

        let cond = self.regs().allocate()?;
        self.builder.emit(
            Instruction::new(Opcode::Lt, cond, index_reg, len_reg),
            "more elements",
        );
        self.builder
            .emit_cond_jump(Opcode::JumpIfFalse, cond, end, "for-each cond");
        self.regs().free(cond);
        self.builder.emit(
            Instruction::new(Opcode::GetIndex, var, iter_reg, index_reg),
            "current element",
        );

        self.loops().push(LoopFrame {
            continue_label,
            break_label: end,
        });
        for inner in body {
            self.gen_stmt(inner)?;
        }
        self.loops().pop();

        self.builder.place_label(continue_label);
        self.builder.emit(
            Instruction::new(Opcode::AddInt, index_reg, index_reg, one_reg),
            "advance index",
        );
        self.builder.emit_jump(head, "loop");
        self.builder.place_label(end);

        self.regs().free(one_reg);
        self.regs().free(index_reg);
        self.regs().free(len_reg);
        self.regs().free(iter_reg);
        Ok(())
    }

    fn gen_assign(
        &mut self,
        target: &Expr<'_>,
        op: Option<BinaryOp>,
        value: &Expr<'_>,
    ) -> ViaResult<()> {
        match &*target.kind {
            ExprKind::Symbol(name) => match self.sema.resolution(target.id) {
                Resolution::Local(slot) => {
                    let value_reg = self.regs().allocate()?;
                    self.gen_expr_to(value, value_reg)?;
                    match op {
                        None => self.builder.emit(
                            Instruction::op_ab(Opcode::Move, slot, value_reg),
                            format!("{} = ...", name.value),
                        ),
                        Some(op) => {
                            let opcode = self.select_binary(op, target.id, value.id);
                            self.builder.emit(
                                Instruction::new(opcode, slot, slot, value_reg),
                                format!("{} {}= ...", name.value, op),
                            );
                        }
                    }
                    self.regs().free(value_reg);
                    if op.is_none() {
                        self.maybe_assert_binding(slot, target.id, value.id);
                    }
                    Ok(())
                }
                Resolution::Upvalue(idx) => {
                    match op {
                        None => {
                            let value_reg = self.regs().allocate()?;
                            self.gen_expr_to(value, value_reg)?;
                            self.builder.emit(
                                Instruction::op_ab(Opcode::SetUpvalue, value_reg, idx),
                                format!("{} = ...", name.value),
                            );
                            self.regs().free(value_reg);
                        }
                        Some(op) => {
                            let current = self.regs().allocate()?;
                            self.builder.emit(
                                Instruction::op_ab(Opcode::GetUpvalue, current, idx),
                                name.value.to_string(),
                            );
                            let value_reg = self.regs().allocate()?;
                            self.gen_expr_to(value, value_reg)?;
                            let opcode = self.select_binary(op, target.id, value.id);
                            self.builder.emit(
                                Instruction::new(opcode, current, current, value_reg),
                                "",
                            );
                            self.builder.emit(
                                Instruction::op_ab(Opcode::SetUpvalue, current, idx),
                                format!("{} {}= ...", name.value, op),
                            );
                            self.regs().free(value_reg);
                            self.regs().free(current);
                        }
                    }
                    Ok(())
                }
                Resolution::Global(idx) => {
                    match op {
                        None => {
                            let value_reg = self.regs().allocate()?;
                            self.gen_expr_to(value, value_reg)?;
                            self.builder.emit(
                                Instruction::op_ab(Opcode::SetGlobal, value_reg, idx),
                                format!("{} = ...", name.value),
                            );
                            self.regs().free(value_reg);
                        }
                        Some(op) => {
                            let current = self.regs().allocate()?;
                            self.builder.emit(
                                Instruction::op_ab(Opcode::GetGlobal, current, idx),
                                name.value.to_string(),
                            );
                            let value_reg = self.regs().allocate()?;
                            self.gen_expr_to(value, value_reg)?;
                            let opcode = self.select_binary(op, target.id, value.id);
                            self.builder.emit(
                                Instruction::new(opcode, current, current, value_reg),
                                "",
                            );
                            self.builder.emit(
                                Instruction::op_ab(Opcode::SetGlobal, current, idx),
                                format!("{} {}= ...", name.value, op),
                            );
                            self.regs().free(value_reg);
                            self.regs().free(current);
                        }
                    }
                    Ok(())
                }
                Resolution::Unresolved => {
                    let value_reg = self.regs().allocate()?;
                    self.gen_expr_to(value, value_reg)?;
                    self.regs().free(value_reg);
                    Ok(())
                }
            },
            ExprKind::Subscript {
                target: object,
                index,
            } => {
                let object_reg = self.regs().allocate()?;
                self.gen_expr_to(object, object_reg)?;
                let key_reg = self.regs().allocate()?;
                self.gen_expr_to(index, key_reg)?;
                self.gen_indexed_store(object_reg, key_reg, op, target.id, value)?;
                self.regs().free(key_reg);
                self.regs().free(object_reg);
                Ok(())
            }
            ExprKind::Member {
                target: object,
                field,
            } => {
                let object_reg = self.regs().allocate()?;
                self.gen_expr_to(object, object_reg)?;
                let key = self.pool.intern(Constant::Str(field.value.to_string()))?;
                let key_reg = self.regs().allocate()?;
                self.builder.emit(
                    Instruction::op_ab(Opcode::LoadK, key_reg, key),
                    format!(".{}", field.value),
                );
                self.gen_indexed_store(object_reg, key_reg, op, target.id, value)?;
                self.regs().free(key_reg);
                self.regs().free(object_reg);
                Ok(())
            }
            _ => {
                // Error placeholder target: evaluate the value for effect.
                let reg = self.regs().allocate()?;
                self.gen_expr_to(value, reg)?;
                self.regs().free(reg);
                Ok(())
            }
        }
    }

    fn gen_indexed_store(
        &mut self,
        object_reg: u16,
        key_reg: u16,
        op: Option<BinaryOp>,
        target_id: NodeId,
        value: &Expr<'_>,
    ) -> ViaResult<()> {
        match op {
            None => {
                let value_reg = self.regs().allocate()?;
                self.gen_expr_to(value, value_reg)?;
                self.builder.emit(
                    Instruction::new(Opcode::SetIndex, object_reg, key_reg, value_reg),
                    "store element",
                );
                self.regs().free(value_reg);
            }
            Some(op) => {
                let current = self.regs().allocate()?;
                self.builder.emit(
                    Instruction::new(Opcode::GetIndex, current, object_reg, key_reg),
                    "load element",
                );
                let value_reg = self.regs().allocate()?;
                self.gen_expr_to(value, value_reg)?;
                let opcode = self.select_binary(op, target_id, value.id);
                self.builder
                    .emit(Instruction::new(opcode, current, current, value_reg), "");
                self.builder.emit(
                    Instruction::new(Opcode::SetIndex, object_reg, key_reg, current),
                    "store element",
                );
                self.regs().free(value_reg);
                self.regs().free(current);
            }
        }
        Ok(())
    }

    fn gen_return(&mut self, value: Option<&Expr<'_>>) -> ViaResult<()> {
        match value {
            None => {
                self.builder.emit(
                    Instruction::new(Opcode::ReturnNil, OPERAND_NONE, OPERAND_NONE, OPERAND_NONE),
                    "",
                );
                Ok(())
            }
            Some(expr) => {
                // A returned direct call becomes a tail call; the frame is
                // reused instead of growing the stack. Main has no caller
                // frame to reuse.
                if self.funcs.len() > 1 {
                    if let ExprKind::Call { callee, args } = &*expr.kind {
                        let argc = args.len() as u16;
                        let window = self.regs().allocate_range(argc + 1)?;
                        self.gen_expr_to(callee, window)?;
                        for (i, arg) in args.iter().enumerate() {
                            self.gen_expr_to(arg, window + 1 + i as u16)?;
                        }
                        self.builder.emit(
                            Instruction::op_ab(Opcode::TailCall, window, argc),
                            "tail call",
                        );
                        self.regs().free_range(window, argc + 1);
                        return Ok(());
                    }
                }
                let reg = self.regs().allocate()?;
                self.gen_expr_to(expr, reg)?;
                self.builder
                    .emit(Instruction::op_a(Opcode::Return, reg), "");
                self.regs().free(reg);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Evaluate `expr` into register `dst`.
    fn gen_expr_to(&mut self, expr: &Expr<'_>, dst: u16) -> ViaResult<()> {
        if self.opt_level >= 1 {
            if let Some(folded) = self.fold_expr(expr) {
                if let Constant::Nil = folded {
                    self.builder
                        .emit(Instruction::op_a(Opcode::LoadNil, dst), "");
                } else {
                    let comment = format!("{}", folded);
                    let k = self.pool.intern(folded)?;
                    self.builder
                        .emit(Instruction::op_ab(Opcode::LoadK, dst, k), comment);
                }
                return Ok(());
            }
        }

        match &*expr.kind {
            ExprKind::Literal(lit) => {
                match &lit.kind {
                    LiteralKind::Nil => self
                        .builder
                        .emit(Instruction::op_a(Opcode::LoadNil, dst), ""),
                    _ => {
                        let constant = self.literal_constant(expr.id, &lit.kind);
                        let comment = format!("{}", constant);
                        let k = self.pool.intern(constant)?;
                        self.builder
                            .emit(Instruction::op_ab(Opcode::LoadK, dst, k), comment);
                    }
                }
                Ok(())
            }
            ExprKind::Symbol(name) => {
                match self.sema.resolution(expr.id) {
                    Resolution::Local(slot) => {
                        if slot != dst {
                            self.builder.emit(
                                Instruction::op_ab(Opcode::Move, dst, slot),
                                name.value.to_string(),
                            );
                        }
                    }
                    Resolution::Upvalue(idx) => self.builder.emit(
                        Instruction::op_ab(Opcode::GetUpvalue, dst, idx),
                        name.value.to_string(),
                    ),
                    Resolution::Global(idx) => self.builder.emit(
                        Instruction::op_ab(Opcode::GetGlobal, dst, idx),
                        name.value.to_string(),
                    ),
                    Resolution::Unresolved => self
                        .builder
                        .emit(Instruction::op_a(Opcode::LoadNil, dst), "unresolved"),
                }
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                self.gen_expr_to(operand, dst)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::BitNot => Opcode::BitNot,
                };
                self.builder
                    .emit(Instruction::op_ab(opcode, dst, dst), "");
                Ok(())
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    self.gen_expr_to(left, dst)?;
                    let end = self.builder.new_label();
                    self.builder
                        .emit_cond_jump(Opcode::JumpIfFalse, dst, end, "short-circuit and");
                    self.gen_expr_to(right, dst)?;
                    self.builder.place_label(end);
                    Ok(())
                }
                BinaryOp::Or => {
                    self.gen_expr_to(left, dst)?;
                    let end = self.builder.new_label();
                    self.builder
                        .emit_cond_jump(Opcode::JumpIfTrue, dst, end, "short-circuit or");
                    self.gen_expr_to(right, dst)?;
                    self.builder.place_label(end);
                    Ok(())
                }
                _ => {
                    self.gen_expr_to(left, dst)?;
                    let rhs = self.regs().allocate()?;
                    self.gen_expr_to(right, rhs)?;
                    let opcode = self.select_binary(*op, left.id, right.id);
                    self.builder
                        .emit(Instruction::new(opcode, dst, dst, rhs), "");
                    self.regs().free(rhs);
                    Ok(())
                }
            },
            ExprKind::Group(inner) => self.gen_expr_to(inner, dst),
            ExprKind::Call { callee, args } => {
                let argc = args.len() as u16;
                let window = self.regs().allocate_range(argc + 1)?;
                self.gen_expr_to(callee, window)?;
                for (i, arg) in args.iter().enumerate() {
                    self.gen_expr_to(arg, window + 1 + i as u16)?;
                }
                self.builder.emit(
                    Instruction::new(Opcode::Call, window, argc, dst),
                    format!("call with {} arg(s)", argc),
                );
                self.regs().free_range(window, argc + 1);
                Ok(())
            }
            ExprKind::Subscript { target, index } => {
                self.gen_expr_to(target, dst)?;
                let key = self.regs().allocate()?;
                self.gen_expr_to(index, key)?;
                self.builder
                    .emit(Instruction::new(Opcode::GetIndex, dst, dst, key), "");
                self.regs().free(key);
                Ok(())
            }
            ExprKind::Member { target, field } => {
                self.gen_expr_to(target, dst)?;
                let k = self.pool.intern(Constant::Str(field.value.to_string()))?;
                let key = self.regs().allocate()?;
                self.builder.emit(
                    Instruction::op_ab(Opcode::LoadK, key, k),
                    format!(".{}", field.value),
                );
                self.builder
                    .emit(Instruction::new(Opcode::GetIndex, dst, dst, key), "");
                self.regs().free(key);
                Ok(())
            }
            ExprKind::Tuple(items) | ExprKind::Array(items) => {
                self.builder.emit(
                    Instruction::op_ab(Opcode::NewArray, dst, items.len() as u16),
                    "",
                );
                for (i, item) in items.iter().enumerate() {
                    let k = self.pool.intern(Constant::Int(i as i64))?;
                    let key = self.regs().allocate()?;
                    self.builder
                        .emit(Instruction::op_ab(Opcode::LoadK, key, k), "");
                    let value = self.regs().allocate()?;
                    self.gen_expr_to(item, value)?;
                    self.builder.emit(
                        Instruction::new(Opcode::SetIndex, dst, key, value),
                        "element",
                    );
                    self.regs().free(value);
                    self.regs().free(key);
                }
                Ok(())
            }
            ExprKind::Table(entries) => {
                self.builder
                    .emit(Instruction::op_a(Opcode::NewTable, dst), "");
                for entry in entries {
                    let key = self.regs().allocate()?;
                    match &entry.key {
                        TableKey::Ident(name) => {
                            let k = self
                                .pool
                                .intern(Constant::Str(name.value.to_string()))?;
                            self.builder.emit(
                                Instruction::op_ab(Opcode::LoadK, key, k),
                                format!("key {:?}", name.value),
                            );
                        }
                        TableKey::Expr(expr) => self.gen_expr_to(expr, key)?,
                    }
                    let value = self.regs().allocate()?;
                    self.gen_expr_to(&entry.value, value)?;
                    self.builder.emit(
                        Instruction::new(Opcode::SetIndex, dst, key, value),
                        "entry",
                    );
                    self.regs().free(value);
                    self.regs().free(key);
                }
                Ok(())
            }
            ExprKind::Lambda(lambda) => self.gen_lambda(expr.id, lambda, dst, "<lambda>"),
            ExprKind::Error => {
                self.builder
                    .emit(Instruction::op_a(Opcode::LoadNil, dst), "error placeholder");
                Ok(())
            }
        }
    }

    /// Emit a function body inline, skipped by a forward jump, and build
    /// the closure into `dst`. Captures come from the semantic pass.
    fn gen_lambda(
        &mut self,
        node_id: NodeId,
        lambda: &Lambda<'_>,
        dst: u16,
        name: &str,
    ) -> ViaResult<()> {
        let fn_index = *self
            .sema
            .fn_ids
            .get(&node_id)
            .ok_or_else(|| ViaError::codegen("function body was not analyzed"))?;
        let info = &self.sema.functions[fn_index as usize];

        let skip = self.builder.new_label();
        self.builder.emit_jump(skip, format!("skip body of {}", name));
        let entry = self.builder.next_index();

        self.funcs.push(FuncState::new(info.local_slots));
        for stmt in &lambda.body {
            self.gen_stmt(stmt)?;
        }
        self.builder.emit(
            Instruction::new(Opcode::ReturnNil, OPERAND_NONE, OPERAND_NONE, OPERAND_NONE),
            "implicit return",
        );
        self.funcs.pop();
        self.builder.place_label(skip);

        if self.protos.len() > u16::MAX as usize {
            return Err(ViaError::codegen("too many functions in unit"));
        }
        let proto_index = self.protos.len() as u16;
        self.protos.push(FuncProto {
            entry,
            param_count: info.param_count,
            local_slots: info.local_slots,
            captures: info
                .captures
                .iter()
                .map(|c| CaptureSpec {
                    from_parent: c.from_parent,
                    index: c.index,
                })
                .collect(),
        });
        self.builder.emit(
            Instruction::op_ab(Opcode::Closure, dst, proto_index),
            format!("closure {}", name),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn literal_constant(&self, id: NodeId, kind: &LiteralKind<'_>) -> Constant {
        match kind {
            LiteralKind::Int(i) => Constant::Int(*i),
            LiteralKind::Float(x) => Constant::Float(*x),
            LiteralKind::Bool(b) => Constant::Bool(*b),
            LiteralKind::Nil => Constant::Nil,
            LiteralKind::Str(raw) => Constant::Str(
                self.sema
                    .strings
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| raw.to_string()),
            ),
        }
    }

    /// Pick the typed arithmetic variant when the semantic pass proved both
    /// operand types, the generic opcode otherwise.
    fn select_binary(&self, op: BinaryOp, left_id: NodeId, right_id: NodeId) -> Opcode {
        let generic = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Pow => Opcode::Pow,
            BinaryOp::Concat => return Opcode::Concat,
            BinaryOp::Eq => return Opcode::Eq,
            BinaryOp::Ne => return Opcode::Ne,
            BinaryOp::Lt => return Opcode::Lt,
            BinaryOp::Le => return Opcode::Le,
            BinaryOp::Gt => return Opcode::Gt,
            BinaryOp::Ge => return Opcode::Ge,
            BinaryOp::BitAnd => return Opcode::BitAnd,
            BinaryOp::BitOr => return Opcode::BitOr,
            BinaryOp::BitXor => return Opcode::BitXor,
            BinaryOp::Shl => return Opcode::Shl,
            BinaryOp::Shr => return Opcode::Shr,
            BinaryOp::And | BinaryOp::Or => return Opcode::Move, // handled by jumps
        };
        let lt = self.sema.ty(left_id);
        let rt = self.sema.ty(right_id);
        match (&lt, &rt) {
            (Ty::Int, Ty::Int) => match op {
                BinaryOp::Add => Opcode::AddInt,
                BinaryOp::Sub => Opcode::SubInt,
                BinaryOp::Mul => Opcode::MulInt,
                BinaryOp::Div => Opcode::DivInt,
                BinaryOp::Mod => Opcode::ModInt,
                BinaryOp::Pow => Opcode::PowInt,
                _ => generic,
            },
            (Ty::Int | Ty::Float, Ty::Int | Ty::Float) => match op {
                BinaryOp::Add => Opcode::AddFloat,
                BinaryOp::Sub => Opcode::SubFloat,
                BinaryOp::Mul => Opcode::MulFloat,
                BinaryOp::Div => Opcode::DivFloat,
                BinaryOp::Mod => Opcode::ModFloat,
                BinaryOp::Pow => Opcode::PowFloat,
                _ => generic,
            },
            _ => generic,
        }
    }

    /// `var x: int = f()` keeps the annotation honest at run time when the
    /// initializer's static type is dynamic.
    fn maybe_type_assert(&mut self, slot: u16, ty: Option<&TypeExpr<'_>>, init_id: NodeId) {
        let Some(annotation) = ty else { return };
        if !self.sema.ty(init_id).is_dynamic() {
            return;
        }
        let Ok(declared) = from_annotation(annotation) else {
            return;
        };
        if let Some(tag) = prim_tag(&declared) {
            self.builder.emit(
                Instruction::op_ab(Opcode::TypeAssert, slot, tag),
                format!("expect {}", type_tag::name(tag)),
            );
        }
    }

    fn maybe_assert_binding(&mut self, slot: u16, target_id: NodeId, value_id: NodeId) {
        if !self.sema.ty(value_id).is_dynamic() {
            return;
        }
        if let Some(tag) = prim_tag(&self.sema.ty(target_id)) {
            self.builder.emit(
                Instruction::op_ab(Opcode::TypeAssert, slot, tag),
                format!("expect {}", type_tag::name(tag)),
            );
        }
    }

    // ------------------------------------------------------------------
    // Constant folding (-O >= 1)
    // ------------------------------------------------------------------

    fn fold_expr(&self, expr: &Expr<'_>) -> Option<Constant> {
        match &*expr.kind {
            // Plain literals load from the pool anyway.
            ExprKind::Literal(_) => None,
            ExprKind::Group(inner) => self.fold_expr(inner),
            ExprKind::Unary { op, operand } => {
                let value = self.fold_operand(operand)?;
                fold_unary(*op, value)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.fold_operand(left)?;
                let r = self.fold_operand(right)?;
                fold_binary(*op, l, r)
            }
            _ => None,
        }
    }

    /// Operands fold through literals, groups and nested foldable
    /// operations.
    fn fold_operand(&self, expr: &Expr<'_>) -> Option<Constant> {
        match &*expr.kind {
            ExprKind::Literal(lit) => match &lit.kind {
                LiteralKind::Int(i) => Some(Constant::Int(*i)),
                LiteralKind::Float(x) => Some(Constant::Float(*x)),
                LiteralKind::Bool(b) => Some(Constant::Bool(*b)),
                LiteralKind::Nil => Some(Constant::Nil),
                LiteralKind::Str(_) => self.sema.strings.get(&expr.id).cloned().map(Constant::Str),
            },
            ExprKind::Group(inner) => self.fold_operand(inner),
            ExprKind::Unary { .. } | ExprKind::Binary { .. } => self.fold_expr(expr),
            _ => None,
        }
    }
}

fn truthy(constant: &Constant) -> bool {
    !matches!(constant, Constant::Nil | Constant::Bool(false))
}

fn fold_unary(op: UnaryOp, value: Constant) -> Option<Constant> {
    match (op, value) {
        (UnaryOp::Neg, Constant::Int(i)) => Some(Constant::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Constant::Float(x)) => Some(Constant::Float(-x)),
        (UnaryOp::Not, v) => Some(Constant::Bool(!truthy(&v))),
        (UnaryOp::BitNot, Constant::Int(i)) => Some(Constant::Int(!i)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, left: Constant, right: Constant) -> Option<Constant> {
    use Constant::{Bool, Float, Int, Str};
    match op {
        BinaryOp::And => Some(if truthy(&left) { right } else { left }),
        BinaryOp::Or => Some(if truthy(&left) { left } else { right }),
        BinaryOp::Concat => match (left, right) {
            (Str(a), Str(b)) => Some(Str(a + &b)),
            _ => None,
        },
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = constants_equal(&left, &right)?;
            Some(Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Int(a), Int(b)) => a.partial_cmp(b),
                (Float(a), Float(b)) => a.partial_cmp(b),
                (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
                (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
                (Str(a), Str(b)) => a.partial_cmp(b),
                _ => return None,
            }?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Some(Bool(result))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        | BinaryOp::Pow => match (left, right) {
            (Int(a), Int(b)) => fold_int_arith(op, a, b),
            (Float(a), Float(b)) => Some(Float(apply_float(op, a, b))),
            (Int(a), Float(b)) => Some(Float(apply_float(op, a as f64, b))),
            (Float(a), Int(b)) => Some(Float(apply_float(op, a, b as f64))),
            _ => None,
        },
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
            match (left, right) {
                (Int(a), Int(b)) => Some(Int(match op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    BinaryOp::Shl => a.wrapping_shl(b as u32),
                    _ => a.wrapping_shr(b as u32),
                })),
                _ => None,
            }
        }
    }
}

fn constants_equal(left: &Constant, right: &Constant) -> Option<bool> {
    use Constant::{Bool, Float, Int, Str};
    Some(match (left, right) {
        (Constant::Nil, Constant::Nil) => true,
        (Bool(a), Bool(b)) => a == b,
        (Int(a), Int(b)) => a == b,
        (Float(a), Float(b)) => a == b,
        (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
        (Str(a), Str(b)) => a == b,
        _ => false,
    })
}

fn fold_int_arith(op: BinaryOp, a: i64, b: i64) -> Option<Constant> {
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        // Division by zero must stay a runtime error.
        BinaryOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinaryOp::Pow => {
            let exp = u32::try_from(b).ok()?;
            a.wrapping_pow(exp)
        }
        _ => return None,
    };
    Some(Constant::Int(result))
}

fn apply_float(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => a.powf(b),
    }
}

fn prim_tag(ty: &Ty) -> Option<u16> {
    match ty {
        Ty::Nil => Some(type_tag::NIL),
        Ty::Int => Some(type_tag::INT),
        Ty::Float => Some(type_tag::FLOAT),
        Ty::Bool => Some(type_tag::BOOL),
        Ty::Str => Some(type_tag::STR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile_ok(source: &str) -> Unit {
        let result = compile(source);
        assert!(
            !result.diagnostics.has_errors(),
            "unexpected errors: {:?}",
            result.diagnostics.messages
        );
        let unit = result.unit.expect("unit");
        unit.validate().expect("valid unit");
        unit
    }

    #[test]
    fn straight_line_program_compiles() {
        let unit = compile_ok("var x = 10\nx = x + 1\nprint(x)");
        assert_eq!(unit.instructions.last().unwrap().op, Opcode::Halt);
        assert!(unit
            .instructions
            .iter()
            .any(|i| i.op == Opcode::Call));
    }

    #[test]
    fn compile_failure_produces_no_unit() {
        let result = compile("print(missing)");
        assert!(result.diagnostics.has_errors());
        assert!(result.unit.is_none());
    }

    #[test]
    fn constant_folding_collapses_literal_arithmetic() {
        let unit = compile_ok("var x = 1 + 2 * 3");
        // One LoadK of 7, no arithmetic instructions.
        assert!(unit.constants.contains(&Constant::Int(7)));
        assert!(!unit
            .instructions
            .iter()
            .any(|i| matches!(i.op, Opcode::Add | Opcode::AddInt | Opcode::Mul | Opcode::MulInt)));
    }

    #[test]
    fn folding_disabled_at_o0() {
        let result = compile_with_options("var x = 1 + 2 * 3", 0);
        let unit = result.unit.expect("unit");
        assert!(unit
            .instructions
            .iter()
            .any(|i| matches!(i.op, Opcode::AddInt | Opcode::MulInt)));
    }

    #[test]
    fn division_by_literal_zero_is_not_folded() {
        let unit = compile_ok("var x = 1 / 0");
        assert!(unit
            .instructions
            .iter()
            .any(|i| matches!(i.op, Opcode::Div | Opcode::DivInt)));
    }

    #[test]
    fn typed_opcodes_for_known_ints() {
        let unit = compile_ok("var a = 1\nvar b = 2\nvar c = a + b");
        assert!(unit.instructions.iter().any(|i| i.op == Opcode::AddInt));
    }

    #[test]
    fn generic_opcode_for_dynamic_operands() {
        let unit = compile_ok("fn f(x) { return x + 1 }");
        assert!(unit.instructions.iter().any(|i| i.op == Opcode::Add));
    }

    #[test]
    fn mixed_numeric_uses_float_variant() {
        let unit = compile_ok("var a = 1\nvar b = 2.5\nvar c = a + b");
        assert!(unit.instructions.iter().any(|i| i.op == Opcode::AddFloat));
    }

    #[test]
    fn call_arguments_occupy_consecutive_registers() {
        let unit = compile_ok("fn add(a, b) { return a + b }\nprint(add(1, 2))");
        let call = unit
            .instructions
            .iter()
            .filter(|i| i.op == Opcode::Call)
            .find(|i| i.b == 2)
            .expect("two-arg call");
        // Callee register plus argc; arguments live right above it.
        assert!(call.a >= unit.main_local_slots());
    }

    #[test]
    fn closures_get_protos_with_captures() {
        let unit = compile_ok("fn mk() { var c = 0\nreturn fn () { c = c + 1\nreturn c } }");
        assert_eq!(unit.protos.len(), 3);
        let inner = unit
            .protos
            .iter()
            .find(|p| !p.captures.is_empty())
            .expect("capturing proto");
        assert!(inner.captures[0].from_parent);
    }

    #[test]
    fn function_bodies_are_skipped_by_forward_jumps() {
        let unit = compile_ok("fn f() { return 1 }\nprint(f())");
        let jump = &unit.instructions[0];
        assert_eq!(jump.op, Opcode::Jump);
        // The jump lands past the body, on or before the closure emission.
        assert!(jump.a as usize > 1);
        assert!(unit.instructions[jump.a as usize].op == Opcode::Closure);
    }

    #[test]
    fn while_loop_jumps_backwards() {
        let unit = compile_ok("var i = 0\nwhile i < 3 { i = i + 1 }");
        let back_jump = unit
            .instructions
            .iter()
            .enumerate()
            .find(|(idx, i)| i.op == Opcode::Jump && (i.a as usize) < *idx);
        assert!(back_jump.is_some(), "expected a backward jump");
    }

    #[test]
    fn break_targets_loop_end() {
        compile_ok("while true { break }");
    }

    #[test]
    fn tail_position_call_uses_tailcall() {
        let unit = compile_ok(
            "fn loop_to(n, i) { if i >= n { return i } return loop_to(n, i + 1) }\nprint(loop_to(10, 0))",
        );
        assert!(unit.instructions.iter().any(|i| i.op == Opcode::TailCall));
    }

    #[test]
    fn annotated_dynamic_init_gets_type_assert() {
        let unit = compile_ok("fn f() { return 1 }\nvar x: int = f()");
        assert!(unit.instructions.iter().any(|i| i.op == Opcode::TypeAssert));
    }

    #[test]
    fn globals_table_matches_sema_order() {
        let unit = compile_ok("print(1)");
        assert_eq!(unit.globals[0].name, "print");
    }

    #[test]
    fn string_constants_are_decoded_and_deduped() {
        let unit = compile_ok("var a = \"x\\n\"\nvar b = \"x\\n\"");
        let strings: Vec<_> = unit
            .constants
            .iter()
            .filter(|c| matches!(c, Constant::Str(_)))
            .collect();
        assert_eq!(strings.len(), 1);
        assert_eq!(*strings[0], Constant::Str("x\n".to_string()));
    }

    #[test]
    fn jumps_resolve_to_absolute_targets() {
        let unit = compile_ok("if true { print(1) } else { print(2) }");
        for instr in &unit.instructions {
            match instr.op {
                Opcode::Jump => assert!(instr.a != OPERAND_NONE),
                Opcode::JumpIfTrue | Opcode::JumpIfFalse => assert!(instr.b != OPERAND_NONE),
                _ => {}
            }
        }
    }
}
