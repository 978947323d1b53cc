//! Parser implementation

use crate::ast::*;
use crate::precedence::{binary_operator, compound_operator, Precedence};
use smallvec::SmallVec;
use via_common::{Diagnostics, Span, Spanned};
use via_lexer::{Token, TokenKind};

/// Recursive-descent parser over a token vector.
///
/// The parser never aborts: errors become diagnostics plus placeholder
/// nodes, and `synchronize` skips to the next statement starter. The
/// diagnostics bus is authoritative for success.
pub struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    current: usize,
    next_node_id: NodeId,
    diagnostics: Diagnostics,
}

impl<'src> Parser<'src> {
    pub fn new(tokens: Vec<Token<'src>>) -> Self {
        let mut tokens = tokens;
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, "", Span::at(0)));
        }
        Self {
            tokens,
            current: 0,
            next_node_id: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    pub fn parse_program(&mut self) -> Program<'src> {
        let start = self.current_span();
        let stmts = self.parse_statements_until(TokenKind::Eof);
        let span = start.combine(self.current_span());
        Program { stmts, span }
    }

    /// Parse statements until `end` (or EOF), synchronizing after errors and
    /// guaranteeing forward progress.
    fn parse_statements_until(&mut self, end: TokenKind) -> Vec<Stmt<'src>> {
        let mut stmts = Vec::new();
        while !self.check(end) && !self.check(TokenKind::Eof) {
            let before = self.current;
            let stmt = self.parse_statement();
            let errored = matches!(stmt.kind, StmtKind::Error);
            stmts.push(stmt);
            if errored {
                self.synchronize();
            }
            if self.current == before {
                self.advance();
            }
        }
        stmts
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        match self.current_kind() {
            TokenKind::Semicolon => {
                self.advance();
                self.stmt(StmtKind::Empty, start)
            }
            TokenKind::KwVar => self.parse_var_decl(false),
            TokenKind::KwConst => self.parse_var_decl(true),
            TokenKind::KwFn if self.peek_kind(1) == TokenKind::Ident => self.parse_fn_decl(),
            TokenKind::LBrace => {
                let body = self.parse_block();
                let span = start.combine(self.previous_span());
                self.stmt(StmtKind::Scope(body), span)
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwReturn => self.parse_return(),
            TokenKind::KwBreak => {
                self.advance();
                self.eat_semicolon();
                self.stmt(StmtKind::Break, start)
            }
            TokenKind::KwContinue => {
                self.advance();
                self.eat_semicolon();
                self.stmt(StmtKind::Continue, start)
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_var_decl(&mut self, is_const: bool) -> Stmt<'src> {
        let start = self.current_span();
        self.advance(); // var / const

        let name = match self.expect_ident("variable name") {
            Some(name) => name,
            None => return self.error_stmt(start),
        };

        let ty = if self.match_token(TokenKind::Colon) {
            self.parse_type()
        } else {
            None
        };

        let init = if self.match_token(TokenKind::Assign) {
            Some(self.parse_expression())
        } else {
            if is_const {
                self.diagnostics
                    .error("const declaration requires an initializer", name.span);
            }
            None
        };

        self.eat_semicolon();
        let span = start.combine(self.previous_span());
        self.stmt(
            StmtKind::VarDecl {
                name,
                ty,
                init,
                is_const,
            },
            span,
        )
    }

    fn parse_fn_decl(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        self.advance(); // fn
        let name = match self.expect_ident("function name") {
            Some(name) => name,
            None => return self.error_stmt(start),
        };
        let lambda = self.parse_fn_tail(start);
        let span = start.combine(self.previous_span());
        self.stmt(StmtKind::FnDecl { name, lambda }, span)
    }

    fn parse_if(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        let mut arms = Vec::new();
        let mut else_body = None;

        loop {
            self.advance(); // if
            let arm_start = self.previous_span();
            let cond = self.parse_expression();
            let body = self.parse_block();
            let span = arm_start.combine(self.previous_span());
            arms.push(IfArm { cond, body, span });

            if !self.match_token(TokenKind::KwElse) {
                break;
            }
            if !self.check(TokenKind::KwIf) {
                else_body = Some(self.parse_block());
                break;
            }
        }

        let span = start.combine(self.previous_span());
        self.stmt(StmtKind::If { arms, else_body }, span)
    }

    fn parse_while(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        self.advance(); // while
        let cond = self.parse_expression();
        let body = self.parse_block();
        let span = start.combine(self.previous_span());
        self.stmt(StmtKind::While { cond, body }, span)
    }

    fn parse_for(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        self.advance(); // for
        let var = match self.expect_ident("loop variable") {
            Some(var) => var,
            None => return self.error_stmt(start),
        };

        if self.match_token(TokenKind::Assign) {
            let first = self.parse_expression();
            self.expect(TokenKind::Comma);
            let limit = self.parse_expression();
            let step = if self.match_token(TokenKind::Comma) {
                Some(self.parse_expression())
            } else {
                None
            };
            let body = self.parse_block();
            let span = start.combine(self.previous_span());
            self.stmt(
                StmtKind::ForRange {
                    var,
                    start: first,
                    limit,
                    step,
                    body,
                },
                span,
            )
        } else if self.match_token(TokenKind::KwIn) {
            let iter = self.parse_expression();
            let body = self.parse_block();
            let span = start.combine(self.previous_span());
            self.stmt(StmtKind::ForEach { var, iter, body }, span)
        } else {
            self.error_at_current("expected '=' or 'in' after loop variable");
            self.error_stmt(start)
        }
    }

    fn parse_return(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        self.advance(); // return
        let value = if matches!(
            self.current_kind(),
            TokenKind::RBrace | TokenKind::Semicolon | TokenKind::Eof
        ) {
            None
        } else {
            Some(self.parse_expression())
        };
        self.eat_semicolon();
        let span = start.combine(self.previous_span());
        self.stmt(StmtKind::Return(value), span)
    }

    fn parse_expr_or_assign(&mut self) -> Stmt<'src> {
        let start = self.current_span();
        let before = self.current;
        let target = self.parse_expression();

        if target.is_error() && self.current == before {
            // Nothing consumed; the caller synchronizes.
            return self.error_stmt(start);
        }

        let kind = match self.current_kind() {
            TokenKind::Assign => {
                self.advance();
                let value = self.parse_expression();
                self.check_assign_target(&target);
                StmtKind::Assign {
                    target,
                    op: None,
                    value,
                }
            }
            kind if compound_operator(kind).is_some() => {
                let op = compound_operator(kind);
                self.advance();
                let value = self.parse_expression();
                self.check_assign_target(&target);
                StmtKind::Assign { target, op, value }
            }
            TokenKind::Inc | TokenKind::Dec => {
                let op = if self.check(TokenKind::Inc) {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                let op_span = self.current_span();
                self.advance();
                self.check_assign_target(&target);
                let one = self.expr(
                    ExprKind::Literal(Literal {
                        kind: LiteralKind::Int(1),
                        span: op_span,
                    }),
                    op_span,
                );
                StmtKind::Assign {
                    target,
                    op: Some(op),
                    value: one,
                }
            }
            _ => StmtKind::Expr(target),
        };

        self.eat_semicolon();
        let span = start.combine(self.previous_span());
        self.stmt(kind, span)
    }

    fn check_assign_target(&mut self, target: &Expr<'src>) {
        if !target.is_assign_target() && !target.is_error() {
            self.diagnostics
                .error("invalid assignment target", target.span);
        }
    }

    /// `{ stmt* }`. A missing opening brace yields an empty body.
    fn parse_block(&mut self) -> Vec<Stmt<'src>> {
        if !self.expect(TokenKind::LBrace) {
            return Vec::new();
        }
        let stmts = self.parse_statements_until(TokenKind::RBrace);
        self.expect(TokenKind::RBrace);
        stmts
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Expr<'src> {
        self.parse_precedence(Precedence::Or)
    }

    fn parse_precedence(&mut self, min: Precedence) -> Expr<'src> {
        let mut left = self.parse_unary();
        while let Some((prec, op, right_assoc)) = binary_operator(self.current_kind()) {
            if prec < min {
                break;
            }
            self.advance();
            let rhs_min = if right_assoc { prec } else { prec.next() };
            let right = self.parse_precedence(rhs_min);
            let span = left.span.combine(right.span);
            left = self.expr(ExprKind::Binary { op, left, right }, span);
        }
        left
    }

    fn parse_unary(&mut self) -> Expr<'src> {
        let op = match self.current_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang | TokenKind::KwNot => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let start = self.current_span();
        self.advance();
        let operand = self.parse_unary();
        let span = start.combine(operand.span);
        self.expr(ExprKind::Unary { op, operand }, span)
    }

    fn parse_postfix(&mut self) -> Expr<'src> {
        let mut expr = self.parse_primary();
        loop {
            match self.current_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args: SmallVec<[Expr<'src>; 4]> = SmallVec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression());
                            if !self.match_token(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen);
                    let span = expr.span.combine(self.previous_span());
                    expr = self.expr(
                        ExprKind::Call {
                            callee: expr,
                            args: args.into_vec(),
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression();
                    self.expect(TokenKind::RBracket);
                    let span = expr.span.combine(self.previous_span());
                    expr = self.expr(
                        ExprKind::Subscript {
                            target: expr,
                            index,
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = match self.expect_ident("member name") {
                        Some(field) => field,
                        None => break,
                    };
                    let span = expr.span.combine(field.span);
                    expr = self.expr(
                        ExprKind::Member {
                            target: expr,
                            field,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr<'src> {
        let token = self.current_token();
        let span = token.span;
        match token.kind {
            TokenKind::Int => {
                self.advance();
                let value = self.parse_int_lexeme(token.lexeme, 10, span);
                self.literal(LiteralKind::Int(value), span)
            }
            TokenKind::HexInt => {
                self.advance();
                let value = self.parse_int_lexeme(&token.lexeme[2..], 16, span);
                self.literal(LiteralKind::Int(value), span)
            }
            TokenKind::BinInt => {
                self.advance();
                let value = self.parse_int_lexeme(&token.lexeme[2..], 2, span);
                self.literal(LiteralKind::Int(value), span)
            }
            TokenKind::Float => {
                self.advance();
                let value = token.lexeme.parse::<f64>().unwrap_or_else(|_| {
                    self.diagnostics.error("malformed float literal", span);
                    0.0
                });
                self.literal(LiteralKind::Float(value), span)
            }
            TokenKind::Str => {
                self.advance();
                // Strip the enclosing quotes; escapes decode in sema.
                let inner = &token.lexeme[1..token.lexeme.len() - 1];
                self.literal(LiteralKind::Str(inner), span)
            }
            TokenKind::True => {
                self.advance();
                self.literal(LiteralKind::Bool(true), span)
            }
            TokenKind::False => {
                self.advance();
                self.literal(LiteralKind::Bool(false), span)
            }
            TokenKind::Nil => {
                self.advance();
                self.literal(LiteralKind::Nil, span)
            }
            TokenKind::Ident => {
                self.advance();
                self.expr(ExprKind::Symbol(Spanned::new(token.lexeme, span)), span)
            }
            TokenKind::MacroIdent => {
                self.error_at_current("macro invocations are not supported here");
                self.advance();
                self.expr(ExprKind::Error, span)
            }
            TokenKind::LParen => self.parse_group_or_tuple(),
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_table_literal(),
            TokenKind::KwFn => {
                let start = self.current_span();
                self.advance();
                let lambda = self.parse_fn_tail(start);
                let span = lambda.span;
                self.expr(ExprKind::Lambda(lambda), span)
            }
            _ => {
                self.error_at_current(&format!(
                    "expected expression, found {}",
                    token.kind
                ));
                // Not consumed: the statement level synchronizes.
                self.expr(ExprKind::Error, span)
            }
        }
    }

    fn parse_group_or_tuple(&mut self) -> Expr<'src> {
        let start = self.current_span();
        self.advance(); // (

        if self.match_token(TokenKind::RParen) {
            let span = start.combine(self.previous_span());
            return self.expr(ExprKind::Tuple(Vec::new()), span);
        }

        let first = self.parse_expression();
        if self.match_token(TokenKind::Comma) {
            let mut items = vec![first];
            while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
                items.push(self.parse_expression());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen);
            let span = start.combine(self.previous_span());
            self.expr(ExprKind::Tuple(items), span)
        } else {
            self.expect(TokenKind::RParen);
            let span = start.combine(self.previous_span());
            self.expr(ExprKind::Group(first), span)
        }
    }

    fn parse_array_literal(&mut self) -> Expr<'src> {
        let start = self.current_span();
        self.advance(); // [
        let mut items = Vec::new();
        while !self.check(TokenKind::RBracket) && !self.check(TokenKind::Eof) {
            items.push(self.parse_expression());
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket);
        let span = start.combine(self.previous_span());
        self.expr(ExprKind::Array(items), span)
    }

    fn parse_table_literal(&mut self) -> Expr<'src> {
        let start = self.current_span();
        self.advance(); // {
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let entry_start = self.current_span();
            let key = if self.match_token(TokenKind::LBracket) {
                let key = self.parse_expression();
                self.expect(TokenKind::RBracket);
                TableKey::Expr(key)
            } else if let Some(name) = self.expect_ident("table key") {
                TableKey::Ident(name)
            } else {
                break;
            };
            self.expect(TokenKind::Assign);
            let value = self.parse_expression();
            let span = entry_start.combine(value.span);
            entries.push(TableEntry { key, value, span });
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace);
        let span = start.combine(self.previous_span());
        self.expr(ExprKind::Table(entries), span)
    }

    /// Parameter list, optional return annotation and body. The `fn`
    /// keyword (and name, for declarations) is already consumed.
    fn parse_fn_tail(&mut self, start: Span) -> Lambda<'src> {
        self.expect(TokenKind::LParen);
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            let Some(name) = self.expect_ident("parameter name") else {
                break;
            };
            let ty = if self.match_token(TokenKind::Colon) {
                self.parse_type()
            } else {
                None
            };
            let span = name
                .span
                .combine(ty.as_ref().map(|t| t.span).unwrap_or(name.span));
            params.push(Param { name, ty, span });
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen);

        let ret = if self.match_token(TokenKind::Arrow) {
            self.parse_type()
        } else {
            None
        };

        let body = self.parse_block();
        let span = start.combine(self.previous_span());
        Lambda {
            params,
            ret,
            body,
            span,
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn parse_type(&mut self) -> Option<TypeExpr<'src>> {
        let token = self.current_token();
        let start = token.span;
        match token.kind {
            TokenKind::Ident => {
                self.advance();
                let kind = match token.lexeme {
                    "int" => TypeExprKind::Primitive(PrimitiveType::Int),
                    "float" => TypeExprKind::Primitive(PrimitiveType::Float),
                    "bool" => TypeExprKind::Primitive(PrimitiveType::Bool),
                    "string" => TypeExprKind::Primitive(PrimitiveType::Str),
                    _ => {
                        let name = Spanned::new(token.lexeme, start);
                        let mut args = Vec::new();
                        if self.match_token(TokenKind::Less) {
                            while !self.check(TokenKind::Greater) && !self.check(TokenKind::Eof) {
                                args.push(self.parse_type()?);
                                if !self.match_token(TokenKind::Comma) {
                                    break;
                                }
                            }
                            self.expect(TokenKind::Greater);
                        }
                        TypeExprKind::Named { name, args }
                    }
                };
                let span = start.combine(self.previous_span());
                Some(TypeExpr {
                    kind: Box::new(kind),
                    span,
                })
            }
            TokenKind::Nil => {
                self.advance();
                Some(TypeExpr {
                    kind: Box::new(TypeExprKind::Primitive(PrimitiveType::Nil)),
                    span: start,
                })
            }
            TokenKind::KwFn => {
                self.advance();
                self.expect(TokenKind::LParen);
                let mut params = Vec::new();
                while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
                    params.push(self.parse_type()?);
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen);
                self.expect(TokenKind::Arrow);
                let ret = self.parse_type()?;
                let span = start.combine(self.previous_span());
                Some(TypeExpr {
                    kind: Box::new(TypeExprKind::Function { params, ret }),
                    span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
                    items.push(self.parse_type()?);
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen);
                let span = start.combine(self.previous_span());
                Some(TypeExpr {
                    kind: Box::new(TypeExprKind::Tuple(items)),
                    span,
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let element = self.parse_type()?;
                self.expect(TokenKind::RBracket);
                let span = start.combine(self.previous_span());
                Some(TypeExpr {
                    kind: Box::new(TypeExprKind::Array(element)),
                    span,
                })
            }
            _ => {
                self.error_at_current(&format!("expected type, found {}", token.kind));
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Error recovery
    // ------------------------------------------------------------------

    /// Skip tokens until a statement starter. Called after a statement-level
    /// parse error.
    fn synchronize(&mut self) {
        while !self.check(TokenKind::Eof) {
            if self.current_kind().starts_statement() {
                return;
            }
            self.advance();
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let span = self.current_span();
        self.diagnostics.error(message, span);
    }

    fn error_stmt(&mut self, start: Span) -> Stmt<'src> {
        let span = start.combine(self.current_span());
        self.stmt(StmtKind::Error, span)
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn current_token(&self) -> Token<'src> {
        self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> TokenKind {
        self.current_token().kind
    }

    fn current_span(&self) -> Span {
        self.current_token().span
    }

    fn peek_kind(&self, ahead: usize) -> TokenKind {
        self.tokens[(self.current + ahead).min(self.tokens.len() - 1)].kind
    }

    fn previous_span(&self) -> Span {
        if self.current == 0 {
            return self.current_span();
        }
        self.tokens[self.current - 1].span
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume `kind` or report "expected …, found …".
    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.match_token(kind) {
            true
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                kind,
                self.current_kind()
            ));
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Option<Spanned<&'src str>> {
        let token = self.current_token();
        if token.kind == TokenKind::Ident {
            self.advance();
            Some(Spanned::new(token.lexeme, token.span))
        } else {
            self.error_at_current(&format!("expected {}, found {}", what, token.kind));
            None
        }
    }

    fn eat_semicolon(&mut self) {
        self.match_token(TokenKind::Semicolon);
    }

    fn parse_int_lexeme(&mut self, digits: &str, radix: u32, span: Span) -> i64 {
        // Two's-complement wrap: hex/bin literals may set the sign bit.
        match u64::from_str_radix(digits, radix) {
            Ok(value) => value as i64,
            Err(_) => {
                self.diagnostics.error("integer literal out of range", span);
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // Node construction
    // ------------------------------------------------------------------

    fn next_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind<'src>, span: Span) -> Expr<'src> {
        Expr {
            kind: Box::new(kind),
            span,
            id: self.next_id(),
        }
    }

    fn literal(&mut self, kind: LiteralKind<'src>, span: Span) -> Expr<'src> {
        self.expr(ExprKind::Literal(Literal { kind, span }), span)
    }

    fn stmt(&mut self, kind: StmtKind<'src>, span: Span) -> Stmt<'src> {
        Stmt {
            kind,
            span,
            id: self.next_id(),
        }
    }
}

/// Lex and parse in one step.
pub fn parse_source(source: &str) -> (Program<'_>, Diagnostics) {
    let mut lexer = via_lexer::Lexer::new(source);
    let tokens = lexer.tokenize();
    let mut diagnostics = lexer.into_diagnostics();
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    diagnostics.extend(parser.into_diagnostics());
    (program, diagnostics)
}
