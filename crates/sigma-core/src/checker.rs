//! Semantic analysis: declaration collection, overload resolution, implicit
//! cast validation, and the control-flow-return-path validator.
//!
//! Two passes over a file's top-level items, built on `scope.rs`'s
//! `ScopeStack` for symbol collection before reference resolution: pass one
//! declares every function and struct name into the file namespace scope so
//! forward references typecheck; pass two walks each function body,
//! resolving identifiers and scoring call overloads by cast cost
//! (`types.rs::TypeTable::cast_cost`).

use crate::ast::{AstBase, AstId, AstKind, AstRef, BinOp, UnOp};
use crate::ast::{
    AssignExpr, BinaryExpr, Block, Call, CastExpr, ExprStmt, FieldDecl, Function, IdentExpr, If,
    Literal, LiteralValue, MemberExpr, Param, Return, StructDecl, UnaryExpr, VarDecl,
};
use crate::context::TranslationUnitContext;
use crate::scope::{ScopeKind, ScopeStack};
use crate::symbol::{SymId, SymKind};
use crate::types::{FloatWidth, IntWidth, Type, TypeId};
use sigma_error::{Error, SourceSpan};

pub struct Checker<'tcx> {
    ctx: &'tcx TranslationUnitContext<'tcx>,
    scopes: ScopeStack<'tcx>,
}

impl<'tcx> Checker<'tcx> {
    pub fn new(ctx: &'tcx TranslationUnitContext<'tcx>) -> Self {
        Self {
            ctx,
            scopes: ScopeStack::new(&ctx.arena, &ctx.interner),
        }
    }

    /// Resolve a type annotation name to a `TypeId`, reporting
    /// `UnknownTypeName` and falling back to `void` on failure so the rest
    /// of the pass can keep going and surface any further diagnostics.
    fn resolve_type_name(&self, name: &str) -> TypeId {
        {
            let types = self.ctx.types.read();
            let builtin = match name {
                "void" => Some(types.void()),
                "bool" => Some(types.bool_()),
                "i8" => Some(types.int(IntWidth::W8, true)),
                "i16" => Some(types.int(IntWidth::W16, true)),
                "i32" => Some(types.int(IntWidth::W32, true)),
                "i64" => Some(types.int(IntWidth::W64, true)),
                "u8" => Some(types.int(IntWidth::W8, false)),
                "u16" => Some(types.int(IntWidth::W16, false)),
                "u32" => Some(types.int(IntWidth::W32, false)),
                "u64" => Some(types.int(IntWidth::W64, false)),
                _ => None,
            };
            if let Some(ty) = builtin {
                return ty;
            }
        }
        if name == "f32" {
            return self.ctx.types.write().intern(Type::Float(FloatWidth::W32));
        }
        if name == "f64" {
            return self.ctx.types.write().intern(Type::Float(FloatWidth::W64));
        }

        if let Some(sym) = self.scopes.resolve(name) {
            if sym.kind() == SymKind::Struct {
                if let Some(ty) = sym.ty() {
                    return ty;
                }
            }
        }
        self.ctx.report(Error::unknown_type(name));
        self.ctx.types.read().void()
    }

    /// Pass one: declare every top-level function and struct into the file
    /// namespace scope. Must run before `check_function` so mutually
    /// recursive calls resolve.
    pub fn declare_items(&mut self, functions: &[AstId], structs: &[AstId]) {
        self.scopes.push(crate::context::FILE_SCOPE_OWNER, ScopeKind::Namespace);

        for &id in structs {
            let name = self.ctx.resolve(self.struct_decl(id).name).unwrap_or_default();
            match self.scopes.declare_into_top(id, &name) {
                Ok(sym) => {
                    sym.set_kind(SymKind::Struct);
                    self.struct_decl(id).symbol.set(Some(sym));
                }
                Err(_existing) => self.ctx.report(Error::duplicate_declaration(name)),
            }
        }
        for &id in structs {
            self.layout_struct(id);
        }

        for &id in functions {
            let (name, is_variadic, is_extern) = {
                let f = self.function(id);
                (f.name, f.is_variadic, f.is_extern)
            };
            let name = self.ctx.resolve(name).unwrap_or_default();
            match self.scopes.declare_into_top(id, &name) {
                Ok(sym) => {
                    sym.set_kind(SymKind::Function);
                    sym.set_is_variadic(is_variadic);
                    sym.set_is_external(is_extern);
                    self.function(id).symbol.set(Some(sym));
                }
                Err(_existing) => self.ctx.report(Error::duplicate_declaration(name)),
            }
        }
    }

    fn layout_struct(&mut self, id: AstId) {
        let field_ids = self.struct_decl(id).fields.clone();

        let mut offset = 0u32;
        let mut layout = Vec::new();
        for &field_id in &field_ids {
            let field = self.field_decl(field_id);
            let type_name = self.ctx.resolve(field.type_name).unwrap_or_default();
            let field_ty = self.resolve_type_name(&type_name);
            let size = {
                let types = self.ctx.types.read();
                types.get(field_ty).size_of(&types)
            };
            layout.push((field.name, field_ty, offset));
            offset += size.max(1);
        }

        let struct_name = self.struct_decl(id).name;
        let struct_name_str = self.ctx.resolve(struct_name).unwrap_or_default();
        let struct_sym_id = self.scopes.resolve(&struct_name_str).map(|s| s.id());

        let ty = {
            let mut types = self.ctx.types.write();
            let ty = types.intern(Type::Struct(struct_sym_id.unwrap_or(SymId(0)), struct_name));
            types.define_struct_layout(ty, layout.clone(), offset.max(1));
            ty
        };

        if let Some(sym) = self.scopes.resolve(&struct_name_str) {
            sym.set_ty(ty);
        }

        for (idx, &field_id) in field_ids.iter().enumerate() {
            let (_, field_ty, field_off) = layout[idx];
            let field_name_str = self.ctx.resolve(self.field_decl(field_id).name).unwrap_or_default();
            let field_sym = self.scopes.declare(field_id, &field_name_str);
            field_sym.set_kind(SymKind::Field);
            field_sym.set_ty(field_ty);
            field_sym.set_field_offset(field_off);
            self.field_decl(field_id).symbol.set(Some(field_sym));
        }
    }

    /// Pass two: check every function body. Reports
    /// `NotAllControlPathsReturn` if the declared return type is non-void
    /// and the body does not terminate on every path.
    pub fn check_function(&mut self, id: AstId) {
        let (name, params, return_ty_ast, body, is_extern) = {
            let f = self.function(id);
            (f.name, f.params.clone(), f.return_ty, f.body, f.is_extern)
        };

        let return_ty = match return_ty_ast {
            Some(ast_id) => {
                let name = self
                    .ctx
                    .ast_name(ast_id)
                    .and_then(|s| self.ctx.resolve(s))
                    .unwrap_or_else(|| "void".to_string());
                self.resolve_type_name(&name)
            }
            None => self.ctx.types.read().void(),
        };

        if is_extern {
            return;
        }

        self.scopes.push(id, ScopeKind::Regular);
        for (idx, &param_id) in params.iter().enumerate() {
            let (param_name, type_name) = {
                let p = self.param(param_id);
                (p.name, p.type_name)
            };
            let name_str = self.ctx.resolve(param_name).unwrap_or_default();
            let ty_str = self.ctx.resolve(type_name).unwrap_or_default();
            let ty = self.resolve_type_name(&ty_str);
            if ty == self.ctx.types.read().void() {
                self.ctx.report(Error::invalid_void_use(format!("parameter '{}'", name_str)));
            }
            match self.scopes.declare_into_top(param_id, &name_str) {
                Ok(sym) => {
                    sym.set_kind(SymKind::Param);
                    sym.set_ty(ty);
                    sym.set_param_index(idx as u32);
                    self.param(param_id).symbol.set(Some(sym));
                }
                Err(_) => self.ctx.report(Error::duplicate_declaration(name_str)),
            }
        }

        let terminates = body.map(|b| self.check_block(b, return_ty)).unwrap_or(false);
        self.scopes.pop();

        let void_ty = self.ctx.types.read().void();
        if body.is_some() && return_ty != void_ty && !terminates {
            let name = self.ctx.resolve(name).unwrap_or_default();
            self.ctx.report(Error::not_all_control_paths_return(name));
        }
    }

    /// Returns whether every control path through this block reaches a
    /// `Return`.
    fn check_block(&mut self, id: AstId, expected_ret: TypeId) -> bool {
        let stmts = self.block(id).stmts.clone();
        let mut returns = false;
        for stmt in stmts {
            if self.check_stmt(stmt, expected_ret) {
                returns = true;
            }
        }
        returns
    }

    fn check_stmt(&mut self, id: AstId, expected_ret: TypeId) -> bool {
        match self.kind_of(id) {
            AstKind::Return => {
                let value = self.return_stmt(id).value;
                let void_ty = self.ctx.types.read().void();
                match value {
                    Some(expr_id) => {
                        let ty = self.check_expr(expr_id, Some(expected_ret));
                        self.check_assignable(expr_id, ty, expected_ret);
                    }
                    None if expected_ret != void_ty => {
                        self.ctx
                            .report(Error::invalid_void_use("in return with missing value".to_string()));
                    }
                    None => {}
                }
                true
            }
            AstKind::If => {
                let (cond, then_branch, else_branch) = {
                    let node = self.if_stmt(id);
                    (node.cond, node.then_branch, node.else_branch)
                };
                let bool_ty = self.ctx.types.read().bool_();
                let cond_ty = self.check_expr(cond, Some(bool_ty));
                if cond_ty != bool_ty {
                    self.ctx.report(Error::invalid_cast(self.type_display(cond_ty), "bool"));
                }
                let then_returns = self.check_block_or_stmt(then_branch, expected_ret);
                let else_returns = else_branch.map(|e| self.check_block_or_stmt(e, expected_ret)).unwrap_or(false);
                then_returns && else_branch.is_some() && else_returns
            }
            AstKind::Block => self.check_block(id, expected_ret),
            AstKind::VarDecl => {
                self.check_var_decl(id);
                false
            }
            AstKind::ExprStmt => {
                let expr = self.expr_stmt(id).expr;
                self.check_expr(expr, None);
                false
            }
            _ => false,
        }
    }

    fn check_block_or_stmt(&mut self, id: AstId, expected_ret: TypeId) -> bool {
        if self.kind_of(id) == AstKind::Block {
            self.check_block(id, expected_ret)
        } else {
            self.check_stmt(id, expected_ret)
        }
    }

    fn check_var_decl(&mut self, id: AstId) {
        let (name, type_name, init) = {
            let v = self.var_decl(id);
            (v.name, v.type_name, v.init)
        };

        let declared_ty = type_name.map(|t| {
            let s = self.ctx.resolve(t).unwrap_or_default();
            self.resolve_type_name(&s)
        });
        let init_ty = init.map(|expr_id| self.check_expr(expr_id, declared_ty));

        let final_ty = match (declared_ty, init_ty) {
            (Some(d), Some(i)) => {
                self.check_assignable(init.expect("init_ty is only Some when init is Some"), i, d);
                d
            }
            (Some(d), None) => d,
            (None, Some(i)) => i,
            (None, None) => self.ctx.types.read().void(),
        };

        if final_ty == self.ctx.types.read().void() {
            let name_str = self.ctx.resolve(name).unwrap_or_default();
            self.ctx.report(Error::invalid_void_use(format!("variable '{}'", name_str)));
        }

        let name_str = self.ctx.resolve(name).unwrap_or_default();
        match self.scopes.declare_into_top(id, &name_str) {
            Ok(sym) => {
                sym.set_kind(SymKind::Variable);
                sym.set_ty(final_ty);
                self.var_decl(id).symbol.set(Some(sym));
            }
            Err(_) => self.ctx.report(Error::duplicate_declaration(name_str)),
        }
    }

    /// `expected` is the contextual type this expression is being checked
    /// against — the declared type of a `var` it initializes, the return
    /// type it's flowing into, the target type of an assignment — or `None`
    /// where no such context exists (a bare statement, a call argument, the
    /// base of a cast). Literals use it to pick their own type; every other
    /// expression kind computes its type from its children regardless.
    fn check_expr(&mut self, id: AstId, expected: Option<TypeId>) -> TypeId {
        let ty = match self.kind_of(id) {
            AstKind::Literal => self.literal_ty(id, expected),
            AstKind::Ident => self.check_ident(id),
            AstKind::Binary => self.check_binary(id, expected),
            AstKind::Unary => self.check_unary(id, expected),
            AstKind::Call => self.check_call(id),
            AstKind::Cast => self.check_cast(id),
            AstKind::Member => self.check_member(id),
            AstKind::Assign => self.check_assign(id),
            _ => self.ctx.types.read().void(),
        };
        self.set_node_ty(id, ty);
        ty
    }

    /// Every node kind's shared header, by id. Used to stamp a computed
    /// type back onto the node and to recover a span for a diagnostic
    /// anchored on an id the caller only has as an `AstId`.
    fn base_of(&self, id: AstId) -> &'tcx AstBase {
        match self.ctx.node(id) {
            AstRef::Function(n) => &n.base,
            AstRef::Struct(n) => &n.base,
            AstRef::Param(n) => &n.base,
            AstRef::Field(n) => &n.base,
            AstRef::Block(n) => &n.base,
            AstRef::VarDecl(n) => &n.base,
            AstRef::If(n) => &n.base,
            AstRef::Return(n) => &n.base,
            AstRef::ExprStmt(n) => &n.base,
            AstRef::Binary(n) => &n.base,
            AstRef::Unary(n) => &n.base,
            AstRef::Call(n) => &n.base,
            AstRef::Literal(n) => &n.base,
            AstRef::Ident(n) => &n.base,
            AstRef::Cast(n) => &n.base,
            AstRef::Member(n) => &n.base,
            AstRef::Assign(n) => &n.base,
        }
    }

    /// Stamp a computed type onto its node's `AstBase.ty` cell so later
    /// passes (`translate.rs`) can read it back without recomputing it.
    fn set_node_ty(&self, id: AstId, ty: TypeId) {
        self.base_of(id).ty.set(Some(ty));
    }

    fn span_of(&self, id: AstId) -> SourceSpan {
        self.base_of(id).span.clone()
    }

    /// Upcast-then-parse-then-range-check: an int literal with no suffix
    /// takes on whatever integer type the context expects (or `i32` absent
    /// one), then gets checked against that type's range. `bool` is never a
    /// legal contextual type for a numeric literal.
    fn literal_ty(&self, id: AstId, expected: Option<TypeId>) -> TypeId {
        match &self.literal(id).value {
            LiteralValue::Int(v) => self.int_literal_ty(id, *v, true, expected),
            LiteralValue::UInt(v) => self.int_literal_ty(id, *v, false, expected),
            LiteralValue::Float(_) => match expected.map(|t| self.ctx.types.read().get(t).clone()) {
                Some(Type::Float(_)) => expected.unwrap(),
                _ => self.ctx.types.write().intern(Type::Float(FloatWidth::W64)),
            },
            LiteralValue::Bool(_) => self.ctx.types.read().bool_(),
            LiteralValue::Str(_) => {
                let i8_ty = self.ctx.types.read().int(IntWidth::W8, true);
                self.ctx.types.write().intern(Type::Pointer(i8_ty))
            }
        }
    }

    /// `default_signed` is the type the literal's own spelling asks for
    /// absent a contextual expected type: `true` for a bare `5`, `false` for
    /// a `u`-suffixed `5u`. A contextual expected type always wins over it.
    fn int_literal_ty(&self, id: AstId, v: i64, default_signed: bool, expected: Option<TypeId>) -> TypeId {
        let expected_kind = expected.map(|t| self.ctx.types.read().get(t).clone());
        match expected_kind {
            Some(Type::Bool) => {
                self.ctx.report(Error::numerical_bool(v.to_string()).at(self.span_of(id)));
                expected.unwrap()
            }
            Some(Type::Int(width, signed)) => {
                if !int_fits(v, width, signed) {
                    self.ctx
                        .report(Error::literal_overflow(v.to_string(), self.type_display(expected.unwrap())).at(self.span_of(id)));
                }
                expected.unwrap()
            }
            _ => {
                if !int_fits(v, IntWidth::W32, default_signed) {
                    let target = if default_signed { "i32" } else { "u32" };
                    self.ctx.report(Error::literal_overflow(v.to_string(), target).at(self.span_of(id)));
                }
                self.ctx.types.read().int(IntWidth::W32, default_signed)
            }
        }
    }

    fn check_ident(&mut self, id: AstId) -> TypeId {
        let name = self.ident(id).name;
        let name_str = self.ctx.resolve(name).unwrap_or_default();
        match self.scopes.resolve(&name_str) {
            Some(sym) => {
                self.ident(id).resolved.set(Some(sym.id()));
                sym.ty().unwrap_or_else(|| self.ctx.types.read().void())
            }
            None => {
                self.ctx.report(Error::unknown_variable(name_str));
                self.ctx.types.read().void()
            }
        }
    }

    fn check_binary(&mut self, id: AstId, expected: Option<TypeId>) -> TypeId {
        let (op, lhs, rhs) = {
            let b = self.binary(id);
            (b.op, b.lhs, b.rhs)
        };
        // A binary expression's own expected type flows unchanged to both
        // operands, so `i64 x = a + 5;` types the `5` as `i64` too.
        let lhs_ty = self.check_expr(lhs, expected);
        let rhs_ty = self.check_expr(rhs, expected);
        let void_ty = self.ctx.types.read().void();
        if lhs_ty == void_ty || rhs_ty == void_ty {
            self.ctx.report(Error::invalid_void_use("in binary expression".to_string()));
        }

        match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::And | BinOp::Or => {
                self.ctx.types.read().bool_()
            }
            _ => {
                if self.ctx.types.read().cast_cost(lhs_ty, rhs_ty).is_some() {
                    rhs_ty
                } else {
                    lhs_ty
                }
            }
        }
    }

    fn check_unary(&mut self, id: AstId, expected: Option<TypeId>) -> TypeId {
        let (op, operand) = {
            let u = self.unary(id);
            (u.op, u.operand)
        };
        let ty = self.check_expr(operand, expected);
        match op {
            UnOp::Not => self.ctx.types.read().bool_(),
            UnOp::Neg => ty,
        }
    }

    fn check_call(&mut self, id: AstId) -> TypeId {
        let (callee, args) = {
            let c = self.call(id);
            (c.callee, c.args.clone())
        };
        // Arguments are typed without any contextual expected type; which
        // overload they end up bound to is decided afterward, by cost.
        let arg_tys: Vec<TypeId> = args.iter().map(|&a| self.check_expr(a, None)).collect();

        let name = self.ctx.resolve(callee).unwrap_or_default();
        let candidates = self.scopes.resolve_overloads(&name);
        if candidates.is_empty() {
            self.ctx.report(Error::unknown_function(name));
            return self.ctx.types.read().void();
        }

        let mut best: Option<(usize, u32)> = None;
        let mut tie = false;
        for (idx, cand) in candidates.iter().enumerate() {
            if let Some(cost) = self.overload_cost(cand.id(), &arg_tys) {
                match best {
                    Some((_, best_cost)) if cost < best_cost => {
                        best = Some((idx, cost));
                        tie = false;
                    }
                    Some((_, best_cost)) if cost == best_cost => tie = true,
                    None => best = Some((idx, cost)),
                    _ => {}
                }
            }
        }

        match best {
            Some((idx, _)) if !tie => {
                let sym = candidates[idx];
                self.call(id).resolved.set(Some(sym.id()));
                sym.ty().unwrap_or_else(|| self.ctx.types.read().void())
            }
            _ => {
                self.ctx.report(Error::no_call_overload(name, format!("{} candidate(s)", candidates.len())));
                self.ctx.types.read().void()
            }
        }
    }

    /// Sum of per-parameter cast costs for calling `func` with `arg_tys`;
    /// `None` if any argument has no implicit conversion to its parameter.
    /// Variadic tail arguments (past the last declared parameter) aren't
    /// cast against anything — they go through default argument promotion
    /// instead, and contribute no cost — but a `void` tail argument still
    /// rejects the candidate outright.
    fn overload_cost(&self, func: SymId, arg_tys: &[TypeId]) -> Option<u32> {
        let sym = self.ctx.symbol(func)?;
        let param_tys = self.function_param_types(sym.owner());
        let is_variadic = sym.is_variadic();

        if arg_tys.len() < param_tys.len() || (!is_variadic && arg_tys.len() != param_tys.len()) {
            return None;
        }

        let mut total = 0u32;
        for (arg_ty, param_ty) in arg_tys.iter().zip(param_tys.iter()) {
            total += self.ctx.types.read().cast_cost(*arg_ty, *param_ty)?;
        }
        for &arg_ty in &arg_tys[param_tys.len()..] {
            self.ctx.types.read().promote(arg_ty)?;
        }
        Some(total)
    }

    fn function_param_types(&self, func_ast: AstId) -> Vec<TypeId> {
        let params = self.function(func_ast).params.clone();
        params
            .iter()
            .filter_map(|&p| match self.ctx.try_node(p) {
                Some(AstRef::Param(param)) => param.symbol.get().and_then(|s| s.ty()),
                _ => None,
            })
            .collect()
    }

    fn check_cast(&mut self, id: AstId) -> TypeId {
        let (target_ty, operand) = {
            let c = self.cast(id);
            (c.target_ty, c.operand)
        };
        // An explicit cast's operand carries its own type in; the cast
        // itself supplies the only type that matters from here on.
        self.check_expr(operand, None);
        let name = self
            .ctx
            .ast_name(target_ty)
            .and_then(|s| self.ctx.resolve(s))
            .unwrap_or_else(|| "void".to_string());
        self.resolve_type_name(&name)
    }

    fn check_member(&mut self, id: AstId) -> TypeId {
        let (base, field) = {
            let m = self.member(id);
            (m.base_expr, m.field)
        };
        let base_ty = self.check_expr(base, None);
        let result = self.ctx.types.read().struct_field_offset(base_ty, field);
        match result {
            Some((ty, _)) => ty,
            None => {
                let name = self.ctx.resolve(field).unwrap_or_default();
                self.ctx.report(Error::unknown_variable(format!("field '{}'", name)));
                self.ctx.types.read().void()
            }
        }
    }

    fn check_assign(&mut self, id: AstId) -> TypeId {
        let (target, value) = {
            let a = self.assign(id);
            (a.target, a.value)
        };
        let target_ty = self.check_expr(target, None);
        let value_ty = self.check_expr(value, Some(target_ty));
        self.check_assignable(value, value_ty, target_ty);
        target_ty
    }

    /// Checks that `from` can flow into `to`, and if it can only do so
    /// through an implicit conversion, allocates the `Cast` node for it and
    /// records it in [`TranslationUnitContext::wrap_implicit_cast`] so
    /// `translate.rs` lowers the cast rather than `expr_id`'s bare value —
    /// the child-slot fields that reference `expr_id` (`VarDecl::init`,
    /// `Return::value`, ...) are never rewritten in place.
    fn check_assignable(&self, expr_id: AstId, from: TypeId, to: TypeId) {
        if from == to {
            return;
        }
        if self.ctx.types.read().cast_cost(from, to).is_none() {
            self.ctx.report(Error::invalid_cast(self.type_display(from), self.type_display(to)));
            return;
        }

        let span = self.span_of(expr_id);
        // `target_ty` normally names the parsed type annotation of an
        // explicit `(TYPE)expr` cast; an implicit cast has no such
        // annotation, and nothing downstream reads the field for casts that
        // never go through `check_cast`, so `expr_id` stands in.
        let cast = self.ctx.alloc_cast(span.clone(), expr_id, expr_id, true);
        self.set_node_ty(cast.base.id, to);
        self.ctx.wrap_implicit_cast(expr_id, cast.base.id);

        let (from_bytes, to_bytes) = {
            let types = self.ctx.types.read();
            (types.get(from).size_of(&types), types.get(to).size_of(&types))
        };
        let warning = match to_bytes.cmp(&from_bytes) {
            std::cmp::Ordering::Less => Error::implicit_truncation_cast(self.type_display(from), self.type_display(to)),
            std::cmp::Ordering::Greater => Error::implicit_extension_cast(self.type_display(from), self.type_display(to)),
            std::cmp::Ordering::Equal => Error::implicit_cast(self.type_display(from), self.type_display(to)),
        };
        self.ctx.report(warning.at(span));
    }

    fn type_display(&self, ty: TypeId) -> String {
        format!("{:?}", self.ctx.types.read().get(ty))
    }

    fn kind_of(&self, id: AstId) -> AstKind {
        self.ctx.kind_of(id)
    }

    // --- node accessors --------------------------------------------------

    fn function(&self, id: AstId) -> &'tcx Function<'tcx> {
        match self.ctx.node(id) {
            AstRef::Function(f) => f,
            other => panic!("expected Function at {id}, found {:?}", other.kind()),
        }
    }
    fn struct_decl(&self, id: AstId) -> &'tcx StructDecl<'tcx> {
        match self.ctx.node(id) {
            AstRef::Struct(s) => s,
            other => panic!("expected Struct at {id}, found {:?}", other.kind()),
        }
    }
    fn field_decl(&self, id: AstId) -> &'tcx FieldDecl<'tcx> {
        match self.ctx.node(id) {
            AstRef::Field(f) => f,
            other => panic!("expected Field at {id}, found {:?}", other.kind()),
        }
    }
    fn param(&self, id: AstId) -> &'tcx Param<'tcx> {
        match self.ctx.node(id) {
            AstRef::Param(p) => p,
            other => panic!("expected Param at {id}, found {:?}", other.kind()),
        }
    }
    fn block(&self, id: AstId) -> &'tcx Block<'tcx> {
        match self.ctx.node(id) {
            AstRef::Block(b) => b,
            other => panic!("expected Block at {id}, found {:?}", other.kind()),
        }
    }
    fn var_decl(&self, id: AstId) -> &'tcx VarDecl<'tcx> {
        match self.ctx.node(id) {
            AstRef::VarDecl(v) => v,
            other => panic!("expected VarDecl at {id}, found {:?}", other.kind()),
        }
    }
    fn if_stmt(&self, id: AstId) -> &'tcx If<'tcx> {
        match self.ctx.node(id) {
            AstRef::If(i) => i,
            other => panic!("expected If at {id}, found {:?}", other.kind()),
        }
    }
    fn return_stmt(&self, id: AstId) -> &'tcx Return<'tcx> {
        match self.ctx.node(id) {
            AstRef::Return(r) => r,
            other => panic!("expected Return at {id}, found {:?}", other.kind()),
        }
    }
    fn expr_stmt(&self, id: AstId) -> &'tcx ExprStmt<'tcx> {
        match self.ctx.node(id) {
            AstRef::ExprStmt(e) => e,
            other => panic!("expected ExprStmt at {id}, found {:?}", other.kind()),
        }
    }
    fn literal(&self, id: AstId) -> &'tcx Literal<'tcx> {
        match self.ctx.node(id) {
            AstRef::Literal(l) => l,
            other => panic!("expected Literal at {id}, found {:?}", other.kind()),
        }
    }
    fn ident(&self, id: AstId) -> &'tcx IdentExpr<'tcx> {
        match self.ctx.node(id) {
            AstRef::Ident(i) => i,
            other => panic!("expected Ident at {id}, found {:?}", other.kind()),
        }
    }
    fn binary(&self, id: AstId) -> &'tcx BinaryExpr<'tcx> {
        match self.ctx.node(id) {
            AstRef::Binary(b) => b,
            other => panic!("expected Binary at {id}, found {:?}", other.kind()),
        }
    }
    fn unary(&self, id: AstId) -> &'tcx UnaryExpr<'tcx> {
        match self.ctx.node(id) {
            AstRef::Unary(u) => u,
            other => panic!("expected Unary at {id}, found {:?}", other.kind()),
        }
    }
    fn call(&self, id: AstId) -> &'tcx Call<'tcx> {
        match self.ctx.node(id) {
            AstRef::Call(c) => c,
            other => panic!("expected Call at {id}, found {:?}", other.kind()),
        }
    }
    fn cast(&self, id: AstId) -> &'tcx CastExpr<'tcx> {
        match self.ctx.node(id) {
            AstRef::Cast(c) => c,
            other => panic!("expected Cast at {id}, found {:?}", other.kind()),
        }
    }
    fn member(&self, id: AstId) -> &'tcx MemberExpr<'tcx> {
        match self.ctx.node(id) {
            AstRef::Member(m) => m,
            other => panic!("expected Member at {id}, found {:?}", other.kind()),
        }
    }
    fn assign(&self, id: AstId) -> &'tcx AssignExpr<'tcx> {
        match self.ctx.node(id) {
            AstRef::Assign(a) => a,
            other => panic!("expected Assign at {id}, found {:?}", other.kind()),
        }
    }
}

/// Whether `v` fits in an integer of the given width and signedness.
fn int_fits(v: i64, width: IntWidth, signed: bool) -> bool {
    let bits = width.bits();
    if signed {
        if bits >= 64 {
            return true;
        }
        let max = (1i64 << (bits - 1)) - 1;
        let min = -(1i64 << (bits - 1));
        v >= min && v <= max
    } else {
        if v < 0 {
            return false;
        }
        if bits >= 64 {
            return true;
        }
        let max = (1i64 << bits) - 1;
        v <= max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LiteralValue;
    use crate::symbol::{reset_scope_id_counter, reset_symbol_id_counter};
    use sigma_error::{Position, SourceSpan};

    fn span() -> SourceSpan {
        SourceSpan::point("t.s", Position::new(1, 1))
    }

    fn make_add_function(ctx: &'static TranslationUnitContext<'static>) -> AstId {
        let a = ctx.intern("a");
        let b = ctx.intern("b");
        let i32_name = ctx.intern("i32");
        let pa = ctx.alloc_param(span(), a, i32_name);
        let pb = ctx.alloc_param(span(), b, i32_name);

        let lhs = ctx.alloc_ident(span(), a);
        let rhs = ctx.alloc_ident(span(), b);
        let sum = ctx.alloc_binary(span(), BinOp::Add, lhs.base.id, rhs.base.id);
        let ret = ctx.alloc_return(span(), Some(sum.base.id));
        let body = ctx.alloc_block(span(), vec![ret.base.id]);

        let ret_ty_ident = ctx.alloc_ident(span(), i32_name);
        ctx.set_ast_name(ret_ty_ident.base.id, i32_name);

        let name = ctx.intern("add");
        let func = ctx.alloc_function(
            span(),
            name,
            vec![pa.base.id, pb.base.id],
            Some(ret_ty_ident.base.id),
            Some(body.base.id),
            false,
            false,
        );
        func.base.id
    }

    fn leaked_ctx() -> &'static TranslationUnitContext<'static> {
        Box::leak(Box::new(TranslationUnitContext::new("t.s")))
    }

    #[test]
    fn checks_a_well_formed_function_without_diagnostics() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let func_id = make_add_function(ctx);
        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func_id], &[]);
        checker.check_function(func_id);

        assert!(ctx.diagnostics().is_empty(), "{:?}", ctx.diagnostics());
    }

    #[test]
    fn missing_return_path_is_reported() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let i32_name = ctx.intern("i32");
        let body = ctx.alloc_block(span(), vec![]);
        let ret_ty_ident = ctx.alloc_ident(span(), i32_name);
        ctx.set_ast_name(ret_ty_ident.base.id, i32_name);
        let name = ctx.intern("empty");
        let func = ctx.alloc_function(span(), name, vec![], Some(ret_ty_ident.base.id), Some(body.base.id), false, false);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func.base.id], &[]);
        checker.check_function(func.base.id);

        assert!(ctx.diagnostics().iter().any(|d| d.contains("C4009")));
    }

    #[test]
    fn duplicate_top_level_names_are_rejected() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let name = ctx.intern("thing");
        let body_a = ctx.alloc_block(span(), vec![]);
        let fa = ctx.alloc_function(span(), name, vec![], None, Some(body_a.base.id), false, false);
        let struct_a = ctx.alloc_struct(span(), name, vec![]);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[fa.base.id], &[struct_a.base.id]);

        assert!(ctx.diagnostics().iter().any(|d| d.contains("C4010")));
    }

    #[test]
    fn unknown_identifier_is_reported() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let missing = ctx.intern("missing");
        let ident = ctx.alloc_ident(span(), missing);
        let stmt = ctx.alloc_expr_stmt(span(), ident.base.id);
        let body = ctx.alloc_block(span(), vec![stmt.base.id]);
        let name = ctx.intern("f");
        let func = ctx.alloc_function(span(), name, vec![], None, Some(body.base.id), false, false);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func.base.id], &[]);
        checker.check_function(func.base.id);

        assert!(ctx.diagnostics().iter().any(|d| d.contains("C4001")));
    }

    #[test]
    fn literal_kinds_get_expected_builtin_types() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let int_lit = ctx.alloc_literal(span(), LiteralValue::Int(1));
        let bool_lit = ctx.alloc_literal(span(), LiteralValue::Bool(true));

        let checker = Checker::new(ctx);
        assert_eq!(checker.literal_ty(int_lit.base.id, None), ctx.types.read().i32_());
        assert_eq!(checker.literal_ty(bool_lit.base.id, None), ctx.types.read().bool_());
    }

    #[test]
    fn int_literal_adopts_its_contextual_expected_type() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let lit = ctx.alloc_literal(span(), LiteralValue::Int(5));
        let checker = Checker::new(ctx);
        let i64_ty = ctx.types.read().i64_();
        assert_eq!(checker.literal_ty(lit.base.id, Some(i64_ty)), i64_ty);
    }

    #[test]
    fn unsigned_suffixed_literal_defaults_to_u32_absent_a_contextual_type() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let lit = ctx.alloc_literal(span(), LiteralValue::UInt(5));
        let checker = Checker::new(ctx);
        assert_eq!(checker.literal_ty(lit.base.id, None), ctx.types.read().int(IntWidth::W32, false));
    }

    #[test]
    fn int_literal_overflowing_its_contextual_type_is_reported() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let lit = ctx.alloc_literal(span(), LiteralValue::Int(1000));
        let checker = Checker::new(ctx);
        let i8_ty = ctx.types.read().int(IntWidth::W8, true);
        checker.literal_ty(lit.base.id, Some(i8_ty));

        assert!(ctx.diagnostics().iter().any(|d| d.contains("C4012")));
    }

    #[test]
    fn var_decl_narrowing_init_inserts_an_implicit_cast() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let i64_name = ctx.intern("i64");
        let i32_name = ctx.intern("i32");
        let x = ctx.intern("x");

        let wide = ctx.alloc_param(span(), ctx.intern("w"), i64_name);
        let read_wide = ctx.alloc_ident(span(), ctx.intern("w"));
        let decl = ctx.alloc_var_decl(span(), x, Some(i32_name), Some(read_wide.base.id));
        let body = ctx.alloc_block(span(), vec![decl.base.id]);
        let func = ctx.alloc_function(span(), ctx.intern("f"), vec![wide.base.id], None, Some(body.base.id), false, false);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func.base.id], &[]);
        checker.check_function(func.base.id);

        assert!(ctx.diagnostics().iter().any(|d| d.contains("C4015")));
        assert_eq!(ctx.kind_of(ctx.effective_expr(read_wide.base.id)), AstKind::Cast);
    }
}
