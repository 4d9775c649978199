//! AST to sea-of-nodes lowering.
//!
//! Walks a checked function body in source order, threading a single
//! "current control" node the way the node-graph-builder API anticipates
//! (`create_region`/`set_control`): every statement either extends the
//! current control chain in place or, for `if`, forks into two control
//! edges that rejoin at a `Region` with `Phi`s for any variable whose value
//! differs between the two arms. Sigma's grammar has no loop construct
//! (only `if`/`else`), so there is no back-edge or loop-carried phi to
//! build here — every `Phi` this pass emits sits at an if/else merge point,
//! and `create_jump`'s explicit single-successor edge collapses into plain
//! node chaining since nothing ever re-enters a region from below.
//!
//! Local variables of scalar type live directly as SSA values in an
//! environment map (`SymId -> NodeId`), never touching `Load`/`Store`.
//! Struct-typed locals are the exception: since the typed AST has no
//! struct-literal expression, a struct value is always either a fresh stack
//! slot (`Op::Local`) or an alias of another struct-typed lvalue, so
//! `Load`/`Store` only ever address a field of one, never a bare local.

use std::collections::HashMap;

use crate::ast::{AstId, AstKind, AstRef, BinOp, LiteralValue, UnOp};
use crate::context::TranslationUnitContext;
use crate::ir::{CmpKind, Graph, NodeId, Op};
use crate::symbol::SymId;
use crate::types::{Type, TypeId};

/// Lowers one checked function body into its own sea-of-nodes graph.
///
/// Must run after [`crate::checker::Checker::check_function`] has resolved
/// every identifier and call in this function: lowering trusts
/// `IdentExpr::resolved`, `Call::resolved`, and every node's
/// `AstBase::ty` outright, and panics on anything still unset — a bug in
/// the pipeline staging, not a recoverable diagnostic.
pub fn lower_function<'tcx>(ctx: &'tcx TranslationUnitContext<'tcx>, func_id: AstId) -> Graph {
    let mut lowering = FunctionLowering::new(ctx);
    lowering.lower(func_id);
    lowering.graph
}

struct FunctionLowering<'tcx> {
    ctx: &'tcx TranslationUnitContext<'tcx>,
    graph: Graph,
    control: NodeId,
    env: HashMap<SymId, NodeId>,
}

impl<'tcx> FunctionLowering<'tcx> {
    fn new(ctx: &'tcx TranslationUnitContext<'tcx>) -> Self {
        let graph = Graph::new();
        let control = graph.start;
        Self { ctx, graph, control, env: HashMap::new() }
    }

    fn lower(&mut self, func_id: AstId) {
        let (params, body) = match self.ctx.node(func_id) {
            AstRef::Function(f) => (f.params.clone(), f.body),
            other => panic!("expected Function at {func_id}, found {:?}", other.kind()),
        };

        for (idx, param_id) in params.iter().enumerate() {
            let sym = match self.ctx.node(*param_id) {
                AstRef::Param(p) => p.symbol.get().unwrap_or_else(|| panic!("unchecked param {param_id}")),
                other => panic!("expected Param at {param_id}, found {:?}", other.kind()),
            };
            let start = self.graph.start;
            let node = self.graph.add(Op::Param(idx as u32), vec![start], sym.ty());
            self.env.insert(sym.id(), node);
        }

        if let Some(body) = body {
            self.lower_block(body);
        }
    }

    /// Returns whether every path through this block terminates (a
    /// `Return`, or an `if`/`else` whose every arm returns).
    fn lower_block(&mut self, id: AstId) -> bool {
        let stmts = match self.ctx.node(id) {
            AstRef::Block(b) => b.stmts.clone(),
            other => panic!("expected Block at {id}, found {:?}", other.kind()),
        };
        let mut terminated = false;
        for stmt in stmts {
            if terminated {
                break;
            }
            terminated = self.lower_stmt(stmt);
        }
        terminated
    }

    fn lower_block_or_stmt(&mut self, id: AstId) -> bool {
        if self.ctx.kind_of(id) == AstKind::Block {
            self.lower_block(id)
        } else {
            self.lower_stmt(id)
        }
    }

    fn lower_stmt(&mut self, id: AstId) -> bool {
        match self.ctx.kind_of(id) {
            AstKind::Return => {
                let value = match self.ctx.node(id) {
                    AstRef::Return(r) => r.value,
                    _ => unreachable!(),
                };
                let mut inputs = vec![self.control];
                if let Some(v) = value {
                    inputs.push(self.lower_expr(v));
                }
                let ret = self.graph.add(Op::Return, inputs, None);
                self.graph.connect_to_end(ret);
                true
            }
            AstKind::If => self.lower_if(id),
            AstKind::Block => self.lower_block(id),
            AstKind::VarDecl => {
                self.lower_var_decl(id);
                false
            }
            AstKind::ExprStmt => {
                let expr = match self.ctx.node(id) {
                    AstRef::ExprStmt(e) => e.expr,
                    _ => unreachable!(),
                };
                self.lower_expr(expr);
                false
            }
            other => panic!("unexpected statement kind {other:?} at {id}"),
        }
    }

    fn lower_if(&mut self, id: AstId) -> bool {
        let (cond, then_branch, else_branch) = match self.ctx.node(id) {
            AstRef::If(i) => (i.cond, i.then_branch, i.else_branch),
            _ => unreachable!(),
        };

        let cond_node = self.lower_expr(cond);
        let entry_control = self.control;
        let if_node = self.graph.add(Op::If, vec![entry_control, cond_node], None);
        let true_proj = self.graph.add(Op::Proj(0), vec![if_node], None);
        let false_proj = self.graph.add(Op::Proj(1), vec![if_node], None);

        let entry_env = self.env.clone();

        self.control = true_proj;
        let then_terminated = self.lower_block_or_stmt(then_branch);
        let then_exit = (self.control, std::mem::replace(&mut self.env, entry_env));

        self.control = false_proj;
        let else_terminated = match else_branch {
            Some(e) => self.lower_block_or_stmt(e),
            None => false,
        };
        let else_exit = (self.control, std::mem::take(&mut self.env));

        match (then_terminated, else_terminated) {
            (true, true) => true,
            (true, false) => {
                self.control = else_exit.0;
                self.env = else_exit.1;
                false
            }
            (false, true) => {
                self.control = then_exit.0;
                self.env = then_exit.1;
                false
            }
            (false, false) => {
                let region = self.graph.add(Op::Region, vec![then_exit.0, else_exit.0], None);
                self.control = region;
                self.env = merge_envs(&mut self.graph, region, then_exit.1, else_exit.1);
                false
            }
        }
    }

    fn lower_var_decl(&mut self, id: AstId) {
        let (init, symbol) = match self.ctx.node(id) {
            AstRef::VarDecl(v) => (v.init, v.symbol.get()),
            _ => unreachable!(),
        };
        let sym = symbol.unwrap_or_else(|| panic!("unchecked var decl {id}"));
        let value = match init {
            Some(expr_id) => self.lower_expr(expr_id),
            None => self.zero_of(sym.ty()),
        };
        self.env.insert(sym.id(), value);
    }

    fn zero_of(&mut self, ty: Option<TypeId>) -> NodeId {
        let kind = ty.map(|t| self.ctx.types.read().get(t).clone());
        match kind {
            Some(Type::Float(_)) => self.graph.add(Op::ConstFloat(0.0), vec![], ty),
            Some(Type::Struct(_, _)) => {
                let (size, align) = {
                    let table = self.ctx.types.read();
                    (table.get(ty.unwrap()).size_of(&table), 8u32)
                };
                self.graph.add(Op::Local(size, align), vec![], ty)
            }
            _ => self.graph.add(Op::ConstInt(0), vec![], ty),
        }
    }

    fn lower_expr(&mut self, id: AstId) -> NodeId {
        // The checker may have spliced an implicit `Cast` in after this id
        // was built; `effective_expr` is a no-op unless it did.
        let id = self.ctx.effective_expr(id);
        match self.ctx.kind_of(id) {
            AstKind::Literal => self.lower_literal(id),
            AstKind::Ident => self.lower_ident(id),
            AstKind::Binary => self.lower_binary(id),
            AstKind::Unary => self.lower_unary(id),
            AstKind::Call => self.lower_call(id),
            AstKind::Cast => self.lower_cast(id),
            AstKind::Member => self.lower_member(id),
            AstKind::Assign => self.lower_assign(id),
            other => panic!("unexpected expression kind {other:?} at {id}"),
        }
    }

    fn lower_literal(&mut self, id: AstId) -> NodeId {
        let (value, ty) = match self.ctx.node(id) {
            AstRef::Literal(l) => (l.value.clone(), l.base.ty.get()),
            _ => unreachable!(),
        };
        match value {
            LiteralValue::Int(v) => self.graph.add(Op::ConstInt(v), vec![], ty),
            LiteralValue::UInt(v) => self.graph.add(Op::ConstInt(v), vec![], ty),
            LiteralValue::Float(v) => self.graph.add(Op::ConstFloat(v), vec![], ty),
            LiteralValue::Bool(v) => self.graph.add(Op::ConstBool(v), vec![], ty),
            LiteralValue::Str(s) => self.graph.add(Op::ConstStr(s), vec![], ty),
        }
    }

    fn lower_ident(&mut self, id: AstId) -> NodeId {
        let resolved = match self.ctx.node(id) {
            AstRef::Ident(i) => i.resolved.get(),
            _ => unreachable!(),
        };
        let sym_id = resolved.unwrap_or_else(|| panic!("unresolved identifier {id}"));
        *self
            .env
            .get(&sym_id)
            .unwrap_or_else(|| panic!("identifier {id} read before any assignment reached it"))
    }

    fn lower_binary(&mut self, id: AstId) -> NodeId {
        let (op, lhs, rhs) = match self.ctx.node(id) {
            AstRef::Binary(b) => (b.op, b.lhs, b.rhs),
            _ => unreachable!(),
        };
        let lhs_node = self.lower_expr(lhs);
        let rhs_node = self.lower_expr(rhs);
        let ty = self.node_ty(id);
        let ir_op = match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Rem => Op::Rem,
            BinOp::Eq => Op::Cmp(CmpKind::Eq),
            BinOp::Ne => Op::Cmp(CmpKind::Ne),
            BinOp::Lt => Op::Cmp(CmpKind::Lt),
            BinOp::Le => Op::Cmp(CmpKind::Le),
            BinOp::Gt => Op::Cmp(CmpKind::Gt),
            BinOp::Ge => Op::Cmp(CmpKind::Ge),
            BinOp::And => Op::And,
            BinOp::Or => Op::Or,
        };
        self.graph.add(ir_op, vec![lhs_node, rhs_node], Some(ty))
    }

    fn lower_unary(&mut self, id: AstId) -> NodeId {
        let (op, operand) = match self.ctx.node(id) {
            AstRef::Unary(u) => (u.op, u.operand),
            _ => unreachable!(),
        };
        let operand_node = self.lower_expr(operand);
        let ty = self.node_ty(id);
        let ir_op = match op {
            UnOp::Neg => Op::Neg,
            UnOp::Not => Op::Not,
        };
        self.graph.add(ir_op, vec![operand_node], Some(ty))
    }

    fn lower_call(&mut self, id: AstId) -> NodeId {
        let (args, resolved) = match self.ctx.node(id) {
            AstRef::Call(c) => (c.args.clone(), c.resolved.get()),
            _ => unreachable!(),
        };
        let sym_id = resolved.unwrap_or_else(|| panic!("unresolved call {id}"));
        let mut inputs = vec![self.control];
        for arg in &args {
            inputs.push(self.lower_expr(*arg));
        }
        let ty = self.node_ty(id);
        let call = self.graph.add(Op::Call(sym_id), inputs, Some(ty));
        self.control = call;
        call
    }

    fn lower_cast(&mut self, id: AstId) -> NodeId {
        let operand = match self.ctx.node(id) {
            AstRef::Cast(c) => c.operand,
            _ => unreachable!(),
        };
        let operand_node = self.lower_expr(operand);
        let ty = self.node_ty(id);
        self.graph.add(Op::SCast, vec![operand_node], Some(ty))
    }

    /// Address of a struct field: the base expression's value is itself the
    /// struct's address, so a field access is address arithmetic plus a
    /// `Load`/`Store`.
    fn member_address(&mut self, id: AstId) -> NodeId {
        let (base, field) = match self.ctx.node(id) {
            AstRef::Member(m) => (m.base_expr, m.field),
            _ => unreachable!(),
        };
        let base_ty = self.node_ty(base);
        let base_node = self.lower_expr(base);
        let offset = self.ctx.types.read().struct_field_offset(base_ty, field).map(|(_, off)| off).unwrap_or(0);
        if offset == 0 {
            base_node
        } else {
            let off_node = self.graph.add(Op::ConstInt(offset as i64), vec![], None);
            self.graph.add(Op::Add, vec![base_node, off_node], None)
        }
    }

    fn lower_member(&mut self, id: AstId) -> NodeId {
        let ty = self.node_ty(id);
        let addr = self.member_address(id);
        let control = self.control;
        let load = self.graph.add(Op::Load, vec![control, addr], Some(ty));
        self.control = load;
        load
    }

    fn lower_assign(&mut self, id: AstId) -> NodeId {
        let (target, value) = match self.ctx.node(id) {
            AstRef::Assign(a) => (a.target, a.value),
            _ => unreachable!(),
        };
        let value_node = self.lower_expr(value);
        match self.ctx.kind_of(target) {
            AstKind::Ident => {
                let sym_id = match self.ctx.node(target) {
                    AstRef::Ident(i) => i.resolved.get(),
                    _ => unreachable!(),
                }
                .unwrap_or_else(|| panic!("unresolved identifier {target}"));
                self.env.insert(sym_id, value_node);
            }
            AstKind::Member => {
                let addr = self.member_address(target);
                let control = self.control;
                let store = self.graph.add(Op::Store, vec![control, addr, value_node], None);
                self.control = store;
            }
            other => panic!("unsupported assignment target kind {other:?} at {target}"),
        }
        value_node
    }

    fn node_ty(&self, id: AstId) -> TypeId {
        let ty = match self.ctx.node(id) {
            AstRef::Function(f) => f.base.ty.get(),
            AstRef::Struct(s) => s.base.ty.get(),
            AstRef::Param(p) => p.base.ty.get(),
            AstRef::Field(f) => f.base.ty.get(),
            AstRef::Block(b) => b.base.ty.get(),
            AstRef::VarDecl(v) => v.base.ty.get(),
            AstRef::If(i) => i.base.ty.get(),
            AstRef::Return(r) => r.base.ty.get(),
            AstRef::ExprStmt(e) => e.base.ty.get(),
            AstRef::Binary(b) => b.base.ty.get(),
            AstRef::Unary(u) => u.base.ty.get(),
            AstRef::Call(c) => c.base.ty.get(),
            AstRef::Literal(l) => l.base.ty.get(),
            AstRef::Ident(i) => i.base.ty.get(),
            AstRef::Cast(c) => c.base.ty.get(),
            AstRef::Member(m) => m.base.ty.get(),
            AstRef::Assign(a) => a.base.ty.get(),
        };
        ty.unwrap_or_else(|| self.ctx.types.read().void())
    }
}

/// Merge two arms' environments at an if/else join, inserting a `Phi` for
/// every variable whose value differs between them.
fn merge_envs(
    graph: &mut Graph,
    region: NodeId,
    then_env: HashMap<SymId, NodeId>,
    else_env: HashMap<SymId, NodeId>,
) -> HashMap<SymId, NodeId> {
    let mut keys: Vec<SymId> = then_env.keys().chain(else_env.keys()).copied().collect();
    keys.sort_unstable_by_key(|s| s.0);
    keys.dedup();

    let mut merged = HashMap::new();
    for key in keys {
        let a = then_env.get(&key).copied();
        let b = else_env.get(&key).copied();
        let value = match (a, b) {
            (Some(x), Some(y)) if x == y => x,
            (Some(x), Some(y)) => graph.add(Op::Phi, vec![region, x, y], None),
            (Some(x), None) => x,
            (None, Some(y)) => y,
            (None, None) => continue,
        };
        merged.insert(key, value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;
    use crate::checker::Checker;
    use crate::symbol::{reset_scope_id_counter, reset_symbol_id_counter};
    use sigma_error::{Position, SourceSpan};

    fn span() -> SourceSpan {
        SourceSpan::point("t.s", Position::new(1, 1))
    }

    fn leaked_ctx() -> &'static TranslationUnitContext<'static> {
        Box::leak(Box::new(TranslationUnitContext::new("t.s")))
    }

    fn build_add_function(ctx: &'static TranslationUnitContext<'static>) -> AstId {
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

    #[test]
    fn straight_line_function_lowers_to_add_and_return() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();
        let func_id = build_add_function(ctx);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func_id], &[]);
        checker.check_function(func_id);
        assert!(ctx.diagnostics().is_empty(), "{:?}", ctx.diagnostics());

        let graph = lower_function(ctx, func_id);
        let reachable = graph.reachable_from_end();
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Add)));
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Return)));
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Param(0))));
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Param(1))));
    }

    #[test]
    fn if_else_join_inserts_a_phi() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let i32_name = ctx.intern("i32");
        let flag_name = ctx.intern("flag");
        let result_name = ctx.intern("result");

        let p_flag = ctx.alloc_param(span(), flag_name, ctx.intern("bool"));

        let one = ctx.alloc_literal(span(), LiteralValue::Int(1));
        let two = ctx.alloc_literal(span(), LiteralValue::Int(2));

        let result_decl = ctx.alloc_var_decl(span(), result_name, Some(i32_name), Some(one.base.id));

        let flag_ident = ctx.alloc_ident(span(), flag_name);
        let result_target = ctx.alloc_ident(span(), result_name);
        let assign_two = ctx.alloc_assign(span(), result_target.base.id, two.base.id);
        let then_stmt = ctx.alloc_expr_stmt(span(), assign_two.base.id);
        let if_stmt = ctx.alloc_if(span(), flag_ident.base.id, then_stmt.base.id, None);

        let result_read = ctx.alloc_ident(span(), result_name);
        let ret = ctx.alloc_return(span(), Some(result_read.base.id));

        let body = ctx.alloc_block(span(), vec![result_decl.base.id, if_stmt.base.id, ret.base.id]);
        let ret_ty_ident = ctx.alloc_ident(span(), i32_name);
        ctx.set_ast_name(ret_ty_ident.base.id, i32_name);

        let name = ctx.intern("pick");
        let func = ctx.alloc_function(
            span(),
            name,
            vec![p_flag.base.id],
            Some(ret_ty_ident.base.id),
            Some(body.base.id),
            false,
            false,
        );

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func.base.id], &[]);
        checker.check_function(func.base.id);
        assert!(ctx.diagnostics().is_empty(), "{:?}", ctx.diagnostics());

        let graph = lower_function(ctx, func.base.id);
        let reachable = graph.reachable_from_end();
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Phi)));
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Region)));
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::If)));
    }

    #[test]
    fn call_to_a_declared_function_lowers_with_its_resolved_symbol() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let callee_id = build_add_function(ctx);

        let one = ctx.alloc_literal(span(), LiteralValue::Int(1));
        let two = ctx.alloc_literal(span(), LiteralValue::Int(2));
        let callee_name = ctx.intern("add");
        let call = ctx.alloc_call(span(), callee_name, vec![one.base.id, two.base.id]);
        let ret = ctx.alloc_return(span(), Some(call.base.id));
        let body = ctx.alloc_block(span(), vec![ret.base.id]);

        let i32_name = ctx.intern("i32");
        let ret_ty_ident = ctx.alloc_ident(span(), i32_name);
        ctx.set_ast_name(ret_ty_ident.base.id, i32_name);
        let caller_name = ctx.intern("caller");
        let caller = ctx.alloc_function(
            span(),
            caller_name,
            vec![],
            Some(ret_ty_ident.base.id),
            Some(body.base.id),
            false,
            false,
        );

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[callee_id, caller.base.id], &[]);
        checker.check_function(callee_id);
        checker.check_function(caller.base.id);
        assert!(ctx.diagnostics().is_empty(), "{:?}", ctx.diagnostics());

        let graph = lower_function(ctx, caller.base.id);
        let reachable = graph.reachable_from_end();
        assert!(reachable.iter().any(|&id| matches!(graph.node(id).op, Op::Call(_))));
    }
}
