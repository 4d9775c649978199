//! Global code motion: assigns every floating (non-pinned) IR node to a
//! CFG block, following Click's 1995 early/late two-pass scheduling.
//!
//! Pure value nodes never carry a block-pointer input at all (only control
//! and effectful nodes do, see `ir.rs`), so the result is a side table
//! (`Schedule`) from [`NodeId`] to [`BlockId`] instead of a graph mutation.
//!
//! Early schedule floats every node up to the block with the deepest
//! dominator-tree depth among its inputs' blocks (as high/early as
//! legality allows); late schedule then sinks it down to the least common
//! dominator-tree ancestor of all its users' blocks (as low/late as
//! usefulness allows), with the usual `Phi` exception: a value feeding a
//! `Phi` is considered used in the predecessor block corresponding to that
//! `Phi` input, not in the `Phi`'s own (join) block. Sigma's grammar has no
//! loops, so there is no further "move to the shallowest loop nesting
//! depth along the early..late path" step to perform — late *is* final.

use std::collections::HashMap;

use crate::cfg::{BlockId, Cfg};
use crate::ir::{Graph, NodeId, Op};

pub struct Schedule {
    assign: HashMap<NodeId, BlockId>,
}

impl Schedule {
    pub fn block_of(&self, node: NodeId) -> BlockId {
        self.assign[&node]
    }
}

fn is_floating(op: &Op) -> bool {
    matches!(
        op,
        Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::Cmp(_)
            | Op::And
            | Op::Or
            | Op::Not
            | Op::Neg
            | Op::SCast
            | Op::ConstInt(_)
            | Op::ConstFloat(_)
            | Op::ConstBool(_)
            | Op::ConstStr(_)
    )
}

/// Dominator-tree depth of every block, computed in one RPO pass since a
/// block's immediate dominator always precedes it in reverse postorder.
fn dominator_depths(cfg: &Cfg) -> HashMap<BlockId, u32> {
    let mut depth = HashMap::new();
    depth.insert(cfg.entry(), 0u32);
    for &b in cfg.rpo() {
        if b == cfg.entry() {
            continue;
        }
        let d = depth[&cfg.idom(b)] + 1;
        depth.insert(b, d);
    }
    depth
}

fn lca(mut a: BlockId, mut b: BlockId, cfg: &Cfg, depth: &HashMap<BlockId, u32>) -> BlockId {
    while depth[&a] > depth[&b] {
        a = cfg.idom(a);
    }
    while depth[&b] > depth[&a] {
        b = cfg.idom(b);
    }
    while a != b {
        a = cfg.idom(a);
        b = cfg.idom(b);
    }
    a
}

pub fn schedule(graph: &Graph, cfg: &Cfg) -> Schedule {
    let live = graph.reachable_from_end();
    let depth = dominator_depths(cfg);

    let mut early = HashMap::new();
    for &node in &live {
        schedule_early(graph, cfg, &depth, node, &mut early);
    }

    let mut late = HashMap::new();
    let mut visited = std::collections::HashSet::new();
    for &node in &live {
        schedule_late(graph, cfg, &depth, &early, node, &mut late, &mut visited);
    }

    Schedule { assign: late }
}

fn schedule_early(
    graph: &Graph,
    cfg: &Cfg,
    depth: &HashMap<BlockId, u32>,
    node: NodeId,
    early: &mut HashMap<NodeId, BlockId>,
) -> BlockId {
    if let Some(&b) = early.get(&node) {
        return b;
    }
    if !is_floating(&graph.node(node).op) {
        let b = cfg.block_of(node).unwrap_or_else(|| panic!("pinned node {node} has no CFG block"));
        early.insert(node, b);
        return b;
    }

    let mut best = cfg.entry();
    let mut best_depth = 0u32;
    for &input in &graph.node(node).inputs {
        let input_block = schedule_early(graph, cfg, depth, input, early);
        let d = depth[&input_block];
        if d > best_depth {
            best = input_block;
            best_depth = d;
        }
    }
    early.insert(node, best);
    best
}

fn schedule_late(
    graph: &Graph,
    cfg: &Cfg,
    depth: &HashMap<BlockId, u32>,
    early: &HashMap<NodeId, BlockId>,
    node: NodeId,
    late: &mut HashMap<NodeId, BlockId>,
    visited: &mut std::collections::HashSet<NodeId>,
) -> BlockId {
    if let Some(&b) = late.get(&node) {
        return b;
    }
    if !visited.insert(node) {
        // Cycle guard: this grammar builds no back-edges in the value
        // graph, so this only fires on a malformed graph.
        let b = early[&node];
        late.insert(node, b);
        return b;
    }

    for &user in graph.node(node).users() {
        schedule_late(graph, cfg, depth, early, user, late, visited);
    }

    if !is_floating(&graph.node(node).op) {
        let b = cfg.block_of(node).unwrap_or_else(|| panic!("pinned node {node} has no CFG block"));
        late.insert(node, b);
        return b;
    }

    let mut acc: Option<BlockId> = None;
    for &user in graph.node(node).users() {
        let user_block = if graph.node(user).op == Op::Phi {
            let phi_inputs = &graph.node(user).inputs;
            let region = phi_inputs[0];
            let j = phi_inputs.iter().skip(1).position(|&v| v == node).unwrap_or_else(|| {
                panic!("phi {user} does not actually use {node} as a value input")
            });
            let pred_control = graph.node(region).inputs[j];
            cfg.block_of(pred_control).unwrap_or_else(|| panic!("phi predecessor {pred_control} has no block"))
        } else {
            late[&user]
        };
        acc = Some(match acc {
            None => user_block,
            Some(cur) => lca(cur, user_block, cfg, depth),
        });
    }

    let b = acc.unwrap_or(early[&node]);
    late.insert(node, b);
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstId, BinOp, LiteralValue};
    use crate::checker::Checker;
    use crate::context::TranslationUnitContext;
    use crate::symbol::{reset_scope_id_counter, reset_symbol_id_counter};
    use crate::translate::lower_function;
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
    fn add_node_schedules_into_the_only_block() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();
        let func_id = build_add_function(ctx);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func_id], &[]);
        checker.check_function(func_id);
        let graph = lower_function(ctx, func_id);
        let cfg = crate::cfg::build(&graph);
        let sched = schedule(&graph, &cfg);

        let add_id = graph
            .reachable_from_end()
            .into_iter()
            .find(|&id| matches!(graph.node(id).op, Op::Add))
            .expect("add node exists");
        assert_eq!(sched.block_of(add_id), cfg.entry());
    }

    #[test]
    fn constant_used_only_on_the_true_branch_sinks_into_it() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let i32_name = ctx.intern("i32");
        let flag_name = ctx.intern("flag");
        let result_name = ctx.intern("result");

        let p_flag = ctx.alloc_param(span(), flag_name, ctx.intern("bool"));
        let zero = ctx.alloc_literal(span(), LiteralValue::Int(0));
        let forty_two = ctx.alloc_literal(span(), LiteralValue::Int(42));

        let result_decl = ctx.alloc_var_decl(span(), result_name, Some(i32_name), Some(zero.base.id));

        let flag_ident = ctx.alloc_ident(span(), flag_name);
        let result_target = ctx.alloc_ident(span(), result_name);
        let assign = ctx.alloc_assign(span(), result_target.base.id, forty_two.base.id);
        let then_stmt = ctx.alloc_expr_stmt(span(), assign.base.id);
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
        let cfg = crate::cfg::build(&graph);
        let sched = schedule(&graph, &cfg);

        let forty_two_id = graph
            .reachable_from_end()
            .into_iter()
            .find(|&id| matches!(graph.node(id).op, Op::ConstInt(42)))
            .expect("literal 42 exists");
        let forty_two_block = sched.block_of(forty_two_id);
        assert_ne!(forty_two_block, cfg.entry());
    }
}
