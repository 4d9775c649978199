//! Control-flow graph construction over a sea-of-nodes graph.
//!
//! An RPO-ordered node partitioning is built by walking successor edges
//! from an entry, then fed into the Cooper/Harvey/Kennedy iterative
//! dominance fixed point.
//!
//! A [`Block`] is the maximal run of control nodes between two "leaders"
//! (`Start`, `Region`, `Proj`, `End`): walking forward from a leader along
//! the unique effectful/branching successor (`Call`/`Load`/`Store` extend
//! the block in place, `If`/`Return` end it) until the next leader is
//! reached. Non-control pinned nodes (`Param`, `Local`, `Phi`) are never
//! part of this walk — they are assigned to a block directly from their
//! fixed position (entry for `Param`/`Local`, the defining `Region`'s block
//! for `Phi`) rather than discovered by it.

use crate::ir::{Graph, NodeId, Op};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

/// One basic block: a leader control node, the effectful/branching chain
/// that follows it, and any pinned nodes (`Param`/`Local`/`Phi`) anchored
/// here rather than discovered by scheduling (`scheduler.rs`).
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub leader: NodeId,
    /// Control-chain members in order, leader included.
    pub nodes: Vec<NodeId>,
    /// `Param`/`Local`/`Phi` nodes pinned to this block.
    pub pinned: Vec<NodeId>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

pub struct Cfg {
    blocks: Vec<Block>,
    entry: BlockId,
    /// Reverse postorder over `blocks`, computed from `entry`.
    rpo: Vec<BlockId>,
    idom: Vec<BlockId>,
}

impl Cfg {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn idom(&self, id: BlockId) -> BlockId {
        self.idom[id.0 as usize]
    }

    /// `true` if `a` dominates `b` (every path from entry to `b` passes
    /// through `a`), including `a == b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == self.entry {
                return cur == a;
            }
            cur = self.idom[cur.0 as usize];
        }
    }

    /// The block a given node was assigned to during construction (control
    /// chain membership or pinning), for nodes `build` has placed. Used by
    /// the scheduler to look up a pinned node's fixed block.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.blocks.iter().find_map(|b| {
            if b.nodes.contains(&node) || b.pinned.contains(&node) {
                Some(b.id)
            } else {
                None
            }
        })
    }
}

/// Build the CFG of `graph`'s live (reachable-from-`End`) subset.
pub fn build(graph: &Graph) -> Cfg {
    let live = graph.reachable_from_end();
    let is_live = |id: NodeId| live.contains(&id);

    let is_leader = |id: NodeId| matches!(graph.node(id).op, Op::Start | Op::End | Op::Region | Op::Proj(_));

    let mut leaders: Vec<NodeId> = live.iter().copied().filter(|&id| is_leader(id)).collect();
    leaders.sort_by_key(|id| id.0);

    // Walk forward from each leader along the unique chained
    // Call/Load/Store/If/Return successor.
    let mut blocks = Vec::new();
    let mut leader_to_block = std::collections::HashMap::new();
    for (idx, &leader) in leaders.iter().enumerate() {
        leader_to_block.insert(leader, BlockId(idx as u32));
    }

    let chain_next = |current: NodeId| -> Option<NodeId> {
        graph.node(current).users().iter().copied().find(|&u| {
            is_live(u)
                && graph.node(u).inputs.first() == Some(&current)
                && matches!(graph.node(u).op, Op::Call(_) | Op::Load | Op::Store | Op::If | Op::Return)
        })
    };

    let mut tails = Vec::with_capacity(leaders.len());
    for &leader in &leaders {
        let mut nodes = vec![leader];
        let mut current = leader;
        loop {
            match chain_next(current) {
                Some(n) if matches!(graph.node(n).op, Op::Call(_) | Op::Load | Op::Store) => {
                    nodes.push(n);
                    current = n;
                }
                Some(n) => {
                    // If or Return: extends the chain once more, then stops.
                    nodes.push(n);
                    current = n;
                    break;
                }
                None => break,
            }
        }
        tails.push(current);
        blocks.push(Block {
            id: leader_to_block[&leader],
            leader,
            nodes,
            pinned: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        });
    }

    // Successors of a tail: every live control node whose `inputs` list the
    // tail (covers If->Proj, Proj/Call/Store->Region, Return->End alike).
    for (idx, &tail) in tails.iter().enumerate() {
        let mut succs: Vec<BlockId> = live
            .iter()
            .copied()
            .filter(|&n| is_leader(n) && graph.node(n).inputs.contains(&tail))
            .map(|n| leader_to_block[&n])
            .collect();
        succs.sort_by_key(|b| b.0);
        succs.dedup();
        blocks[idx].succs = succs;
    }
    for idx in 0..blocks.len() {
        let succs = blocks[idx].succs.clone();
        for s in succs {
            blocks[s.0 as usize].preds.push(BlockId(idx as u32));
        }
    }

    // Pin Param/Local to the entry block, Phi to its defining Region's block.
    let entry = leader_to_block[&graph.start];
    for &node in &live {
        match graph.node(node).op {
            Op::Param(_) | Op::Local(_, _) => blocks[entry.0 as usize].pinned.push(node),
            Op::Phi => {
                let region = graph.node(node).inputs[0];
                if let Some(&b) = leader_to_block.get(&region) {
                    blocks[b.0 as usize].pinned.push(node);
                }
            }
            _ => {}
        }
    }

    let (rpo, idom) = compute_dominance(&blocks, entry);

    Cfg { blocks, entry, rpo, idom }
}

/// Reverse-postorder numbering plus the Cooper/Harvey/Kennedy iterative
/// dominance fixed point ("A Simple, Fast Dominance Algorithm", 2001).
fn compute_dominance(blocks: &[Block], entry: BlockId) -> (Vec<BlockId>, Vec<BlockId>) {
    let n = blocks.len();
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);

    fn dfs(b: BlockId, blocks: &[Block], visited: &mut [bool], postorder: &mut Vec<BlockId>) {
        if visited[b.0 as usize] {
            return;
        }
        visited[b.0 as usize] = true;
        for &s in &blocks[b.0 as usize].succs {
            dfs(s, blocks, visited, postorder);
        }
        postorder.push(b);
    }
    dfs(entry, blocks, &mut visited, &mut postorder);

    let mut postorder_num = vec![usize::MAX; n];
    for (i, &b) in postorder.iter().enumerate() {
        postorder_num[b.0 as usize] = i;
    }

    let rpo: Vec<BlockId> = postorder.iter().rev().copied().collect();

    let mut idom: Vec<Option<BlockId>> = vec![None; n];
    idom[entry.0 as usize] = Some(entry);

    let intersect = |mut a: BlockId, mut b: BlockId, idom: &[Option<BlockId>]| -> BlockId {
        while a != b {
            while postorder_num[a.0 as usize] < postorder_num[b.0 as usize] {
                a = idom[a.0 as usize].unwrap();
            }
            while postorder_num[b.0 as usize] < postorder_num[a.0 as usize] {
                b = idom[b.0 as usize].unwrap();
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &b in &rpo {
            if b == entry {
                continue;
            }
            if postorder_num[b.0 as usize] == usize::MAX {
                // Unreachable block: no dominance relation to compute.
                continue;
            }
            let preds = &blocks[b.0 as usize].preds;
            let mut new_idom = None;
            for &p in preds {
                if idom[p.0 as usize].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(p, cur, &idom),
                });
            }
            if new_idom.is_some() && new_idom != idom[b.0 as usize] {
                idom[b.0 as usize] = new_idom;
                changed = true;
            }
        }
    }

    let idom: Vec<BlockId> = idom.into_iter().map(|d| d.unwrap_or(entry)).collect();
    (rpo, idom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstId, LiteralValue};
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

    fn build_if_else_function(ctx: &'static TranslationUnitContext<'static>) -> AstId {
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
        func.base.id
    }

    #[test]
    fn straight_line_function_is_a_single_block() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();

        let a = ctx.intern("a");
        let b = ctx.intern("b");
        let i32_name = ctx.intern("i32");
        let pa = ctx.alloc_param(span(), a, i32_name);
        let pb = ctx.alloc_param(span(), b, i32_name);
        let lhs = ctx.alloc_ident(span(), a);
        let rhs = ctx.alloc_ident(span(), b);
        let sum = ctx.alloc_binary(span(), crate::ast::BinOp::Add, lhs.base.id, rhs.base.id);
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

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func.base.id], &[]);
        checker.check_function(func.base.id);
        let graph = lower_function(ctx, func.base.id);

        let cfg = build(&graph);
        // entry (Start..Return) and the End sentinel block.
        assert_eq!(cfg.blocks().len(), 2);
        assert_eq!(cfg.rpo()[0], cfg.entry());
    }

    #[test]
    fn if_else_builds_four_blocks_with_correct_dominance() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();
        let func_id = build_if_else_function(ctx);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func_id], &[]);
        checker.check_function(func_id);
        assert!(ctx.diagnostics().is_empty(), "{:?}", ctx.diagnostics());

        let graph = lower_function(ctx, func_id);
        let cfg = build(&graph);

        // entry (If), true branch, false branch, join, End sentinel.
        assert_eq!(cfg.blocks().len(), 5);

        let entry = cfg.entry();
        for b in cfg.blocks() {
            assert!(cfg.dominates(entry, b.id));
        }

        let join = cfg
            .blocks()
            .iter()
            .find(|b| matches!(graph.node(b.leader).op, Op::Region))
            .expect("join block exists");
        assert_eq!(cfg.idom(join.id), entry);

        let join_phis: Vec<_> = join.pinned.iter().filter(|&&n| matches!(graph.node(n).op, Op::Phi)).collect();
        assert_eq!(join_phis.len(), 1);
    }

    #[test]
    fn rpo_places_entry_first() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let ctx = leaked_ctx();
        let func_id = build_if_else_function(ctx);

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func_id], &[]);
        checker.check_function(func_id);

        let graph = lower_function(ctx, func_id);
        let cfg = build(&graph);

        assert_eq!(cfg.rpo()[0], cfg.entry());
    }
}
