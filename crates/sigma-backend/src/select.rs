//! Instruction selection over scheduled IR.
//!
//! Per-node-kind `select_*` dispatch. A full addressing-mode selector would
//! pattern-match base+index*scale+disp chains deeply, folding them straight
//! into a single `RM`/`MR` operand; this selector folds only the common
//! case this language's translator ever produces — a bare pointer value
//! with a zero displacement, since struct member addresses are already
//! materialized as `Add` nodes by `translate.rs`'s `member_address` (a
//! pointer plus a constant byte offset) rather than left as an
//! addressing-mode tree for the backend to re-discover. What it does fold
//! is an immediate right-hand operand on `Add`/`Sub`/`And`/`Or`/`Cmp` so the
//! common "add a constant" / "compare against a constant" cases skip a
//! register load entirely.
//!
//! Every other node kind materializes its operands into registers before
//! combining them (no instruction-tree tiling beyond the one fold above).
//! `Phi` elimination happens here, not in the allocator: a `Phi`'s vreg is
//! reserved up front in its join block, and each predecessor block appends
//! a copy into that vreg just before its terminator. Since Sigma's grammar
//! has no loops, predecessor blocks are always fully selected before the
//! join block needs their phi source vregs, so this is just an ordered list
//! of moves — the "parallel copy" swap hazard classic SSA-out algorithms
//! guard against never arises here.

use std::collections::HashMap;

use sigma_core::{CmpKind, Graph, IntWidth, NodeId, Op, Schedule, SymId, Type, TypeId, TranslationUnitContext};
use sigma_core::{Block as CfgBlock, BlockId, Cfg};
use sigma_error::{Error, ErrorKind, Result};

use crate::isa::{
    CondCode, DataType, InstFlags, Instruction, Opcode, Payload, PhysReg, RegClass, VReg, RAX,
    WIN64_INT_PARAMS, WIN64_XMM_PARAMS,
};

/// A CFG block identifier carried into the machine program, numbered the
/// same as `sigma_core::cfg::BlockId` so block lookups don't need a
/// translation table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockLabel(pub u32);

impl From<BlockId> for BlockLabel {
    fn from(id: BlockId) -> Self {
        BlockLabel(id.0)
    }
}

#[derive(Debug, Clone)]
pub struct MachBlock {
    pub label: BlockLabel,
    pub insts: Vec<Instruction>,
}

/// A selected function, ready for live-range analysis (`live.rs`).
#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub blocks: Vec<MachBlock>,
    pub vreg_count: u32,
    /// Bytes reserved for `Local` stack slots, growing as they're selected.
    pub frame_size: u32,
    /// Largest outgoing-argument stack area any call site in this function
    /// needs, including the mandatory 32-byte Win64 shadow space.
    pub outgoing_arg_bytes: u32,
    pub string_pool: Vec<String>,
    /// `(is_f64, bits)` — `bits` holds the `f32`/`f64` bit pattern zero-extended to 64 bits.
    pub float_pool: Vec<(bool, u64)>,
}

pub const FIRST_FREE_VREG: u32 = 32;

fn phys_vreg(r: PhysReg) -> VReg {
    match r.class {
        RegClass::Gpr => VReg(r.index as u32),
        RegClass::Xmm => VReg(16 + r.index as u32),
    }
}

struct Selector<'a, 'tcx> {
    ctx: &'a TranslationUnitContext<'tcx>,
    graph: &'a Graph,
    cfg: &'a Cfg,
    sched: &'a Schedule,
    values: HashMap<NodeId, VReg>,
    locals: HashMap<NodeId, VReg>,
    next_vreg: u32,
    frame_size: u32,
    outgoing_arg_bytes: u32,
    string_pool: Vec<String>,
    float_pool: Vec<(bool, u64)>,
    cur: Vec<Instruction>,
}

pub fn select(
    ctx: &TranslationUnitContext,
    graph: &Graph,
    cfg: &Cfg,
    sched: &Schedule,
    mangled_name: String,
) -> Result<Program> {
    let mut sel = Selector {
        ctx,
        graph,
        cfg,
        sched,
        values: HashMap::new(),
        locals: HashMap::new(),
        next_vreg: FIRST_FREE_VREG,
        frame_size: 0,
        outgoing_arg_bytes: 32,
        string_pool: Vec::new(),
        float_pool: Vec::new(),
        cur: Vec::new(),
    };

    let mut blocks = Vec::with_capacity(cfg.blocks().len());
    for &bid in cfg.rpo() {
        let block = cfg.block(bid);
        sel.cur = vec![Instruction::new(Opcode::Label, DataType::Qword)];
        if bid == cfg.entry() {
            sel.select_entry(block)?;
        }
        sel.select_block_body(block)?;
        blocks.push(MachBlock { label: bid.into(), insts: std::mem::take(&mut sel.cur) });
    }

    Ok(Program {
        name: mangled_name,
        blocks,
        vreg_count: sel.next_vreg,
        frame_size: sel.frame_size,
        outgoing_arg_bytes: sel.outgoing_arg_bytes,
        string_pool: sel.string_pool,
        float_pool: sel.float_pool,
    })
}

impl<'a, 'tcx> Selector<'a, 'tcx> {
    fn fresh(&mut self) -> VReg {
        let v = VReg(self.next_vreg);
        self.next_vreg += 1;
        v
    }

    fn is_float_ty(&self, ty: Option<TypeId>) -> bool {
        match ty {
            Some(t) => self.ctx.types.read().get(t).is_float(),
            None => false,
        }
    }

    fn data_type_of(&self, ty: Option<TypeId>) -> DataType {
        match ty {
            None => DataType::Qword,
            Some(t) => match self.ctx.types.read().get(t) {
                Type::Float(sigma_core::FloatWidth::W32) => DataType::Sse32,
                Type::Float(sigma_core::FloatWidth::W64) => DataType::Sse64,
                Type::Bool => DataType::Byte,
                Type::Int(w, _) => match w {
                    IntWidth::W8 => DataType::Byte,
                    IntWidth::W16 => DataType::Word,
                    IntWidth::W32 => DataType::Dword,
                    IntWidth::W64 => DataType::Qword,
                },
                Type::Pointer(_) | Type::Function { .. } => DataType::Ptr,
                Type::Struct(..) => DataType::Ptr,
                Type::Void => DataType::Dword,
            },
        }
    }

    /// Move every incoming parameter from its Win64 calling-convention
    /// register into a fresh vreg, keyed by the `Param` node's vreg.
    fn select_entry(&mut self, entry: &CfgBlock) -> Result<()> {
        let mut params: Vec<(u32, NodeId)> = entry
            .pinned
            .iter()
            .filter_map(|&n| match self.graph.node(n).op {
                Op::Param(i) => Some((i, n)),
                _ => None,
            })
            .collect();
        params.sort_by_key(|(i, _)| *i);

        let mut gpr_idx = 0usize;
        let mut xmm_idx = 0usize;
        for (i, node) in params {
            let dt = self.data_type_of(self.graph.node(node).ty);
            let dst = self.fresh();
            if dt.is_float() {
                let src = WIN64_XMM_PARAMS.get(xmm_idx).copied();
                xmm_idx += 1;
                match src {
                    Some(phys) => self.emit_mov(dst, phys_vreg(phys), dt),
                    None => {
                        // 5th+ float parameter: arrives on the incoming stack,
                        // which this backend does not yet read back.
                        return Err(Error::not_implemented(format!(
                            "stack-passed parameter {i}"
                        )));
                    }
                }
            } else {
                let src = WIN64_INT_PARAMS.get(gpr_idx).copied();
                gpr_idx += 1;
                match src {
                    Some(phys) => self.emit_mov(dst, phys_vreg(phys), dt),
                    None => {
                        return Err(Error::not_implemented(format!(
                            "stack-passed parameter {i}"
                        )));
                    }
                }
            }
            self.values.insert(node, dst);
        }
        Ok(())
    }

    fn emit_mov(&mut self, dst: VReg, src: VReg, dt: DataType) {
        let mut inst = Instruction::new(if dt.is_float() { Opcode::FpMov } else { Opcode::Mov }, dt);
        inst.out_count = 1;
        inst.in_count = 1;
        inst.operands = vec![dst, src];
        self.cur.push(inst);
    }

    /// Process the control-chain members of `block` in program order,
    /// materializing each one's data operands on demand.
    fn select_block_body(&mut self, block: &CfgBlock) -> Result<()> {
        for &node in &block.nodes {
            match self.graph.node(node).op {
                Op::Start | Op::End | Op::Region | Op::Proj(_) => {}
                Op::Call(sym) => {
                    self.select_call(node, sym)?;
                }
                Op::Load => self.select_load(node)?,
                Op::Store => self.select_store(node)?,
                Op::If => self.select_if(node, block)?,
                Op::Return => self.select_return(node)?,
                ref other => {
                    return Err(Error::codegen_invariant(format!(
                        "unexpected control-chain op {other:?}"
                    )))
                }
            }
        }

        // A block with no explicit terminator (If/Return) falls through to
        // its unique CFG successor.
        let has_terminator = block
            .nodes
            .last()
            .map(|&n| matches!(self.graph.node(n).op, Op::If | Op::Return))
            .unwrap_or(false);
        if !has_terminator {
            self.resolve_phis_into(block, self.successor_of(block))?;
            if let Some(succ) = self.successor_of(block) {
                self.emit_jmp(succ);
            }
        }
        Ok(())
    }

    fn successor_of(&self, block: &CfgBlock) -> Option<BlockId> {
        block.succs.first().copied()
    }

    fn emit_jmp(&mut self, target: BlockId) {
        let mut inst = Instruction::new(Opcode::Jmp, DataType::Qword);
        inst.payload = Payload::Block(target.into());
        self.cur.push(inst);
    }

    /// Select `node`'s value, memoized. Recurses into operands first so
    /// every instruction is emitted in a legal def-before-use order within
    /// the block it's scheduled to.
    fn select_value(&mut self, node: NodeId) -> Result<VReg> {
        if let Some(&v) = self.values.get(&node) {
            return Ok(v);
        }
        let op = self.graph.node(node).op.clone();
        let ty = self.graph.node(node).ty;
        let dt = self.data_type_of(ty);

        let v = match op {
            Op::Param(_) => {
                return Err(Error::codegen_invariant("Param selected outside entry block"))
            }
            Op::Local(size, align) => self.select_local(node, size, align)?,
            Op::ConstInt(value) => self.select_const_int(value, dt)?,
            Op::ConstBool(b) => self.select_const_int(b as i64, DataType::Byte)?,
            Op::ConstFloat(f) => self.select_const_float(f, dt)?,
            Op::ConstStr(s) => self.select_const_str(s)?,
            Op::Add | Op::Sub | Op::And | Op::Or => self.select_binop_fold_imm(node, op, dt)?,
            Op::Mul => self.select_mul(node, dt)?,
            Op::Div | Op::Rem => self.select_div_rem(node, op, dt)?,
            Op::Cmp(kind) => self.select_cmp_to_bool(node, kind)?,
            Op::Not => self.select_not(node, dt)?,
            Op::Neg => self.select_neg(node, dt)?,
            Op::SCast => self.select_cast(node, dt)?,
            Op::Phi => {
                return Err(Error::codegen_invariant(
                    "Phi must be reserved by reserve_phi before use",
                ))
            }
            other => {
                return Err(Error::codegen_invariant(format!("{other:?} is not a value node")))
            }
        };
        self.values.insert(node, v);
        Ok(v)
    }

    /// `Phi` vregs are reserved once, the first time any predecessor tries
    /// to resolve into them, so both the join block's reader and every
    /// predecessor's writer agree on the same vreg regardless of visit order.
    fn reserve_phi(&mut self, phi: NodeId) -> VReg {
        if let Some(&v) = self.values.get(&phi) {
            return v;
        }
        let v = self.fresh();
        self.values.insert(phi, v);
        v
    }

    fn select_local(&mut self, node: NodeId, size: u32, align: u32) -> Result<VReg> {
        let align = align.max(1);
        self.frame_size = (self.frame_size + align - 1) / align * align + size;
        let off = self.frame_size as i32;
        let dst = self.fresh();
        let mut inst = Instruction::new(Opcode::Lea, DataType::Ptr);
        inst.out_count = 1;
        inst.operands = vec![dst];
        inst.flags = InstFlags::MEM;
        inst.disp = -off;
        let _ = node;
        self.cur.push(inst);
        Ok(dst)
    }

    fn select_const_int(&mut self, value: i64, dt: DataType) -> Result<VReg> {
        let dst = self.fresh();
        if value == 0 {
            let mut inst = Instruction::new(Opcode::Zero, dt);
            inst.out_count = 1;
            inst.operands = vec![dst];
            self.cur.push(inst);
        } else if let Ok(v32) = i32::try_from(value) {
            let mut inst = Instruction::new(Opcode::Mov, dt);
            inst.out_count = 1;
            inst.operands = vec![dst];
            inst.flags = InstFlags::IMMEDIATE;
            inst.payload = Payload::Immediate(v32);
            self.cur.push(inst);
        } else {
            let mut inst = Instruction::new(Opcode::Movabs, DataType::Qword);
            inst.out_count = 1;
            inst.operands = vec![dst];
            inst.flags = InstFlags::ABSOLUTE;
            inst.payload = Payload::Absolute(value as u64);
            self.cur.push(inst);
        }
        Ok(dst)
    }

    fn select_const_float(&mut self, value: f64, dt: DataType) -> Result<VReg> {
        let bits = if dt == DataType::Sse32 { (value as f32).to_bits() as u64 } else { value.to_bits() };
        let idx = self.float_pool.len() as u32;
        self.float_pool.push((dt == DataType::Sse64, bits));
        let dst = self.fresh();
        let mut inst = Instruction::new(Opcode::FpMov, dt);
        inst.out_count = 1;
        inst.operands = vec![dst];
        inst.flags = InstFlags::GLOBAL;
        inst.payload = Payload::FloatConst(idx);
        self.cur.push(inst);
        Ok(dst)
    }

    fn select_const_str(&mut self, s: sigma_core::InternedStr) -> Result<VReg> {
        let text = self.ctx.resolve(s).unwrap_or_default();
        let idx = self.string_pool.len() as u32;
        self.string_pool.push(text);
        let dst = self.fresh();
        let mut inst = Instruction::new(Opcode::Lea, DataType::Ptr);
        inst.out_count = 1;
        inst.operands = vec![dst];
        inst.flags = InstFlags::GLOBAL;
        inst.payload = Payload::StringConst(idx);
        self.cur.push(inst);
        Ok(dst)
    }

    /// `Add`/`Sub`/`And`/`Or`: `RRI` when the rhs is an immediate-sized
    /// constant, `RRR` otherwise.
    fn select_binop_fold_imm(&mut self, node: NodeId, op: Op, dt: DataType) -> Result<VReg> {
        let inputs = self.graph.node(node).inputs.clone();
        let lhs = self.select_value(inputs[0])?;
        let opcode = match op {
            Op::Add => Opcode::Add,
            Op::Sub => Opcode::Sub,
            Op::And => Opcode::And,
            Op::Or => Opcode::Or,
            _ => unreachable!(),
        };

        if dt.is_float() {
            let rhs = self.select_value(inputs[1])?;
            let fop = match op {
                Op::Add => Opcode::FpAdd,
                Op::Sub => Opcode::FpSub,
                _ => return Err(Error::codegen_invariant("bitwise op on float operand")),
            };
            let dst = self.fresh();
            self.emit_mov(dst, lhs, dt);
            let mut inst = Instruction::new(fop, dt);
            inst.out_count = 1;
            inst.in_count = 1;
            inst.operands = vec![dst, rhs];
            self.cur.push(inst);
            return Ok(dst);
        }

        if let Op::ConstInt(imm) = self.graph.node(inputs[1]).op {
            if let Ok(imm32) = i32::try_from(imm) {
                let dst = self.fresh();
                self.emit_mov(dst, lhs, dt);
                let mut inst = Instruction::new(opcode, dt);
                inst.out_count = 1;
                inst.in_count = 1;
                inst.operands = vec![dst, dst];
                inst.flags = InstFlags::IMMEDIATE;
                inst.payload = Payload::Immediate(imm32);
                self.cur.push(inst);
                return Ok(dst);
            }
        }

        let rhs = self.select_value(inputs[1])?;
        let dst = self.fresh();
        self.emit_mov(dst, lhs, dt);
        let mut inst = Instruction::new(opcode, dt);
        inst.out_count = 1;
        inst.in_count = 1;
        inst.operands = vec![dst, rhs];
        self.cur.push(inst);
        Ok(dst)
    }

    fn select_mul(&mut self, node: NodeId, dt: DataType) -> Result<VReg> {
        let inputs = self.graph.node(node).inputs.clone();
        let lhs = self.select_value(inputs[0])?;
        let rhs = self.select_value(inputs[1])?;
        let dst = self.fresh();
        if dt.is_float() {
            self.emit_mov(dst, lhs, dt);
            let mut inst = Instruction::new(Opcode::FpMul, dt);
            inst.out_count = 1;
            inst.in_count = 1;
            inst.operands = vec![dst, rhs];
            self.cur.push(inst);
        } else {
            self.emit_mov(dst, lhs, dt);
            let mut inst = Instruction::new(Opcode::Imul, dt);
            inst.out_count = 1;
            inst.in_count = 1;
            inst.operands = vec![dst, rhs];
            self.cur.push(inst);
        }
        Ok(dst)
    }

    /// `Div`/`Rem` pin their operands to `rax`/`rdx` (the `idiv` implicit
    /// operand pair).
    fn select_div_rem(&mut self, node: NodeId, op: Op, dt: DataType) -> Result<VReg> {
        let inputs = self.graph.node(node).inputs.clone();
        let lhs = self.select_value(inputs[0])?;
        if dt.is_float() {
            let rhs = self.select_value(inputs[1])?;
            let dst = self.fresh();
            self.emit_mov(dst, lhs, dt);
            let fop = if matches!(op, Op::Div) {
                Opcode::FpDiv
            } else {
                return Err(Error::not_implemented("floating-point remainder"));
            };
            let mut inst = Instruction::new(fop, dt);
            inst.out_count = 1;
            inst.in_count = 1;
            inst.operands = vec![dst, rhs];
            self.cur.push(inst);
            return Ok(dst);
        }
        let rhs = self.select_value(inputs[1])?;
        let rax = phys_vreg(RAX);
        self.emit_mov(rax, lhs, dt);
        let mut inst = Instruction::new(Opcode::Idiv, dt);
        inst.out_count = 2; // quotient in rax, remainder in rdx
        inst.in_count = 1;
        inst.tmp_count = 0;
        inst.operands = vec![rax, phys_vreg(sigma_core_rdx()), rhs];
        self.cur.push(inst);
        let dst = self.fresh();
        let src = if matches!(op, Op::Div) { rax } else { phys_vreg(sigma_core_rdx()) };
        self.emit_mov(dst, src, dt);
        Ok(dst)
    }

    fn select_cmp_to_bool(&mut self, node: NodeId, kind: CmpKind) -> Result<VReg> {
        let dst = self.fresh();
        self.emit_compare(node, kind, DataType::Byte, |sel, cc| {
            let mut inst = Instruction::new(Opcode::Setcc(cc), DataType::Byte);
            inst.out_count = 1;
            inst.operands = vec![dst];
            sel.cur.push(inst);
        })?;
        Ok(dst)
    }

    /// Emits the `CMP`/`FP_UCOMI` for a `Cmp` node and hands the resulting
    /// condition code to `consume` (either a `SETcc` materializing a bool,
    /// or a `Jcc` pair for a fused branch — see `select_if`).
    fn emit_compare(
        &mut self,
        node: NodeId,
        kind: CmpKind,
        _dt_hint: DataType,
        consume: impl FnOnce(&mut Self, CondCode),
    ) -> Result<()> {
        let inputs = self.graph.node(node).inputs.clone();
        let operand_ty = self.graph.node(inputs[0]).ty;
        let dt = self.data_type_of(operand_ty);
        let lhs = self.select_value(inputs[0])?;
        let rhs = self.select_value(inputs[1])?;
        let signed = match operand_ty.map(|t| self.ctx.types.read().get(t).clone()) {
            Some(Type::Int(_, signed)) => signed,
            _ => true,
        };
        let mut inst = Instruction::new(if dt.is_float() { Opcode::FpUcomi } else { Opcode::Cmp }, dt);
        inst.in_count = 2;
        inst.operands = vec![lhs, rhs];
        self.cur.push(inst);

        let cc = match (kind, signed) {
            (CmpKind::Eq, _) => CondCode::Eq,
            (CmpKind::Ne, _) => CondCode::Ne,
            (CmpKind::Lt, true) => CondCode::Lt,
            (CmpKind::Lt, false) => CondCode::Below,
            (CmpKind::Le, true) => CondCode::Le,
            (CmpKind::Le, false) => CondCode::BelowEq,
            (CmpKind::Gt, true) => CondCode::Gt,
            (CmpKind::Gt, false) => CondCode::Above,
            (CmpKind::Ge, true) => CondCode::Ge,
            (CmpKind::Ge, false) => CondCode::AboveEq,
        };
        consume(self, cc);
        Ok(())
    }

    fn select_not(&mut self, node: NodeId, dt: DataType) -> Result<VReg> {
        let input = self.graph.node(node).inputs[0];
        let src = self.select_value(input)?;
        let dst = self.fresh();
        self.emit_mov(dst, src, dt);
        let mut inst = Instruction::new(Opcode::Not, dt);
        inst.out_count = 1;
        inst.in_count = 1;
        inst.operands = vec![dst, dst];
        self.cur.push(inst);
        Ok(dst)
    }

    fn select_neg(&mut self, node: NodeId, dt: DataType) -> Result<VReg> {
        let input = self.graph.node(node).inputs[0];
        let src = self.select_value(input)?;
        let dst = self.fresh();
        self.emit_mov(dst, src, dt);
        let mut inst = Instruction::new(Opcode::Neg, dt);
        inst.out_count = 1;
        inst.in_count = 1;
        inst.operands = vec![dst, dst];
        self.cur.push(inst);
        Ok(dst)
    }

    fn select_cast(&mut self, node: NodeId, dt: DataType) -> Result<VReg> {
        let input = self.graph.node(node).inputs[0];
        let src_ty = self.graph.node(input).ty;
        let src = self.select_value(input)?;
        let dst = self.fresh();

        let src_is_float = self.is_float_ty(src_ty);
        let dst_is_float = dt.is_float();
        let op = match (src_is_float, dst_is_float) {
            (false, true) => Opcode::FpCvtSi2sd,
            (true, false) => Opcode::FpCvtSd2si,
            (true, true) => Opcode::FpMov,
            (false, false) => {
                let src_bytes = src_ty
                    .map(|t| {
                        let table = self.ctx.types.read();
                        table.get(t).size_of(&table)
                    })
                    .unwrap_or(8);
                if dt.bytes() > src_bytes {
                    Opcode::Movsxd
                } else {
                    Opcode::Mov
                }
            }
        };
        let mut inst = Instruction::new(op, dt);
        inst.out_count = 1;
        inst.in_count = 1;
        inst.operands = vec![dst, src];
        self.cur.push(inst);
        Ok(dst)
    }

    fn select_load(&mut self, node: NodeId) -> Result<()> {
        let inputs = self.graph.node(node).inputs.clone();
        let addr = self.select_value(inputs[1])?;
        let dt = self.data_type_of(self.graph.node(node).ty);
        let dst = self.fresh();
        let mut inst = Instruction::new(if dt.is_float() { Opcode::FpMov } else { Opcode::Mov }, dt);
        inst.out_count = 1;
        inst.in_count = 1;
        inst.operands = vec![dst, addr];
        inst.flags = InstFlags::MEM;
        inst.disp = 0;
        self.cur.push(inst);
        self.values.insert(node, dst);
        Ok(())
    }

    fn select_store(&mut self, node: NodeId) -> Result<()> {
        let inputs = self.graph.node(node).inputs.clone();
        let addr = self.select_value(inputs[1])?;
        let value_ty = self.graph.node(inputs[2]).ty;
        let value = self.select_value(inputs[2])?;
        let dt = self.data_type_of(value_ty);
        let mut inst = Instruction::new(if dt.is_float() { Opcode::FpMov } else { Opcode::Mov }, dt);
        inst.in_count = 2;
        inst.operands = vec![addr, value];
        inst.flags = InstFlags::MEM;
        inst.disp = 0;
        self.cur.push(inst);
        Ok(())
    }

    fn select_call(&mut self, node: NodeId, sym: SymId) -> Result<()> {
        let inputs = self.graph.node(node).inputs.clone();
        let args = &inputs[1..];

        let symbol = self
            .ctx
            .symbol(sym)
            .ok_or_else(|| Error::codegen_invariant(format!("call target symbol {sym} missing")))?;
        let mangled = crate::name_of_callee(self.ctx, symbol);

        let mut gpr_idx = 0usize;
        let mut xmm_idx = 0usize;
        let mut uses = Vec::new();
        for &arg in args {
            let dt = self.data_type_of(self.graph.node(arg).ty);
            let v = self.select_value(arg)?;
            if dt.is_float() {
                if let Some(&phys) = WIN64_XMM_PARAMS.get(xmm_idx) {
                    self.emit_mov(phys_vreg(phys), v, dt);
                    uses.push(phys_vreg(phys));
                } else {
                    return Err(Error::not_implemented("5th+ call argument (stack)"));
                }
                xmm_idx += 1;
            } else {
                if let Some(&phys) = WIN64_INT_PARAMS.get(gpr_idx) {
                    self.emit_mov(phys_vreg(phys), v, dt);
                    uses.push(phys_vreg(phys));
                } else {
                    return Err(Error::not_implemented("5th+ call argument (stack)"));
                }
                gpr_idx += 1;
            }
        }
        self.outgoing_arg_bytes = self.outgoing_arg_bytes.max(32);

        let mut inst = Instruction::new(Opcode::Call, DataType::Qword);
        inst.in_count = uses.len() as u8;
        inst.operands = uses;
        inst.flags = InstFlags::GLOBAL;
        inst.payload = Payload::Call(mangled);
        self.cur.push(inst);

        let ret_ty = self.graph.node(node).ty;
        if !matches!(ret_ty.map(|t| self.ctx.types.read().get(t).clone()), Some(Type::Void) | None) {
            let dt = self.data_type_of(ret_ty);
            let dst = self.fresh();
            let src = if dt.is_float() { phys_vreg(sigma_core_xmm0()) } else { phys_vreg(RAX) };
            self.emit_mov(dst, src, dt);
            self.values.insert(node, dst);
        }
        Ok(())
    }

    fn select_if(&mut self, node: NodeId, block: &CfgBlock) -> Result<()> {
        let cond = self.graph.node(node).inputs[1];
        let (true_block, false_block) = self.if_targets(block)?;

        let fused = match self.graph.node(cond).op {
            Op::Cmp(kind) if self.graph.node(cond).users().len() == 1 => Some((cond, kind)),
            _ => None,
        };

        if let Some((cmp_node, kind)) = fused {
            self.emit_compare(cmp_node, kind, DataType::Byte, |sel, cc| {
                let mut jcc = Instruction::new(Opcode::Jcc(cc), DataType::Qword);
                jcc.payload = Payload::Block(true_block.into());
                sel.cur.push(jcc);
            })?;
        } else {
            let v = self.select_value(cond)?;
            let mut test = Instruction::new(Opcode::Test, DataType::Byte);
            test.in_count = 2;
            test.operands = vec![v, v];
            self.cur.push(test);
            let mut jcc = Instruction::new(Opcode::Jcc(CondCode::Ne), DataType::Qword);
            jcc.payload = Payload::Block(true_block.into());
            self.cur.push(jcc);
        }

        self.resolve_phis_into(block, Some(false_block))?;
        self.emit_jmp(false_block);
        Ok(())
    }

    /// Recovers `(true_block, false_block)` from the `If`'s two `Proj`
    /// users, each of which leads (possibly through a single intervening
    /// block) into one CFG successor.
    fn if_targets(&self, block: &CfgBlock) -> Result<(BlockId, BlockId)> {
        if block.succs.len() != 2 {
            return Err(Error::codegen_invariant("If block does not have exactly two successors"));
        }
        let if_node = *block
            .nodes
            .last()
            .ok_or_else(|| Error::codegen_invariant("If block has no terminator"))?;
        let mut targets = [None, None];
        for &user in self.graph.node(if_node).users() {
            if let Op::Proj(idx) = self.graph.node(user).op {
                let succ = self
                    .cfg
                    .blocks()
                    .iter()
                    .find(|b| b.leader == user || b.nodes.contains(&user))
                    .map(|b| b.id)
                    .ok_or_else(|| Error::codegen_invariant("Proj has no CFG block"))?;
                targets[idx as usize] = Some(succ);
            }
        }
        match targets {
            [Some(t), Some(f)] => Ok((t, f)),
            _ => Err(Error::codegen_invariant("If is missing a true/false projection")),
        }
    }

    /// Append a copy into every `Phi` of `target` whose predecessor-input
    /// for `block` is live, at the end of `block`'s instruction stream.
    fn resolve_phis_into(&mut self, block: &CfgBlock, target: Option<BlockId>) -> Result<()> {
        let Some(target) = target else { return Ok(()) };
        let target_block = self.cfg.block(target);
        let phis: Vec<NodeId> =
            target_block.pinned.iter().copied().filter(|&n| matches!(self.graph.node(n).op, Op::Phi)).collect();
        for phi in phis {
            let region = self.graph.node(phi).inputs[0];
            let preds = self.graph.node(region).inputs.clone();
            let j = preds
                .iter()
                .position(|&p| self.cfg.block_of(p) == Some(block.id) || p == block.leader)
                .ok_or_else(|| Error::codegen_invariant("phi predecessor not found in region"))?;
            let value_node = self.graph.node(phi).inputs[j + 1];
            let value = self.select_value(value_node)?;
            let dst = self.reserve_phi(phi);
            let dt = self.data_type_of(self.graph.node(phi).ty);
            self.emit_mov(dst, value, dt);
        }
        Ok(())
    }

    fn select_return(&mut self, node: NodeId) -> Result<()> {
        let inputs = self.graph.node(node).inputs.clone();
        if inputs.len() > 1 {
            let value_ty = self.graph.node(inputs[1]).ty;
            let value = self.select_value(inputs[1])?;
            let dt = self.data_type_of(value_ty);
            let dst = if dt.is_float() { phys_vreg(sigma_core_xmm0()) } else { phys_vreg(RAX) };
            self.emit_mov(dst, value, dt);
        }
        self.cur.push(Instruction::new(crate::isa::Opcode::Epilogue, DataType::Qword));
        self.cur.push(Instruction::new(crate::isa::Opcode::Ret, DataType::Qword));
        Ok(())
    }
}

fn sigma_core_rdx() -> PhysReg {
    crate::isa::RDX
}

fn sigma_core_xmm0() -> PhysReg {
    PhysReg::xmm(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_core::ast::{AstId, BinOp};
    use sigma_core::checker::Checker;
    use sigma_core::symbol::{reset_scope_id_counter, reset_symbol_id_counter};
    use sigma_core::translate::lower_function;
    use sigma_error::{Position, SourceSpan};

    fn span() -> SourceSpan {
        SourceSpan::point("t.s", Position::new(1, 1))
    }

    fn leaked_ctx() -> &'static TranslationUnitContext<'static> {
        Box::leak(Box::new(TranslationUnitContext::new("t.s")))
    }

    #[test]
    fn straight_line_add_selects_into_a_single_block() {
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

        let mut checker = Checker::new(ctx);
        checker.declare_items(&[func.base.id], &[]);
        checker.check_function(func.base.id);
        assert!(ctx.diagnostics().is_empty(), "{:?}", ctx.diagnostics());

        let graph = lower_function(ctx, func.base.id);
        let cfg = sigma_core::cfg::build(&graph);
        let sched = sigma_core::schedule(&graph, &cfg);
        let program = select(ctx, &graph, &cfg, &sched, "add".to_string()).expect("selects");

        assert_eq!(program.blocks.len(), 2);
        let entry = &program.blocks[0];
        assert!(entry.insts.iter().any(|i| matches!(i.op, crate::isa::Opcode::Add)));
        assert!(entry.insts.iter().any(|i| matches!(i.op, crate::isa::Opcode::Ret)));
    }
}
