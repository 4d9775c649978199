//! Linear-scan register allocation.
//!
//! This builds on the live-ranges `live.rs` computed: Pass C constructs one
//! [`LiveInterval`] per vreg — live-out extension across every block it
//! spans, then a reverse walk of each block narrowing def/use points — then
//! runs the scan itself.
//!
//! **Scope note**: a full linear-scan allocator splits an interval at an
//! arbitrary program point whenever a register becomes unavailable
//! mid-lifetime, so one vreg can live in different locations across its
//! lifetime. Sigma's grammar has no loops and `select.rs` already resolves
//! phi values with explicit per-predecessor moves, so every vreg here is
//! short-lived enough that a whole-interval decision — one physical
//! register or one spill slot for the vreg's entire lifetime — is
//! sufficient to allocate any program this selector produces. Splitting at
//! block boundaries for cross-edge resolution is kept; mid-block splitting
//! of a single register is not.

use crate::isa::{
    phys_of_fixed_vreg, DataType, Instruction, Opcode, PhysReg, RegClass, VReg, ALLOCATABLE_GPRS,
    ALLOCATABLE_XMMS, R15, RSP, WIN64_CALLEE_SAVED_GPR,
};
use crate::live::LiveRangeAnalysis;
use crate::select::{Program, FIRST_FREE_VREG};
use sigma_error::{Error, Result};
use std::collections::HashMap;

/// Where a vreg lives for its whole lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Reg(PhysReg),
    /// Byte offset from the frame base, always negative (grows downward
    /// past the locals `select_local` already reserved).
    Spill(i32),
}

#[derive(Clone, Debug)]
pub struct LiveInterval {
    pub vreg: VReg,
    pub class: RegClass,
    pub start: i32,
    pub end: i32,
    pub fixed: Option<PhysReg>,
}

pub struct Allocation {
    pub location: HashMap<VReg, Location>,
    pub frame_size: u32,
    /// GPRs callee-saved and actually used, for the prologue/epilogue to
    /// push/pop.
    pub used_callee_saved: Vec<PhysReg>,
}

fn phys_vreg_class(v: VReg) -> RegClass {
    if v.0 < 16 {
        RegClass::Gpr
    } else {
        RegClass::Xmm
    }
}

/// Classify every non-fixed vreg by the shape of the instructions that touch
/// it: float opcodes pin their xmm-class operands, everything else defaults
/// to GPR. The selector doesn't thread a parallel class table through
/// `Selector`, so this recovers it from instruction shape instead rather
/// than tracking a class alongside every interval from the moment it's
/// constructed.
fn classify_vregs(program: &Program) -> Vec<RegClass> {
    let mut classes = vec![RegClass::Gpr; program.vreg_count as usize];
    for (i, c) in classes.iter_mut().enumerate() {
        if i < 32 {
            *c = phys_vreg_class(VReg(i as u32));
        }
    }
    for block in &program.blocks {
        for inst in &block.insts {
            match inst.op {
                Opcode::FpMov | Opcode::FpAdd | Opcode::FpSub | Opcode::FpMul | Opcode::FpDiv | Opcode::FpUcomi => {
                    for v in &inst.operands {
                        classes[v.0 as usize] = RegClass::Xmm;
                    }
                }
                Opcode::FpCvtSi2sd => {
                    // dst (xmm) <- src (gpr)
                    for v in inst.outs() {
                        classes[v.0 as usize] = RegClass::Xmm;
                    }
                }
                Opcode::FpCvtSd2si => {
                    // dst (gpr) <- src (xmm)
                    for v in inst.ins() {
                        classes[v.0 as usize] = RegClass::Xmm;
                    }
                }
                _ => {}
            }
        }
    }
    classes
}

fn build_intervals(program: &Program, analysis: &LiveRangeAnalysis, classes: &[RegClass]) -> Vec<LiveInterval> {
    let n = program.vreg_count as usize;
    let mut start = vec![i32::MAX; n];
    let mut end = vec![0i32; n];
    let mut touched = vec![false; n];

    let mark = |v: u32, t0: i32, t1: i32, start: &mut [i32], end: &mut [i32], touched: &mut [bool]| {
        let i = v as usize;
        start[i] = start[i].min(t0);
        end[i] = end[i].max(t1);
        touched[i] = true;
    };

    for (bi, block) in program.blocks.iter().enumerate() {
        let info = &analysis.blocks[bi];
        for v in info.live_out.iter_set() {
            mark(v, info.start, info.end, &mut start, &mut end, &mut touched);
        }
        for inst in &block.insts {
            for v in inst.outs() {
                mark(v.0, inst.time, inst.time, &mut start, &mut end, &mut touched);
            }
            for v in inst.ins().iter().chain(inst.tmps()) {
                mark(v.0, info.start, inst.time, &mut start, &mut end, &mut touched);
            }
        }
    }

    // Fixed physical registers are pinned live from time 0 so the scan never
    // hands their register out before their defining instruction.
    for v in 0..FIRST_FREE_VREG {
        if touched[v as usize] {
            start[v as usize] = 0;
        }
    }

    (0..n)
        .filter(|&i| touched[i])
        .map(|i| {
            let v = VReg(i as u32);
            LiveInterval {
                vreg: v,
                class: classes[i],
                start: start[i],
                end: end[i],
                fixed: if (i as u32) < FIRST_FREE_VREG { Some(phys_of_fixed_vreg(v)) } else { None },
            }
        })
        .collect()
}

struct ActiveEntry {
    reg: PhysReg,
    end: i32,
}

fn candidate_order(class: RegClass) -> Vec<PhysReg> {
    match class {
        RegClass::Gpr => {
            let callee: std::collections::HashSet<_> = WIN64_CALLEE_SAVED_GPR.iter().copied().collect();
            let mut order: Vec<PhysReg> = ALLOCATABLE_GPRS.iter().copied().filter(|r| !callee.contains(r)).collect();
            order.extend(ALLOCATABLE_GPRS.iter().copied().filter(|r| callee.contains(r)));
            order
        }
        RegClass::Xmm => ALLOCATABLE_XMMS.to_vec(),
    }
}

/// Build intervals and run the linear scan, assigning every vreg a physical
/// register or a spill slot for its whole lifetime.
pub fn allocate(program: &mut Program, analysis: LiveRangeAnalysis) -> Result<Allocation> {
    let classes = classify_vregs(program);
    let mut intervals = build_intervals(program, &analysis, &classes);
    intervals.sort_by_key(|i| i.start);

    let mut location: HashMap<VReg, Location> = HashMap::new();
    let mut active: Vec<ActiveEntry> = Vec::new();
    let mut occupied: HashMap<PhysReg, i32> = HashMap::new(); // reg -> active interval end
    let mut frame_size = program.frame_size;
    let mut used_callee_saved = Vec::new();

    for interval in &intervals {
        // rsp/r15 are never allocatable; the emitter owns them outright.
        if interval.fixed == Some(RSP) || interval.fixed == Some(R15) {
            continue;
        }

        active.retain(|e| {
            let keep = e.end > interval.start;
            if !keep {
                occupied.remove(&e.reg);
            }
            keep
        });

        if let Some(fixed) = interval.fixed {
            location.insert(interval.vreg, Location::Reg(fixed));
            occupied.insert(fixed, interval.end);
            active.push(ActiveEntry { reg: fixed, end: interval.end });
            continue;
        }

        let candidates = candidate_order(interval.class);
        let free = candidates.iter().copied().find(|r| !occupied.contains_key(r));

        match free {
            Some(reg) => {
                location.insert(interval.vreg, Location::Reg(reg));
                occupied.insert(reg, interval.end);
                active.push(ActiveEntry { reg, end: interval.end });
                if interval.class == RegClass::Gpr && WIN64_CALLEE_SAVED_GPR.contains(&reg) && !used_callee_saved.contains(&reg) {
                    used_callee_saved.push(reg);
                }
            }
            None => {
                // allocate_blocked_reg: spill whichever of the active
                // intervals in this class frees up soonest is still live
                // the longest is the one least worth keeping resident.
                let spill_candidate = active
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| candidates.contains(&e.reg))
                    .max_by_key(|(_, e)| e.end);

                match spill_candidate {
                    Some((idx, _)) if active[idx].end > interval.end => {
                        let reg = active[idx].reg;
                        let evicted_vreg = location
                            .iter()
                            .find(|(_, loc)| **loc == Location::Reg(reg))
                            .map(|(v, _)| *v)
                            .ok_or_else(|| Error::codegen_invariant("spill target has no recorded location"))?;
                        frame_size += 8;
                        location.insert(evicted_vreg, Location::Spill(-(frame_size as i32)));
                        active.remove(idx);
                        location.insert(interval.vreg, Location::Reg(reg));
                        occupied.insert(reg, interval.end);
                        active.push(ActiveEntry { reg, end: interval.end });
                    }
                    _ => {
                        frame_size += 8;
                        location.insert(interval.vreg, Location::Spill(-(frame_size as i32)));
                    }
                }
            }
        }
    }

    resolve_spilled_operands(program, &location)?;

    Ok(Allocation { location, frame_size, used_callee_saved })
}

/// Every spilled vreg needs a real register at each instruction that
/// touches it. This inserts a load-before/store-after move through a
/// scratch register (`r15`/`xmm15`, never handed out by the scan) around
/// any instruction referencing a spilled operand.
fn resolve_spilled_operands(program: &mut Program, location: &HashMap<VReg, Location>) -> Result<()> {
    for block in &mut program.blocks {
        let mut rewritten = Vec::with_capacity(block.insts.len());
        for inst in block.insts.drain(..) {
            if !inst.operands.iter().any(|v| matches!(location.get(v), Some(Location::Spill(_)))) {
                rewritten.push(inst);
                continue;
            }
            rewrite_spilled(inst, location, &mut rewritten)?;
        }
        block.insts = rewritten;
    }
    Ok(())
}

fn scratch_for(class: RegClass) -> VReg {
    match class {
        RegClass::Gpr => VReg(15),
        RegClass::Xmm => VReg(31),
    }
}

fn rewrite_spilled(mut inst: Instruction, location: &HashMap<VReg, Location>, out: &mut Vec<Instruction>) -> Result<()> {
    let mut reloads = Vec::new();
    let mut spill_back = Vec::new();

    let out_count = inst.out_count as usize;
    for (idx, v) in inst.operands.clone().iter().enumerate() {
        let Some(Location::Spill(off)) = location.get(v) else { continue };
        let class = phys_vreg_class(*v);
        let scratch = scratch_for(class);
        let dt = if class == RegClass::Xmm { DataType::Sse64 } else { DataType::Qword };

        if idx < out_count {
            inst.operands[idx] = scratch;
            let mut store = Instruction::new(if class == RegClass::Xmm { Opcode::FpMov } else { Opcode::Mov }, dt);
            store.in_count = 2;
            store.operands = vec![VReg(5), scratch]; // [rbp + off] <- scratch, matching select_store's (addr, value) shape
            store.flags = crate::isa::InstFlags::MEM | crate::isa::InstFlags::SPILL;
            store.disp = *off;
            store.time = inst.time;
            spill_back.push(store);
        } else {
            inst.operands[idx] = scratch;
            let mut load = Instruction::new(if class == RegClass::Xmm { Opcode::FpMov } else { Opcode::Mov }, dt);
            load.out_count = 1;
            load.in_count = 1;
            load.operands = vec![scratch, VReg(5)];
            load.flags = crate::isa::InstFlags::MEM | crate::isa::InstFlags::SPILL;
            load.disp = *off;
            load.time = inst.time;
            reloads.push(load);
        }
    }

    out.extend(reloads);
    out.push(inst);
    out.extend(spill_back);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{DataType as DT, Opcode as Op};
    use crate::select::{BlockLabel, MachBlock};

    fn build_program(n_temps: u32) -> Program {
        let mut insts = vec![Instruction::new(Op::Label, DT::Qword)];
        let mut vregs = Vec::new();
        for i in 0..n_temps {
            let mut mov = Instruction::new(Op::Zero, DT::Qword);
            mov.out_count = 1;
            let v = VReg(FIRST_FREE_VREG + i);
            mov.operands = vec![v];
            insts.push(mov);
            vregs.push(v);
        }
        let mut ret = Instruction::new(Op::Ret, DT::Qword);
        ret.in_count = vregs.len() as u8;
        ret.operands = vregs;
        insts.push(ret);

        Program {
            name: "f".into(),
            blocks: vec![MachBlock { label: BlockLabel(0), insts }],
            vreg_count: FIRST_FREE_VREG + n_temps,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        }
    }

    #[test]
    fn few_temporaries_all_fit_in_registers() {
        let mut program = build_program(3);
        let analysis = crate::live::analyze(&mut program);
        let allocation = allocate(&mut program, analysis).unwrap();
        assert!(allocation.location.values().all(|l| matches!(l, Location::Reg(_))));
    }

    #[test]
    fn register_pressure_spills_to_the_stack() {
        let mut program = build_program(20);
        let analysis = crate::live::analyze(&mut program);
        let allocation = allocate(&mut program, analysis).unwrap();
        assert!(allocation.location.values().any(|l| matches!(l, Location::Spill(_))));
        assert!(allocation.frame_size > 0);
    }
}
