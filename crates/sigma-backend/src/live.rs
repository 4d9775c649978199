//! Live-range analysis over a selected [`Program`].
//!
//! Two passes:
//!
//! - **Pass A** walks every block in program order, stamping each
//!   instruction with a strictly increasing even `time` and building the
//!   block's gen/kill sets as it goes (an operand is "gen" the first time
//!   it's read before ever being killed; an output always "kills").
//! - **Pass B** runs the standard backward dataflow fixed point over those
//!   gen/kill sets to produce `live_in`/`live_out` per block.
//!
//! Per-vreg [`LiveInterval`](crate::regalloc::LiveInterval) construction
//! lives in `regalloc.rs`, which consumes this pass's output directly.

use crate::isa::{Instruction, Opcode, Payload, VReg};
use crate::select::{BlockLabel, Program};

/// A fixed-size bitset indexed by vreg number, with word-parallel union and
/// clear operations.
#[derive(Clone, Debug)]
pub struct DenseSet {
    words: Vec<u64>,
}

impl DenseSet {
    pub fn new(len: usize) -> Self {
        DenseSet { words: vec![0u64; len.div_ceil(64).max(1)] }
    }

    pub fn get(&self, i: u32) -> bool {
        self.words[i as usize / 64] & (1u64 << (i % 64)) != 0
    }

    pub fn put(&mut self, i: u32) {
        self.words[i as usize / 64] |= 1u64 << (i % 64);
    }

    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }

    pub fn union_with(&mut self, other: &DenseSet) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// `(live_out & !kill) | gen`, returning whether the set changed.
    pub fn recompute_in(&mut self, live_out: &DenseSet, kill: &DenseSet, gen: &DenseSet) -> bool {
        let mut changed = false;
        for i in 0..self.words.len() {
            let new_word = (live_out.words[i] & !kill.words[i]) | gen.words[i];
            if new_word != self.words[i] {
                changed = true;
            }
            self.words[i] = new_word;
        }
        changed
    }

    pub fn iter_set(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64).filter(move |bit| word & (1u64 << bit) != 0).map(move |bit| (word_idx * 64 + bit) as u32)
        })
    }
}

/// Per-block timing and liveness, indexed in parallel with `Program::blocks`.
#[derive(Clone, Debug)]
pub struct BlockLiveInfo {
    pub start: i32,
    pub end: i32,
    /// Time of the first terminator in the block, or `end` if none is found
    /// (never happens for a well-formed selection, kept as a safe default).
    pub terminator: i32,
    pub gen: DenseSet,
    pub kill: DenseSet,
    pub live_in: DenseSet,
    pub live_out: DenseSet,
}

pub struct LiveRangeAnalysis {
    pub blocks: Vec<BlockLiveInfo>,
    pub vreg_count: usize,
    /// Successor block indices (into `Program::blocks`) per block, recovered
    /// from each block's trailing `Jcc`/`Jmp` instructions.
    pub successors: Vec<Vec<usize>>,
}

fn successors_of(block: &crate::select::MachBlock, label_index: &std::collections::HashMap<BlockLabel, usize>) -> Vec<usize> {
    block
        .insts
        .iter()
        .filter_map(|inst| match (&inst.op, &inst.payload) {
            (Opcode::Jmp, Payload::Block(l)) | (Opcode::Jcc(_), Payload::Block(l)) => label_index.get(l).copied(),
            _ => None,
        })
        .collect()
}

/// Run Pass A (timing + gen/kill) and Pass B (live-in/live-out dataflow).
pub fn analyze(program: &mut Program) -> LiveRangeAnalysis {
    let vreg_count = program.vreg_count as usize;
    let label_index: std::collections::HashMap<BlockLabel, usize> =
        program.blocks.iter().enumerate().map(|(i, b)| (b.label, i)).collect();
    let successors: Vec<Vec<usize>> =
        program.blocks.iter().map(|b| successors_of(b, &label_index)).collect();
    let mut predecessors = vec![Vec::new(); program.blocks.len()];
    for (i, succs) in successors.iter().enumerate() {
        for &s in succs {
            predecessors[s].push(i);
        }
    }

    let mut blocks = Vec::with_capacity(program.blocks.len());
    let mut timeline: i32 = 2;
    for block in &mut program.blocks {
        let start = timeline;
        let mut gen = DenseSet::new(vreg_count);
        let mut kill = DenseSet::new(vreg_count);
        let mut terminator = None;

        for inst in &mut block.insts {
            inst.time = timeline;
            if terminator.is_none() && inst.is_terminator() {
                terminator = Some(timeline);
            }
            timing_gen_kill(inst, &mut gen, &mut kill);
            timeline += 2;
        }

        let end = timeline;
        blocks.push(BlockLiveInfo {
            start,
            end,
            terminator: terminator.unwrap_or(end),
            live_in: gen.clone(),
            live_out: DenseSet::new(vreg_count),
            gen,
            kill,
        });
    }

    // Pass B: backward dataflow fixed point, worklist seeded with every block.
    let mut worklist: Vec<usize> = (0..blocks.len()).collect();
    while let Some(b) = worklist.pop() {
        let mut live_out = DenseSet::new(vreg_count);
        for &s in &successors[b] {
            live_out.union_with(&blocks[s].live_in);
        }
        blocks[b].live_out = live_out.clone();
        let info = &mut blocks[b];
        let changed = {
            let mut live_in = info.live_in.clone();
            let changed = live_in.recompute_in(&live_out, &info.kill, &info.gen);
            info.live_in = live_in;
            changed
        };
        if changed {
            worklist.extend(predecessors[b].iter().copied());
        }
    }

    LiveRangeAnalysis { blocks, vreg_count, successors }
}

fn timing_gen_kill(inst: &Instruction, gen: &mut DenseSet, kill: &mut DenseSet) {
    for v in inst.ins().iter().chain(inst.tmps()) {
        if !kill.get(v.0) {
            gen.put(v.0);
        }
    }
    for v in inst.outs() {
        kill.put(v.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::DataType;
    use crate::select::MachBlock;

    fn mov(dst: VReg, src: VReg) -> Instruction {
        let mut i = Instruction::new(Opcode::Mov, DataType::Qword);
        i.out_count = 1;
        i.in_count = 1;
        i.operands = vec![dst, src];
        i
    }

    #[test]
    fn timeline_increases_monotonically_across_blocks() {
        let mut program = Program {
            name: "f".into(),
            blocks: vec![
                MachBlock {
                    label: BlockLabel(0),
                    insts: vec![Instruction::new(Opcode::Label, DataType::Qword), mov(VReg(40), VReg(0))],
                },
                MachBlock { label: BlockLabel(1), insts: vec![Instruction::new(Opcode::Label, DataType::Qword)] },
            ],
            vreg_count: 41,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        };
        analyze(&mut program);
        let times: Vec<i32> = program.blocks.iter().flat_map(|b| b.insts.iter().map(|i| i.time)).collect();
        for w in times.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn value_live_across_a_jump_is_in_successor_live_in() {
        let mut b0 = MachBlock {
            label: BlockLabel(0),
            insts: vec![Instruction::new(Opcode::Label, DataType::Qword), mov(VReg(40), VReg(0))],
        };
        let mut jmp = Instruction::new(Opcode::Jmp, DataType::Qword);
        jmp.payload = Payload::Block(BlockLabel(1));
        b0.insts.push(jmp);

        let mut b1 = MachBlock { label: BlockLabel(1), insts: vec![Instruction::new(Opcode::Label, DataType::Qword)] };
        let mut use_it = Instruction::new(Opcode::Ret, DataType::Qword);
        use_it.in_count = 1;
        use_it.operands = vec![VReg(40)];
        b1.insts.push(use_it);

        let mut program = Program {
            name: "f".into(),
            blocks: vec![b0, b1],
            vreg_count: 41,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        };
        let analysis = analyze(&mut program);
        assert!(analysis.blocks[0].live_out.get(40));
        assert!(analysis.blocks[1].live_in.get(40));
    }
}
