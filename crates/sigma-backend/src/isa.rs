//! x64 instruction shapes and operand types.
//!
//! A closed opcode enum, an operand-count `(out, in, tmp)` triple, a flat
//! operand slice, and a data-type tag. Operands are a payload enum rather
//! than an intrusive type-erased list, and instructions live in a flat
//! `Vec<Instruction>` per block instead of a linked list — this crate's IR
//! (`sigma_core::ir`) already made the same trade (arena pointers become
//! `Vec` indices), and the same technique composes cleanly here.
//!
//! This selector does not attempt an exhaustive x64 opcode taxonomy (every
//! SSE variant, every `cmovcc`/`setcc` condition, the `rep`-prefixed string
//! instructions). It covers every shape the selector (`select.rs`) actually
//! emits for Sigma's integer/bool/pointer core plus the `f32`/`f64`
//! arithmetic surface; see `select.rs`'s module doc for the float/SSE
//! scoping note.

use bitflags::bitflags;

/// A virtual register, numbered densely per function starting at 0. The
/// first 32 are never produced by selection — they are the fixed physical
/// slots (`PhysReg`) callbacks reserve for calling-convention registers: 32
/// pre-allocated intervals, 16 GPR plus 16 XMM.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct VReg(pub u32);

impl std::fmt::Display for VReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The canonical mapping for the 32 pre-allocated fixed vregs: `0..16` are
/// the GPRs in encoding order, `16..32` are the XMMs. Every other module
/// that needs to go from a fixed vreg back to its register (`regalloc`'s
/// interval pinning, `emit`'s operand resolution) uses this rather than
/// re-deriving it.
pub fn phys_of_fixed_vreg(v: VReg) -> PhysReg {
    debug_assert!(v.0 < 32, "not a fixed vreg: {v}");
    if v.0 < 16 {
        PhysReg::gpr(v.0 as u8)
    } else {
        PhysReg::xmm((v.0 - 16) as u8)
    }
}

/// Register class: which bank a `VReg`/`PhysReg` lives in. Exactly two
/// banks: general-purpose and SSE.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RegClass {
    Gpr,
    Xmm,
}

/// A physical x64 register, GPR or XMM, by its encoding index (0..15).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PhysReg {
    pub class: RegClass,
    pub index: u8,
}

impl PhysReg {
    pub const fn gpr(index: u8) -> Self {
        PhysReg { class: RegClass::Gpr, index }
    }
    pub const fn xmm(index: u8) -> Self {
        PhysReg { class: RegClass::Xmm, index }
    }
}

pub const RAX: PhysReg = PhysReg::gpr(0);
pub const RCX: PhysReg = PhysReg::gpr(1);
pub const RDX: PhysReg = PhysReg::gpr(2);
pub const RBX: PhysReg = PhysReg::gpr(3);
pub const RSP: PhysReg = PhysReg::gpr(4);
pub const RBP: PhysReg = PhysReg::gpr(5);
pub const RSI: PhysReg = PhysReg::gpr(6);
pub const RDI: PhysReg = PhysReg::gpr(7);
pub const R8: PhysReg = PhysReg::gpr(8);
pub const R9: PhysReg = PhysReg::gpr(9);
pub const R10: PhysReg = PhysReg::gpr(10);
pub const R11: PhysReg = PhysReg::gpr(11);
pub const R12: PhysReg = PhysReg::gpr(12);
pub const R13: PhysReg = PhysReg::gpr(13);
pub const R14: PhysReg = PhysReg::gpr(14);
pub const R15: PhysReg = PhysReg::gpr(15);

/// Win64 argument registers for the first four integer/pointer parameters.
/// Indices past 3 go on the stack.
pub const WIN64_INT_PARAMS: [PhysReg; 4] = [RCX, RDX, R8, R9];
pub const WIN64_XMM_PARAMS: [PhysReg; 4] =
    [PhysReg::xmm(0), PhysReg::xmm(1), PhysReg::xmm(2), PhysReg::xmm(3)];

/// Win64 callee-saved GPRs the allocator should prefer last, biased by a
/// half-free constant.
pub const WIN64_CALLEE_SAVED_GPR: [PhysReg; 7] = [RBX, RBP, RDI, RSI, R12, R13, R14];
/// `rsp`/`rbp`/`r15` are excluded from general allocation: `rsp` is the
/// stack pointer, `rbp` is the fixed frame base every `Local` address and
/// every spill slot is addressed relative to, and `r15` is reserved
/// as a scratch register by the emitter for 64-bit absolute address
/// materialization and by the register allocator for reloading spilled
/// operands.
pub const ALLOCATABLE_GPRS: [PhysReg; 13] =
    [RAX, RCX, RDX, RBX, RSI, RDI, R8, R9, R10, R11, R12, R13, R14];
/// `xmm15` is excluded for the same reason `r15` is: reserved as the
/// register allocator's scratch register for reloading spilled float
/// operands.
pub const ALLOCATABLE_XMMS: [PhysReg; 15] = [
    PhysReg::xmm(0),
    PhysReg::xmm(1),
    PhysReg::xmm(2),
    PhysReg::xmm(3),
    PhysReg::xmm(4),
    PhysReg::xmm(5),
    PhysReg::xmm(6),
    PhysReg::xmm(7),
    PhysReg::xmm(8),
    PhysReg::xmm(9),
    PhysReg::xmm(10),
    PhysReg::xmm(11),
    PhysReg::xmm(12),
    PhysReg::xmm(13),
    PhysReg::xmm(14),
];

/// x64 operand width/class tag: byte/word/dword/qword plus sse variants,
/// xmmword, and pointer variants.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DataType {
    Byte,
    Word,
    Dword,
    Qword,
    Sse32,
    Sse64,
    Ptr,
}

impl DataType {
    pub fn bytes(self) -> u32 {
        match self {
            DataType::Byte => 1,
            DataType::Word => 2,
            DataType::Dword | DataType::Sse32 => 4,
            DataType::Qword | DataType::Sse64 | DataType::Ptr => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Sse32 | DataType::Sse64)
    }

    pub fn mnemonic_suffix(self) -> &'static str {
        match self {
            DataType::Byte => "byte",
            DataType::Word => "word",
            DataType::Dword | DataType::Sse32 => "dword",
            DataType::Qword | DataType::Sse64 | DataType::Ptr => "qword",
        }
    }
}

bitflags! {
    /// The subset of per-instruction flags the selector/emitter actually
    /// consult: memory-operand presence, a node-relocation target,
    /// immediate/absolute payload discriminants, and a post-split spill move.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct InstFlags: u16 {
        const MEM       = 1 << 0;
        const GLOBAL    = 1 << 1;
        const NODE      = 1 << 2;
        const IMMEDIATE = 1 << 3;
        const ABSOLUTE  = 1 << 4;
        const INDEXED   = 1 << 5;
        const SPILL     = 1 << 6;
    }
}

/// Closed opcode set: no string instructions, no `cmovcc`, SSE limited to
/// the four arithmetic ops and move/compare/convert — see the module doc's
/// scoping note.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Opcode {
    Mov,
    Movabs,
    Zero,
    Lea,
    Add,
    Sub,
    Imul,
    Idiv,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Cmp,
    Test,
    Movsxd,
    Movzxb,
    Movsxb,
    Setcc(CondCode),
    Jcc(CondCode),
    Jmp,
    Call,
    Push,
    Pop,
    Ret,
    FpMov,
    FpAdd,
    FpSub,
    FpMul,
    FpDiv,
    FpUcomi,
    FpCvtSi2sd,
    FpCvtSd2si,
    /// Pseudo-instruction marking a block's entry.
    Label,
    /// Function prologue/epilogue pseudo-instructions, expanded to real
    /// bytes by `emit.rs` once the stack frame size is known.
    Prologue,
    Epilogue,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CondCode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned below/above, used for pointer/unsigned-int comparisons.
    Below,
    BelowEq,
    Above,
    AboveEq,
}

impl CondCode {
    /// The four-bit x64 condition code used in both `0F 8x` (`Jcc`) and
    /// `0F 9x` (`SETcc`) encodings.
    pub fn encoding(self) -> u8 {
        match self {
            CondCode::Eq => 0x4,
            CondCode::Ne => 0x5,
            CondCode::Lt => 0xC,
            CondCode::Ge => 0xD,
            CondCode::Le => 0xE,
            CondCode::Gt => 0xF,
            CondCode::Below => 0x2,
            CondCode::AboveEq => 0x3,
            CondCode::BelowEq => 0x6,
            CondCode::Above => 0x7,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CondCode::Eq => "e",
            CondCode::Ne => "ne",
            CondCode::Lt => "l",
            CondCode::Ge => "ge",
            CondCode::Le => "le",
            CondCode::Gt => "g",
            CondCode::Below => "b",
            CondCode::AboveEq => "ae",
            CondCode::BelowEq => "be",
            CondCode::Above => "a",
        }
    }
}

/// Inline payload carried by instructions that need more than a vreg
/// operand list: an immediate, an absolute 64-bit constant (`MOVABS`), or a
/// relocation target (a called/jumped-to symbol, resolved by the object
/// writer, or a block label resolved by the emitter's patch table).
#[derive(Clone, PartialEq, Debug)]
pub enum Payload {
    None,
    Immediate(i32),
    Absolute(u64),
    /// Direct-call target: the mangled symbol name.
    Call(String),
    /// Jump/branch target: the destination block.
    Block(crate::select::BlockLabel),
    /// Load of an interned string constant's `.rdata` address.
    StringConst(u32),
    /// Load of a floating-point constant's `.rdata` address.
    FloatConst(u32),
}

/// One selected instruction. Operands are densely packed `out | in | tmp`
/// vreg slots over a flat operand slice, keyed by an `(out_count,
/// in_count, tmp_count)` triple per opcode.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub data_type: DataType,
    pub flags: InstFlags,
    pub operands: Vec<VReg>,
    pub out_count: u8,
    pub in_count: u8,
    pub tmp_count: u8,
    pub payload: Payload,
    /// Memory operand fields, valid when `flags.contains(InstFlags::MEM)`:
    /// `[base + disp]`. This backend never selects scaled-index addressing
    /// (no array types in scope), so there's no `scale`/`index` field.
    pub disp: i32,
    /// Assigned by live-range analysis; strictly increasing.
    pub time: i32,
}

impl Instruction {
    pub fn new(op: Opcode, data_type: DataType) -> Self {
        Instruction {
            op,
            data_type,
            flags: InstFlags::empty(),
            operands: Vec::new(),
            out_count: 0,
            in_count: 0,
            tmp_count: 0,
            payload: Payload::None,
            disp: 0,
            time: 0,
        }
    }

    pub fn outs(&self) -> &[VReg] {
        &self.operands[..self.out_count as usize]
    }

    pub fn ins(&self) -> &[VReg] {
        let start = self.out_count as usize;
        &self.operands[start..start + self.in_count as usize]
    }

    pub fn tmps(&self) -> &[VReg] {
        let start = (self.out_count + self.in_count) as usize;
        &self.operands[start..]
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.op, Opcode::Jmp | Opcode::Jcc(_) | Opcode::Ret | Opcode::Epilogue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_slices_split_by_count() {
        let mut inst = Instruction::new(Opcode::Add, DataType::Dword);
        inst.out_count = 1;
        inst.in_count = 2;
        inst.operands = vec![VReg(0), VReg(0), VReg(1)];
        assert_eq!(inst.outs(), &[VReg(0)]);
        assert_eq!(inst.ins(), &[VReg(0), VReg(1)]);
        assert!(inst.tmps().is_empty());
    }

    #[test]
    fn cond_code_encodings_are_distinct() {
        let codes = [
            CondCode::Eq,
            CondCode::Ne,
            CondCode::Lt,
            CondCode::Ge,
            CondCode::Le,
            CondCode::Gt,
        ];
        let mut seen = std::collections::HashSet::new();
        for c in codes {
            assert!(seen.insert(c.encoding()));
        }
    }
}
