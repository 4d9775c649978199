//! x64 byte encoder, prologue/epilogue, and branch/call relocation patching.
//!
//! Encodes one function's selected, allocated instructions into a flat byte
//! buffer plus a list of [`Relocation`]s the object writer (`objfile.rs`)
//! turns into container-specific relocation records for call targets and
//! `.rdata` constant loads. Branches within the function are resolved
//! locally with a two-pass label table — no relocation needed for those.

use crate::isa::{phys_of_fixed_vreg, CondCode, DataType, Instruction, Opcode, Payload, PhysReg, VReg, RBP, RSP};
use crate::regalloc::{Allocation, Location};
use crate::select::{BlockLabel, Program};
use sigma_error::{Error, Result};
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelocKind {
    /// A 4-byte PC-relative displacement, patched by the linker once the
    /// target's final address is known (`IMAGE_REL_AMD64_REL32` /
    /// `R_X86_64_PLT32`/`R_X86_64_PC32` depending on container).
    Pc32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RelocTarget {
    Call(String),
    StringConst(u32),
    FloatConst(u32),
}

#[derive(Clone, Debug)]
pub struct Relocation {
    /// Byte offset of the 4-byte field to patch, within `CompiledFunction::code`.
    pub offset: u32,
    pub kind: RelocKind,
    pub target: RelocTarget,
}

pub struct CompiledFunction {
    pub name: String,
    pub code: Vec<u8>,
    pub relocations: Vec<Relocation>,
    pub frame_size: u32,
    pub string_pool: Vec<String>,
    pub float_pool: Vec<(bool, u64)>,
}

const REX: u8 = 0x40;
const REX_W: u8 = 0x48;

fn rex(w: bool, reg: u8, rm: u8) -> u8 {
    (if w { REX_W } else { REX }) | ((rm >> 3) & 1) | (((reg >> 3) & 1) << 2)
}

fn needs_rex(w: bool, reg: u8, rm: u8) -> bool {
    w || reg >= 8 || rm >= 8
}

fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    ((md & 3) << 6) | ((reg & 7) << 3) | (rm & 7)
}

struct Buf {
    bytes: Vec<u8>,
    relocations: Vec<Relocation>,
}

impl Buf {
    fn new() -> Self {
        Buf { bytes: Vec::new(), relocations: Vec::new() }
    }

    fn u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    fn i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn pos(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Opcode + REX + ModRM for a direct register/register form, plus a
    /// mandatory disp32 when `rm_is_mem` (this backend's only memory form:
    /// `[rm_reg + disp]`).
    fn reg_rm(&mut self, w: bool, opcode: &[u8], reg: u8, rm: u8, mem: Option<i32>, prefix: Option<u8>) {
        if let Some(p) = prefix {
            self.u8(p);
        }
        if needs_rex(w, reg, rm) {
            self.u8(rex(w, reg, rm));
        }
        self.bytes.extend_from_slice(opcode);
        match mem {
            Some(disp) => {
                self.u8(modrm(0b10, reg, rm & 7));
                if rm & 7 == 0b100 {
                    self.u8(0x24); // SIB: no index, base = rm
                }
                self.i32(disp);
            }
            None => self.u8(modrm(0b11, reg, rm)),
        }
    }
}

/// Resolve a vreg to its physical register for this instruction. Fixed
/// vregs (`<32`) are always their canonical register regardless of what the
/// allocator recorded (most are never touched at all); everything else must
/// have been assigned a register by `regalloc::allocate`'s spill-resolution
/// pass — a `VReg` reaching encoding still mapped to a `Location::Spill`
/// is an allocator bug, not a legitimate program shape.
pub(crate) fn resolve(v: VReg, alloc: &Allocation) -> Result<PhysReg> {
    if v.0 < 32 {
        return Ok(phys_of_fixed_vreg(v));
    }
    match alloc.location.get(&v) {
        Some(Location::Reg(r)) => Ok(*r),
        Some(Location::Spill(_)) => {
            Err(Error::codegen_invariant(format!("{v} reached encoding still spilled")))
        }
        None => Err(Error::codegen_invariant(format!("{v} has no register allocation"))),
    }
}

pub(crate) fn mem_base(inst: &Instruction, alloc: &Allocation) -> Result<PhysReg> {
    if inst.ins().is_empty() {
        // `select_local`'s implicit-base LEA: frame-relative off RBP.
        Ok(RBP)
    } else {
        resolve(inst.ins()[0], alloc)
    }
}

/// Encode one function's instructions, returning the code buffer and every
/// relocation a linker needs to resolve (calls and `.rdata` constant loads).
///
/// Frames of a page or more need a `__chkstk` probe before `sub rsp` to
/// avoid skipping over the guard page; that probe isn't implemented, so
/// such a frame is rejected here rather than miscompiled.
pub fn emit(program: &Program, alloc: &Allocation) -> Result<CompiledFunction> {
    let mut buf = Buf::new();
    let stack_usage = align_up(alloc.frame_size.max(program.outgoing_arg_bytes), 16);
    if stack_usage >= 4096 {
        return Err(Error::not_implemented(format!(
            "stack frame of {stack_usage} bytes in '{}' (needs a __chkstk probe)",
            program.name
        )));
    }

    emit_prologue(&mut buf, stack_usage, &alloc.used_callee_saved);

    let mut label_offsets: HashMap<BlockLabel, u32> = HashMap::new();
    let mut branch_patches: Vec<(u32, BlockLabel)> = Vec::new();

    for block in &program.blocks {
        label_offsets.insert(block.label, buf.pos());
        for inst in &block.insts {
            emit_instruction(&mut buf, inst, alloc, stack_usage, &mut branch_patches)?;
        }
    }

    for (field_offset, label) in branch_patches {
        let target = *label_offsets
            .get(&label)
            .ok_or_else(|| Error::codegen_invariant(format!("branch to unknown block {}", label.0)))?;
        let rel = target as i64 - (field_offset as i64 + 4);
        buf.bytes[field_offset as usize..field_offset as usize + 4]
            .copy_from_slice(&(rel as i32).to_le_bytes());
    }

    Ok(CompiledFunction {
        name: program.name.clone(),
        code: buf.bytes,
        relocations: buf.relocations,
        frame_size: stack_usage,
        string_pool: program.string_pool.clone(),
        float_pool: program.float_pool.clone(),
    })
}

pub(crate) fn align_up(n: u32, align: u32) -> u32 {
    (n + align - 1) / align * align
}

fn emit_prologue(buf: &mut Buf, stack_usage: u32, callee_saved: &[PhysReg]) {
    // Functions with a trivial frame skip the prologue entirely.
    if stack_usage <= 16 && callee_saved.is_empty() {
        return;
    }
    buf.u8(0x50 + (RBP.index & 7)); // push rbp
    buf.reg_rm(true, &[0x89], RSP.index, RBP.index, None, None); // mov rbp, rsp
    for &r in callee_saved {
        push_reg(buf, r);
    }
    if stack_usage == (stack_usage as i8) as u32 {
        buf.u8(rex(true, 0, RSP.index));
        buf.u8(0x83);
        buf.u8(modrm(0b11, 0x05, RSP.index & 7));
        buf.u8(stack_usage as u8);
    } else {
        buf.u8(rex(true, 0, RSP.index));
        buf.u8(0x81);
        buf.u8(modrm(0b11, 0x05, RSP.index & 7));
        buf.i32(stack_usage as i32);
    }
}

fn push_reg(buf: &mut Buf, r: PhysReg) {
    if r.index >= 8 {
        buf.u8(0x41);
    }
    buf.u8(0x50 + (r.index & 7));
}

fn pop_reg(buf: &mut Buf, r: PhysReg) {
    if r.index >= 8 {
        buf.u8(0x41);
    }
    buf.u8(0x58 + (r.index & 7));
}

/// Restore callee-saved registers, deallocate the frame, and pop `rbp` —
/// the inverse of `emit_prologue`. `select_return` places one `Epilogue`
/// instruction directly before each function's `Ret`, so this expands
/// inline at every return site rather than jumping to one shared label.
fn emit_epilogue(buf: &mut Buf, stack_usage: u32, callee_saved: &[PhysReg]) {
    if stack_usage <= 16 && callee_saved.is_empty() {
        return;
    }
    buf.u8(rex(true, 0, RSP.index));
    if stack_usage == (stack_usage as i8) as u32 {
        buf.u8(0x83);
        buf.u8(modrm(0b11, 0x00, RSP.index & 7));
        buf.u8(stack_usage as u8);
    } else {
        buf.u8(0x81);
        buf.u8(modrm(0b11, 0x00, RSP.index & 7));
        buf.i32(stack_usage as i32);
    }
    for &r in callee_saved.iter().rev() {
        pop_reg(buf, r);
    }
    buf.u8(0x5D); // pop rbp
}

fn emit_instruction(
    buf: &mut Buf,
    inst: &Instruction,
    alloc: &Allocation,
    stack_usage: u32,
    branch_patches: &mut Vec<(u32, BlockLabel)>,
) -> Result<()> {
    let w = matches!(inst.data_type, DataType::Qword | DataType::Ptr);
    match inst.op {
        Opcode::Label | Opcode::Prologue => {}
        Opcode::Epilogue => emit_epilogue(buf, stack_usage, &alloc.used_callee_saved),
        Opcode::Mov => {
            if inst.flags.contains(crate::isa::InstFlags::MEM) {
                let base = mem_base(inst, alloc)?;
                if inst.out_count == 0 {
                    let src = resolve(inst.ins().last().copied().unwrap(), alloc)?;
                    buf.reg_rm(w, &[0x89], src.index, base.index, Some(inst.disp), None);
                } else {
                    let dst = resolve(inst.outs()[0], alloc)?;
                    buf.reg_rm(w, &[0x8B], dst.index, base.index, Some(inst.disp), None);
                }
            } else if let Payload::Immediate(imm) = inst.payload {
                let dst = resolve(inst.outs()[0], alloc)?;
                buf.reg_rm(w, &[0xC7], 0, dst.index, None, None);
                buf.i32(imm);
            } else {
                let dst = resolve(inst.outs()[0], alloc)?;
                let src = resolve(inst.ins()[0], alloc)?;
                buf.reg_rm(w, &[0x89], src.index, dst.index, None, None);
            }
        }
        Opcode::Movabs => {
            let dst = resolve(inst.outs()[0], alloc)?;
            buf.u8(rex(true, 0, dst.index));
            buf.u8(0xB8 + (dst.index & 7));
            let bits = match inst.payload {
                Payload::Absolute(v) => v,
                _ => 0,
            };
            buf.u64(bits);
        }
        Opcode::Zero => {
            let dst = resolve(inst.outs()[0], alloc)?;
            buf.reg_rm(false, &[0x31], dst.index, dst.index, None, None);
        }
        Opcode::Lea => {
            let dst = resolve(inst.outs()[0], alloc)?;
            match &inst.payload {
                Payload::StringConst(idx) => {
                    buf.u8(rex(true, dst.index, 0));
                    buf.u8(0x8D);
                    buf.u8(modrm(0b00, dst.index, 0b101)); // RIP-relative
                    buf.relocations.push(Relocation { offset: buf.pos(), kind: RelocKind::Pc32, target: RelocTarget::StringConst(*idx) });
                    buf.i32(0);
                }
                Payload::FloatConst(idx) => {
                    buf.u8(rex(true, dst.index, 0));
                    buf.u8(0x8D);
                    buf.u8(modrm(0b00, dst.index, 0b101));
                    buf.relocations.push(Relocation { offset: buf.pos(), kind: RelocKind::Pc32, target: RelocTarget::FloatConst(*idx) });
                    buf.i32(0);
                }
                _ => {
                    let base = mem_base(inst, alloc)?;
                    buf.reg_rm(true, &[0x8D], dst.index, base.index, Some(inst.disp), None);
                }
            }
        }
        Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let opc: u8 = match inst.op {
                Opcode::Add => 0x01,
                Opcode::Sub => 0x29,
                Opcode::And => 0x21,
                Opcode::Or => 0x09,
                Opcode::Xor => 0x31,
                _ => unreachable!(),
            };
            if let Payload::Immediate(imm) = inst.payload {
                let sub_opc: u8 = match inst.op {
                    Opcode::Add => 0x00,
                    Opcode::Sub => 0x05,
                    Opcode::And => 0x04,
                    Opcode::Or => 0x01,
                    Opcode::Xor => 0x06,
                    _ => unreachable!(),
                };
                buf.reg_rm(w, &[0x81], sub_opc, dst.index, None, None);
                buf.i32(imm);
            } else {
                let src = resolve(inst.ins()[1], alloc)?;
                buf.reg_rm(w, &[opc], src.index, dst.index, None, None);
            }
        }
        Opcode::Imul => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let src = resolve(inst.ins()[1], alloc)?;
            buf.reg_rm(w, &[0x0F, 0xAF], dst.index, src.index, None, None);
        }
        Opcode::Idiv => {
            let divisor = resolve(*inst.operands.last().unwrap(), alloc)?;
            buf.reg_rm(w, &[0xF7], 0x07, divisor.index, None, None);
        }
        Opcode::Not => {
            let dst = resolve(inst.outs()[0], alloc)?;
            buf.reg_rm(w, &[0xF7], 0x02, dst.index, None, None);
        }
        Opcode::Neg => {
            let dst = resolve(inst.outs()[0], alloc)?;
            buf.reg_rm(w, &[0xF7], 0x03, dst.index, None, None);
        }
        Opcode::Cmp => {
            let a = resolve(inst.ins()[0], alloc)?;
            let b = resolve(inst.ins()[1], alloc)?;
            buf.reg_rm(w, &[0x39], b.index, a.index, None, None);
        }
        Opcode::Test => {
            let a = resolve(inst.ins()[0], alloc)?;
            let b = resolve(inst.ins()[1], alloc)?;
            let byte_w = matches!(inst.data_type, DataType::Byte);
            buf.reg_rm(w && !byte_w, &[if byte_w { 0x84 } else { 0x85 }], b.index, a.index, None, None);
        }
        Opcode::Movsxd => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let src = resolve(inst.ins()[0], alloc)?;
            buf.reg_rm(true, &[0x63], dst.index, src.index, None, None);
        }
        Opcode::Movzxb => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let src = resolve(inst.ins()[0], alloc)?;
            buf.reg_rm(w, &[0x0F, 0xB6], dst.index, src.index, None, None);
        }
        Opcode::Movsxb => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let src = resolve(inst.ins()[0], alloc)?;
            buf.reg_rm(w, &[0x0F, 0xBE], dst.index, src.index, None, None);
        }
        Opcode::Setcc(cc) => {
            let dst = resolve(inst.outs()[0], alloc)?;
            buf.reg_rm(false, &[0x0F, 0x90 + cc.encoding()], 0, dst.index, None, None);
        }
        Opcode::Jcc(cc) => {
            buf.u8(0x0F);
            buf.u8(0x80 + cc.encoding());
            if let Payload::Block(label) = inst.payload {
                branch_patches.push((buf.pos(), label));
            }
            buf.i32(0);
        }
        Opcode::Jmp => {
            buf.u8(0xE9);
            if let Payload::Block(label) = inst.payload {
                branch_patches.push((buf.pos(), label));
            }
            buf.i32(0);
        }
        Opcode::Call => {
            buf.u8(0xE8);
            if let Payload::Call(name) = &inst.payload {
                buf.relocations.push(Relocation { offset: buf.pos(), kind: RelocKind::Pc32, target: RelocTarget::Call(name.clone()) });
            }
            buf.i32(0);
        }
        Opcode::Push => {
            let r = resolve(inst.ins()[0], alloc)?;
            if r.index >= 8 {
                buf.u8(0x41);
            }
            buf.u8(0x50 + (r.index & 7));
        }
        Opcode::Pop => {
            let r = resolve(inst.outs()[0], alloc)?;
            if r.index >= 8 {
                buf.u8(0x41);
            }
            buf.u8(0x58 + (r.index & 7));
        }
        Opcode::Ret => {
            buf.u8(0xC3);
        }
        Opcode::FpMov => {
            if let Payload::FloatConst(idx) = inst.payload {
                let dst = resolve(inst.outs()[0], alloc)?;
                buf.u8(sse_prefix(inst.data_type));
                if needs_rex(false, dst.index, 0) {
                    buf.u8(rex(false, dst.index, 0));
                }
                buf.bytes.extend_from_slice(&[0x0F, 0x10]);
                buf.u8(modrm(0b00, dst.index, 0b101)); // RIP-relative
                buf.relocations.push(Relocation { offset: buf.pos(), kind: RelocKind::Pc32, target: RelocTarget::FloatConst(idx) });
                buf.i32(0);
            } else {
                emit_sse(buf, 0x10, 0x11, inst, alloc)?
            }
        }
        Opcode::FpAdd => emit_sse_arith(buf, 0x58, inst, alloc)?,
        Opcode::FpSub => emit_sse_arith(buf, 0x5C, inst, alloc)?,
        Opcode::FpMul => emit_sse_arith(buf, 0x59, inst, alloc)?,
        Opcode::FpDiv => emit_sse_arith(buf, 0x5E, inst, alloc)?,
        Opcode::FpUcomi => {
            let a = resolve(inst.ins()[0], alloc)?;
            let b = resolve(inst.ins()[1], alloc)?;
            buf.u8(sse_prefix(inst.data_type));
            buf.reg_rm(false, &[0x0F, 0x2E], a.index, b.index, None, None);
        }
        Opcode::FpCvtSi2sd => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let src = resolve(inst.ins()[0], alloc)?;
            buf.u8(if matches!(inst.data_type, DataType::Sse64) { 0xF2 } else { 0xF3 });
            buf.reg_rm(true, &[0x0F, 0x2A], dst.index, src.index, None, None);
        }
        Opcode::FpCvtSd2si => {
            let dst = resolve(inst.outs()[0], alloc)?;
            let src = resolve(inst.ins()[0], alloc)?;
            buf.u8(if matches!(inst.data_type, DataType::Sse64) { 0xF2 } else { 0xF3 });
            buf.reg_rm(true, &[0x0F, 0x2C], dst.index, src.index, None, None);
        }
    }
    Ok(())
}

fn sse_prefix(dt: DataType) -> u8 {
    if matches!(dt, DataType::Sse64) {
        0xF2
    } else {
        0xF3
    }
}

fn emit_sse(buf: &mut Buf, load_op: u8, store_op: u8, inst: &Instruction, alloc: &Allocation) -> Result<()> {
    buf.u8(sse_prefix(inst.data_type));
    if inst.flags.contains(crate::isa::InstFlags::MEM) {
        let base = mem_base(inst, alloc)?;
        if inst.out_count == 0 {
            let src = resolve(inst.ins().last().copied().unwrap(), alloc)?;
            buf.reg_rm(false, &[0x0F, store_op], src.index, base.index, Some(inst.disp), None);
        } else {
            let dst = resolve(inst.outs()[0], alloc)?;
            buf.reg_rm(false, &[0x0F, load_op], dst.index, base.index, Some(inst.disp), None);
        }
    } else {
        let dst = resolve(inst.outs()[0], alloc)?;
        let src = resolve(inst.ins()[0], alloc)?;
        buf.reg_rm(false, &[0x0F, load_op], dst.index, src.index, None, None);
    }
    Ok(())
}

fn emit_sse_arith(buf: &mut Buf, op: u8, inst: &Instruction, alloc: &Allocation) -> Result<()> {
    let dst = resolve(inst.outs()[0], alloc)?;
    let src = resolve(inst.ins()[1], alloc)?;
    buf.u8(sse_prefix(inst.data_type));
    buf.reg_rm(false, &[0x0F, op], dst.index, src.index, None, None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{DataType as DT, Opcode as Op, RAX, RCX};
    use crate::regalloc::Location as Loc;
    use crate::select::{BlockLabel, MachBlock};
    use std::collections::HashMap as Map;

    fn trivial_alloc() -> Allocation {
        Allocation { location: Map::new(), frame_size: 0, used_callee_saved: Vec::new() }
    }

    #[test]
    fn ret_only_function_emits_a_single_byte() {
        let program = Program {
            name: "f".into(),
            blocks: vec![MachBlock { label: BlockLabel(0), insts: vec![Instruction::new(Op::Ret, DT::Qword)] }],
            vreg_count: 0,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        };
        let compiled = emit(&program, &trivial_alloc()).unwrap();
        assert_eq!(compiled.code, vec![0xC3]);
    }

    #[test]
    fn add_between_fixed_registers_encodes_rex_and_modrm() {
        let mut add = Instruction::new(Op::Add, DT::Qword);
        add.out_count = 1;
        add.in_count = 1;
        add.operands = vec![VReg(0), VReg(1)]; // rax += rcx
        let program = Program {
            name: "f".into(),
            blocks: vec![MachBlock {
                label: BlockLabel(0),
                insts: vec![add, Instruction::new(Op::Ret, DT::Qword)],
            }],
            vreg_count: 2,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        };
        let compiled = emit(&program, &trivial_alloc()).unwrap();
        assert_eq!(&compiled.code[..3], &[0x48, 0x01, 0xC8]);
        let _ = (RAX, RCX);
        let _ = Loc::Reg(RAX);
    }
}
