//! Intel-style textual assembly printer, run alongside encoding so the
//! driver can emit textual assembly and object bytes in parallel, used by
//! `--emit-asm` for debugging.
//!
//! Walks the same allocated instruction list `emit::emit` encodes, but
//! formats operands as Intel mnemonics (`mov`, `add`, explicit size
//! qualifiers) instead of bytes. Kept as a separate pass over [`Program`]
//! rather than threaded through `emit::emit` itself, since the two
//! representations share nothing but the operand-resolution logic
//! (`emit::resolve`/`emit::mem_base`).

use crate::emit::{align_up, mem_base, resolve};
use crate::isa::{CondCode, DataType, Instruction, Opcode, Payload, PhysReg, RegClass, RBP};
use crate::regalloc::Allocation;
use crate::select::{BlockLabel, Program};
use sigma_error::{Error, Result};
use std::fmt::Write as _;

const GPR_NAMES: [&str; 16] =
    ["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"];

fn reg_name(r: PhysReg, dt: DataType) -> String {
    if r.class == RegClass::Xmm {
        return format!("xmm{}", r.index);
    }
    let full = GPR_NAMES[r.index as usize];
    match dt {
        DataType::Qword | DataType::Ptr => full.to_string(),
        DataType::Dword => {
            if r.index < 8 && r.index >= 4 {
                format!("e{}", &full[1..])
            } else if r.index >= 8 {
                format!("r{}d", r.index)
            } else {
                format!("e{}", &full[1..])
            }
        }
        DataType::Word => {
            if r.index >= 8 {
                format!("r{}w", r.index)
            } else {
                full[1..].to_string()
            }
        }
        DataType::Byte => {
            if r.index >= 8 {
                format!("r{}b", r.index)
            } else {
                match r.index {
                    0 => "al".into(),
                    1 => "cl".into(),
                    2 => "dl".into(),
                    3 => "bl".into(),
                    4 => "spl".into(),
                    5 => "bpl".into(),
                    6 => "sil".into(),
                    7 => "dil".into(),
                    _ => unreachable!(),
                }
            }
        }
        DataType::Sse32 | DataType::Sse64 => format!("xmm{}", r.index),
    }
}

fn mem_operand(base: PhysReg, disp: i32, dt: DataType) -> String {
    let sign = if disp < 0 { "-" } else { "+" };
    format!("{} [{}{}{}]", dt.mnemonic_suffix(), reg_name(base, DataType::Qword), sign, disp.unsigned_abs())
}

/// Render one function's allocated instruction stream as Intel-style
/// assembly text. Labels follow an `L<n>` convention for interior blocks;
/// there is no shared `.ret` label here since `select_return`
/// inlines the epilogue at every return site rather than jumping to one
/// (see `emit.rs`'s module doc).
pub fn emit_asm(program: &Program, alloc: &Allocation) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "{}:", program.name);
    let stack_usage = align_up(alloc.frame_size.max(program.outgoing_arg_bytes), 16);
    if stack_usage >= 4096 {
        return Err(Error::not_implemented(format!(
            "stack frame of {stack_usage} bytes in '{}' (needs a __chkstk probe)",
            program.name
        )));
    }

    for block in &program.blocks {
        let _ = writeln!(out, "{}:", block_label(block.label));
        for inst in &block.insts {
            match inst.op {
                Opcode::Prologue => {
                    for line in render_prologue(stack_usage, &alloc.used_callee_saved) {
                        let _ = writeln!(out, "    {line}");
                    }
                }
                Opcode::Epilogue => {
                    for line in render_epilogue(stack_usage, &alloc.used_callee_saved) {
                        let _ = writeln!(out, "    {line}");
                    }
                }
                _ => {
                    if let Some(line) = render_instruction(inst, alloc)? {
                        let _ = writeln!(out, "    {line}");
                    }
                }
            }
        }
    }
    Ok(out)
}

fn block_label(label: BlockLabel) -> String {
    format!("L{}", label.0)
}

/// Mirrors `emit::emit_prologue`'s byte sequence as text: `push rbp`,
/// `mov rbp, rsp`, one `push` per callee-saved register, then the frame
/// allocation. Empty when the frame is trivial, matching the same
/// early-return `emit_prologue` takes.
fn render_prologue(stack_usage: u32, callee_saved: &[PhysReg]) -> Vec<String> {
    if stack_usage <= 16 && callee_saved.is_empty() {
        return Vec::new();
    }
    let mut lines = vec!["push rbp".to_string(), "mov rbp, rsp".to_string()];
    for &r in callee_saved {
        lines.push(format!("push {}", reg_name(r, DataType::Qword)));
    }
    lines.push(format!("sub rsp, {stack_usage}"));
    lines
}

/// Mirrors `emit::emit_epilogue`'s byte sequence as text, in reverse of
/// `render_prologue`: deallocate the frame, restore callee-saved registers
/// in reverse push order, then `pop rbp`.
fn render_epilogue(stack_usage: u32, callee_saved: &[PhysReg]) -> Vec<String> {
    if stack_usage <= 16 && callee_saved.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("add rsp, {stack_usage}")];
    for &r in callee_saved.iter().rev() {
        lines.push(format!("pop {}", reg_name(r, DataType::Qword)));
    }
    lines.push("pop rbp".to_string());
    lines
}

fn render_instruction(inst: &Instruction, alloc: &Allocation) -> Result<Option<String>> {
    let dt = inst.data_type;
    let line = match inst.op {
        Opcode::Label | Opcode::Prologue | Opcode::Epilogue => return Ok(None),
        Opcode::Mov | Opcode::FpMov => {
            let mnemonic = if matches!(inst.op, Opcode::FpMov) { "movsd_or_movss" } else { "mov" };
            let mnemonic = if matches!(inst.op, Opcode::FpMov) {
                if matches!(dt, DataType::Sse64) { "movsd" } else { "movss" }
            } else {
                mnemonic
            };
            render_mov_like(mnemonic, inst, alloc, dt)?
        }
        Opcode::Movabs => format!("movabs {}, {}", dst_name(inst, alloc, DataType::Qword)?, payload_u64(inst)),
        Opcode::Zero => format!("xor {0}, {0}", dst_name(inst, alloc, dt)?),
        Opcode::Lea => render_lea(inst, alloc)?,
        Opcode::Add => render_binop("add", inst, alloc, dt)?,
        Opcode::Sub => render_binop("sub", inst, alloc, dt)?,
        Opcode::And => render_binop("and", inst, alloc, dt)?,
        Opcode::Or => render_binop("or", inst, alloc, dt)?,
        Opcode::Xor => render_binop("xor", inst, alloc, dt)?,
        Opcode::Imul => {
            format!(
                "imul {}, {}",
                dst_name(inst, alloc, dt)?,
                reg_name(resolve(inst.ins()[1], alloc)?, dt)
            )
        }
        Opcode::Idiv => format!("idiv {}", reg_name(resolve(*inst.operands.last().unwrap(), alloc)?, dt)),
        Opcode::Not => format!("not {}", dst_name(inst, alloc, dt)?),
        Opcode::Neg => format!("neg {}", dst_name(inst, alloc, dt)?),
        Opcode::Cmp => format!(
            "cmp {}, {}",
            reg_name(resolve(inst.ins()[0], alloc)?, dt),
            reg_name(resolve(inst.ins()[1], alloc)?, dt)
        ),
        Opcode::Test => format!(
            "test {}, {}",
            reg_name(resolve(inst.ins()[0], alloc)?, dt),
            reg_name(resolve(inst.ins()[1], alloc)?, dt)
        ),
        Opcode::Movsxd => format!(
            "movsxd {}, {}",
            reg_name(resolve(inst.outs()[0], alloc)?, DataType::Qword),
            reg_name(resolve(inst.ins()[0], alloc)?, DataType::Dword)
        ),
        Opcode::Movzxb => format!(
            "movzx {}, {}",
            dst_name(inst, alloc, dt)?,
            reg_name(resolve(inst.ins()[0], alloc)?, DataType::Byte)
        ),
        Opcode::Movsxb => format!(
            "movsx {}, {}",
            dst_name(inst, alloc, dt)?,
            reg_name(resolve(inst.ins()[0], alloc)?, DataType::Byte)
        ),
        Opcode::Setcc(cc) => format!("set{} {}", cc.mnemonic(), reg_name(resolve(inst.outs()[0], alloc)?, DataType::Byte)),
        Opcode::Jcc(cc) => format!("j{} {}", cc.mnemonic(), branch_target(inst)),
        Opcode::Jmp => format!("jmp {}", branch_target(inst)),
        Opcode::Call => format!("call {}", call_target(inst)),
        Opcode::Push => format!("push {}", reg_name(resolve(inst.ins()[0], alloc)?, DataType::Qword)),
        Opcode::Pop => format!("pop {}", reg_name(resolve(inst.outs()[0], alloc)?, DataType::Qword)),
        Opcode::Ret => "ret".to_string(),
        Opcode::FpAdd => render_sse_arith("addsd", "addss", inst, alloc, dt)?,
        Opcode::FpSub => render_sse_arith("subsd", "subss", inst, alloc, dt)?,
        Opcode::FpMul => render_sse_arith("mulsd", "mulss", inst, alloc, dt)?,
        Opcode::FpDiv => render_sse_arith("divsd", "divss", inst, alloc, dt)?,
        Opcode::FpUcomi => {
            let mnemonic = if matches!(dt, DataType::Sse64) { "ucomisd" } else { "ucomiss" };
            format!(
                "{mnemonic} {}, {}",
                reg_name(resolve(inst.ins()[0], alloc)?, dt),
                reg_name(resolve(inst.ins()[1], alloc)?, dt)
            )
        }
        Opcode::FpCvtSi2sd => {
            let mnemonic = if matches!(dt, DataType::Sse64) { "cvtsi2sd" } else { "cvtsi2ss" };
            format!(
                "{mnemonic} {}, {}",
                reg_name(resolve(inst.outs()[0], alloc)?, dt),
                reg_name(resolve(inst.ins()[0], alloc)?, DataType::Qword)
            )
        }
        Opcode::FpCvtSd2si => {
            let mnemonic = if matches!(dt, DataType::Sse64) { "cvtsd2si" } else { "cvtss2si" };
            format!(
                "{mnemonic} {}, {}",
                reg_name(resolve(inst.outs()[0], alloc)?, DataType::Qword),
                reg_name(resolve(inst.ins()[0], alloc)?, dt)
            )
        }
    };
    Ok(Some(line))
}

fn dst_name(inst: &Instruction, alloc: &Allocation, dt: DataType) -> Result<String> {
    Ok(reg_name(resolve(inst.outs()[0], alloc)?, dt))
}

fn payload_u64(inst: &Instruction) -> u64 {
    match inst.payload {
        Payload::Absolute(v) => v,
        _ => 0,
    }
}

fn render_mov_like(mnemonic: &str, inst: &Instruction, alloc: &Allocation, dt: DataType) -> Result<String> {
    if inst.flags.contains(crate::isa::InstFlags::MEM) {
        let base = mem_base(inst, alloc)?;
        let mem = mem_operand(base, inst.disp, dt);
        if inst.out_count == 0 {
            let src = resolve(inst.ins().last().copied().unwrap(), alloc)?;
            Ok(format!("{mnemonic} {mem}, {}", reg_name(src, dt)))
        } else {
            let dst = resolve(inst.outs()[0], alloc)?;
            Ok(format!("{mnemonic} {}, {mem}", reg_name(dst, dt)))
        }
    } else if let Payload::Immediate(imm) = inst.payload {
        Ok(format!("{mnemonic} {}, {imm}", dst_name(inst, alloc, dt)?))
    } else {
        let dst = resolve(inst.outs()[0], alloc)?;
        let src = resolve(inst.ins()[0], alloc)?;
        Ok(format!("{mnemonic} {}, {}", reg_name(dst, dt), reg_name(src, dt)))
    }
}

fn render_binop(mnemonic: &str, inst: &Instruction, alloc: &Allocation, dt: DataType) -> Result<String> {
    let dst = dst_name(inst, alloc, dt)?;
    if let Payload::Immediate(imm) = inst.payload {
        Ok(format!("{mnemonic} {dst}, {imm}"))
    } else {
        let src = resolve(inst.ins()[1], alloc)?;
        Ok(format!("{mnemonic} {dst}, {}", reg_name(src, dt)))
    }
}

fn render_sse_arith(f64_mnemonic: &str, f32_mnemonic: &str, inst: &Instruction, alloc: &Allocation, dt: DataType) -> Result<String> {
    let mnemonic = if matches!(dt, DataType::Sse64) { f64_mnemonic } else { f32_mnemonic };
    let dst = resolve(inst.outs()[0], alloc)?;
    let src = resolve(inst.ins()[1], alloc)?;
    Ok(format!("{mnemonic} {}, {}", reg_name(dst, dt), reg_name(src, dt)))
}

fn render_lea(inst: &Instruction, alloc: &Allocation) -> Result<String> {
    let dst = resolve(inst.outs()[0], alloc)?;
    match &inst.payload {
        Payload::StringConst(idx) => Ok(format!("lea {}, [rel str{idx}]", reg_name(dst, DataType::Qword))),
        Payload::FloatConst(idx) => Ok(format!("lea {}, [rel flt{idx}]", reg_name(dst, DataType::Qword))),
        _ => {
            let base = if inst.ins().is_empty() { RBP } else { resolve(inst.ins()[0], alloc)? };
            Ok(format!("lea {}, {}", reg_name(dst, DataType::Qword), mem_operand(base, inst.disp, DataType::Qword)))
        }
    }
}

fn branch_target(inst: &Instruction) -> String {
    match inst.payload {
        Payload::Block(label) => block_label(label),
        _ => "?".to_string(),
    }
}

fn call_target(inst: &Instruction) -> String {
    match &inst.payload {
        Payload::Call(name) => name.clone(),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{DataType as DT, Opcode as Op, VReg};
    use crate::regalloc::Allocation;
    use crate::select::MachBlock;
    use std::collections::HashMap;

    #[test]
    fn ret_only_function_prints_its_label_and_ret() {
        let program = Program {
            name: "f".into(),
            blocks: vec![MachBlock { label: BlockLabel(0), insts: vec![Instruction::new(Op::Ret, DT::Qword)] }],
            vreg_count: 0,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        };
        let alloc = Allocation { location: HashMap::new(), frame_size: 0, used_callee_saved: Vec::new() };
        let text = emit_asm(&program, &alloc).unwrap();
        assert!(text.contains("f:"));
        assert!(text.contains("L0:"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn add_between_fixed_registers_prints_register_names() {
        let mut add = Instruction::new(Op::Add, DT::Qword);
        add.out_count = 1;
        add.in_count = 1;
        add.operands = vec![VReg(0), VReg(1)];
        let program = Program {
            name: "f".into(),
            blocks: vec![MachBlock { label: BlockLabel(0), insts: vec![add, Instruction::new(Op::Ret, DT::Qword)] }],
            vreg_count: 2,
            frame_size: 0,
            outgoing_arg_bytes: 32,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        };
        let alloc = Allocation { location: HashMap::new(), frame_size: 0, used_callee_saved: Vec::new() };
        let text = emit_asm(&program, &alloc).unwrap();
        assert!(text.contains("add rax, rcx"));
    }
}
