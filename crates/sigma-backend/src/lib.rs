//! # sigma-backend
//!
//! x64 instruction selection, live-range analysis, linear-scan register
//! allocation, and COFF/ELF object emission for the Sigma compiler.
//!
//! `compile_function` chains selection, live-range analysis, register
//! allocation, and emission in that fixed order: selection consumes the
//! scheduled `sigma_core` IR, live-range analysis and register allocation
//! run over the selected instructions in place, and the emitter turns the
//! allocated instructions into bytes plus a relocation list that `objfile`
//! wraps in a platform container.

pub mod asm;
pub mod emit;
pub mod isa;
pub mod live;
pub mod objfile;
pub mod regalloc;
pub mod select;

use sigma_core::{Cfg, Graph, Schedule, Symbol, TranslationUnitContext};
use sigma_error::Result;

pub use asm::emit_asm;
pub use emit::{CompiledFunction, Relocation};
pub use objfile::{write_object, ObjectFormat};
pub use select::Program;

/// Derive a call target's link-time symbol name the same way the function
/// that defines it was named: `ordinal` is this symbol's position (by
/// declaration order, i.e. ascending `SymId`) among every `Function` symbol
/// sharing its interned name, mirroring `mangle::mangle`'s contract. This
/// lives in the backend rather than `sigma-core` because only call sites —
/// never declarations — need to recover another translation unit's mangled
/// name from a bare `SymId`.
pub fn name_of_callee(ctx: &TranslationUnitContext, symbol: &Symbol) -> String {
    let mut ordinal = 0usize;
    for candidate in ctx.arena.iter_symbol() {
        if candidate.id() == symbol.id() {
            break;
        }
        if candidate.name == symbol.name && candidate.kind() == sigma_core::SymKind::Function {
            ordinal += 1;
        }
    }
    let name = ctx.resolve(symbol.name).unwrap_or_default();
    if name == "main" {
        name
    } else {
        sigma_core::mangle(&name, ordinal)
    }
}

/// Run selection, live-range analysis, register allocation, and emission
/// for one already-scheduled function, plus the Intel-style textual
/// assembly of the same allocated instruction stream for `--emit-asm`.
pub fn compile_function(
    ctx: &TranslationUnitContext,
    graph: &Graph,
    cfg: &Cfg,
    sched: &Schedule,
    mangled_name: String,
) -> Result<(CompiledFunction, String)> {
    let mut program = select::select(ctx, graph, cfg, sched, mangled_name)?;
    let intervals = live::analyze(&mut program);
    let allocation = regalloc::allocate(&mut program, intervals)?;
    let asm = asm::emit_asm(&program, &allocation)?;
    let compiled = emit::emit(&program, &allocation)?;
    Ok((compiled, asm))
}
