//! Core compile pipeline: lex, parse, check, lower, schedule, codegen, link.
//!
//! One function that owns the whole compile-one-input lifecycle end to end
//! and returns a typed result rather than printing as it goes, walking a
//! fixed stage order: lex → parse → `Checker::declare_items` →
//! `check_function` per item → `lower_function` → `cfg::build` →
//! `scheduler::schedule` → `sigma_backend::compile_function` →
//! `sigma_backend::write_object`.

use std::time::Instant;

use tracing::info;

use sigma_core::{cfg, lower_function, scheduler, Checker, TranslationUnitContext};
use sigma_error::{render_diagnostic, Error, Result};

use crate::options::CompileOptions;
use crate::parser;
use crate::profile::profile_phase;

/// Everything a successful compile produced, ready for the CLI to write out.
#[derive(Debug)]
pub struct CompileOutput {
    pub object: Vec<u8>,
    pub asm: String,
}

/// Compile one source file's full text into an object and its textual
/// assembly. Every diagnostic collected along the way is rendered to
/// stderr, in order; if any of them is fatal, codegen never runs and that
/// diagnostic is returned as `Err`.
pub fn compile(opts: &CompileOptions, file: &str, source: &str) -> Result<CompileOutput> {
    let ctx = TranslationUnitContext::new(file);
    // `ctx` must outlive every `alloc_*` call, which borrow `&'tcx self`;
    // leaking it for the lifetime of this compile keeps the self-referential
    // arena pattern `context.rs` relies on without needing a scoped arena.
    let ctx: &'static TranslationUnitContext<'static> = Box::leak(Box::new(ctx));

    let parse_start = Instant::now();
    let items = profile_phase("parse", || parser::parse(ctx, file, source))?;
    info!("lex+parse: {:.2}s", parse_start.elapsed().as_secs_f64());

    let check_start = Instant::now();
    let mut checker = Checker::new(ctx);
    checker.declare_items(&items.functions, &items.structs);
    for &id in &items.functions {
        checker.check_function(id);
    }
    info!("type checking: {:.2}s", check_start.elapsed().as_secs_f64());

    let mut diagnostics = ctx.take_diagnostics();
    if !diagnostics.is_empty() {
        eprint!("{}", render_errors(&ctx.file_name, source, &diagnostics));
    }
    if let Some(i) = diagnostics.iter().position(|e| e.is_fatal()) {
        return Err(diagnostics.remove(i));
    }

    let codegen_start = Instant::now();
    let mut compiled = Vec::new();
    let mut asm = String::new();
    for &id in &items.functions {
        let sigma_core::AstRef::Function(func) = ctx.node(id) else {
            unreachable!("declare_items only ever registers Function ids in this list")
        };
        if func.is_extern {
            continue;
        }
        let symbol = func.symbol.get().expect("declare_items sets every function's symbol");
        let mangled_name = sigma_backend::name_of_callee(ctx, symbol);

        let graph = profile_phase("lower", || lower_function(ctx, id));
        let cfg = cfg::build(&graph);
        let sched = scheduler::schedule(&graph, &cfg);
        let (func_obj, func_asm) =
            profile_phase("codegen", || sigma_backend::compile_function(ctx, &graph, &cfg, &sched, mangled_name))?;
        asm.push_str(&func_asm);
        compiled.push(func_obj);
    }
    info!("codegen: {:.2}s", codegen_start.elapsed().as_secs_f64());

    let object = sigma_backend::write_object(&compiled, opts.object_format())?;
    Ok(CompileOutput { object, asm })
}

/// Render a batch of collected diagnostics to one block, in the order the
/// checker reported them. Stdout stays clean; this is written to stderr by
/// the caller.
pub fn render_errors(file: &str, source: &str, errors: &[Error]) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::new();
    for error in errors {
        let line_text = error.span().and_then(|s| lines.get((s.start.line as usize).saturating_sub(1)).copied());
        out.push_str(&render_diagnostic(
            file,
            error.code(),
            error.severity().as_str(),
            error.message(),
            error.span(),
            line_text,
        ));
    }
    out
}
