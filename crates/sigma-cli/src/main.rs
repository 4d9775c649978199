use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(target_env = "msvc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use sigma_cli::{CompileOptions, EmitKind};

/// Sigma whole-program ahead-of-time compiler.
#[derive(Parser, Debug)]
#[command(name = "sigmac", version, about = "Compile a Sigma source file to an object or executable")]
pub struct Cli {
    /// Source file to compile — a single `.s` file. Sigma compiles one
    /// translation unit at a time; there's no separate-compilation or
    /// multi-unit linking surface here.
    source: PathBuf,

    #[command(flatten)]
    compile: CompileOptions,

    /// Write the object (or executable) to this path instead of deriving
    /// one from the source file name.
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,
}

fn default_output_path(source: &Path, opts: &CompileOptions) -> PathBuf {
    let stem = source.file_stem().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("out"));
    match opts.emit {
        EmitKind::Executable => stem,
        EmitKind::Object | EmitKind::None => {
            let ext = match opts.object_format() {
                sigma_backend::ObjectFormat::Coff => "obj",
                sigma_backend::ObjectFormat::Elf => "o",
            };
            stem.with_extension(ext)
        }
    }
}

pub fn run(args: Cli) -> Result<bool> {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    let total_start = Instant::now();
    let source_text = std::fs::read_to_string(&args.source)
        .with_context(|| format!("reading {}", args.source.display()))?;
    let file_name = args.source.display().to_string();

    let output = sigma_cli::compile(&args.compile, &file_name, &source_text);
    tracing::info!("total: {:.2}s", total_start.elapsed().as_secs_f64());

    let output = match output {
        Ok(output) => output,
        Err(err) => {
            // The pipeline already rendered individual diagnostics to
            // stderr; this is the summary line.
            eprintln!("{file_name}: compilation failed: {err}");
            return Ok(false);
        }
    };

    if let Some(path) = &args.compile.emit_asm {
        std::fs::write(path, &output.asm).with_context(|| format!("writing {path}"))?;
    }

    match args.compile.emit {
        EmitKind::None => {}
        EmitKind::Object => {
            let out_path = args.output.clone().unwrap_or_else(|| default_output_path(&args.source, &args.compile));
            std::fs::write(&out_path, &output.object).with_context(|| format!("writing {}", out_path.display()))?;
        }
        EmitKind::Executable => {
            let obj_path = std::env::temp_dir().join(format!(
                "sigmac-{}.{}",
                std::process::id(),
                match args.compile.object_format() {
                    sigma_backend::ObjectFormat::Coff => "obj",
                    sigma_backend::ObjectFormat::Elf => "o",
                }
            ));
            std::fs::write(&obj_path, &output.object)?;
            let out_path = args.output.clone().unwrap_or_else(|| default_output_path(&args.source, &args.compile));
            let status = std::process::Command::new("cc")
                .arg(&obj_path)
                .arg("-o")
                .arg(&out_path)
                .status()
                .context("invoking cc to link the object into an executable")?;
            let _ = std::fs::remove_file(&obj_path);
            if !status.success() {
                eprintln!("{file_name}: link failed (cc exited with {status})");
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Exit code 0 on success, 1 if any diagnostic was at error severity.
fn main() -> ExitCode {
    let args = Cli::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
