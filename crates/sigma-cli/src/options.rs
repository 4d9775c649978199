//! Shared CLI options for the Sigma compiler driver.

use clap::{Args, ValueEnum};

/// What the driver writes at the end of a successful compile.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitKind {
    /// Run the full pipeline and report diagnostics, but write nothing.
    None,
    /// Write a COFF or ELF object file (platform-dependent, `--format` picks
    /// the container explicitly).
    #[default]
    Object,
    /// Link the object into an executable by shelling out to `cc` on `PATH`
    /// rather than reimplementing a linker driver — the emitted object links
    /// cleanly with any system linker, so this crate just delegates to one.
    Executable,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectFormatArg {
    #[default]
    Coff,
    Elf,
}

impl From<ObjectFormatArg> for sigma_backend::ObjectFormat {
    fn from(value: ObjectFormatArg) -> Self {
        match value {
            ObjectFormatArg::Coff => sigma_backend::ObjectFormat::Coff,
            ObjectFormatArg::Elf => sigma_backend::ObjectFormat::Elf,
        }
    }
}

/// Compile-time knobs shared between the `compile` subcommand and the
/// integration tests that drive `pipeline::compile` directly.
#[derive(Args, Debug, Clone, Default)]
pub struct CompileOptions {
    /// What artifact to produce.
    #[arg(long, value_enum, default_value_t = EmitKind::Object)]
    pub emit: EmitKind,

    /// Object container format. Defaults to the host's native format via
    /// `cfg(target_os)`, overridable for cross-targeting object emission.
    #[arg(long, value_enum)]
    pub format: Option<ObjectFormatArg>,

    /// Optimization level 0-3. Currently only distinguishes "optimizations
    /// off" from "on" — real optimization passes are out of scope.
    #[arg(long = "optimize", value_name = "N", default_value = "0")]
    pub optimize: u8,

    /// Size-optimization level 0-2, independent of `--optimize`.
    #[arg(long = "size-optimize", value_name = "N", default_value = "0")]
    pub size_optimize: u8,

    /// Write the Intel-style textual assembly of every function to this
    /// path alongside the object file.
    #[arg(long = "emit-asm", value_name = "PATH")]
    pub emit_asm: Option<String>,
}

impl CompileOptions {
    pub fn object_format(&self) -> sigma_backend::ObjectFormat {
        match self.format {
            Some(f) => f.into(),
            None if cfg!(target_os = "windows") => sigma_backend::ObjectFormat::Coff,
            None => sigma_backend::ObjectFormat::Elf,
        }
    }
}
