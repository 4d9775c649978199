//! # sigma-error
//!
//! Unified diagnostic handling for the Sigma compiler core.
//!
//! ## Design philosophy
//!
//! - **ErrorKind**: know what happened, and which decimal code it maps to.
//! - **Severity**: decide whether compilation continues (`Warning`) or aborts (`Error`).
//! - **Context**: a `(key, value)` trail assists in locating the cause.
//! - **SourceSpan**: anchors a diagnostic to a source range for caret rendering.
//!
//! ## Usage
//!
//! ```rust
//! use sigma_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::UnknownVariable, "unknown variable 'x'")
//!         .with_operation("checker::check_expr")
//!         .with_context("function", "main"))
//! }
//! ```
//!
//! ## Principles
//!
//! - Every fallible entry point in `sigma-core`/`sigma-backend` returns `sigma_error::Result<T>`.
//! - External errors are wrapped with `.set_source(err)`, never leaked raw.
//! - The first error aborts the current function's pipeline; no partial artifact is written.

mod error;
mod kind;
mod phase;
mod severity;
mod span;

pub use error::Error;
pub use kind::ErrorKind;
pub use phase::Phase;
pub use severity::Severity;
pub use span::{render_diagnostic, Position, SourceSpan};

/// Result type alias used throughout the compiler core.
pub type Result<T> = std::result::Result<T, Error>;
