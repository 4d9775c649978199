//! Diagnostic severity: warnings never abort compilation, errors do.

use std::fmt;

/// Whether a diagnostic aborts its pipeline or is merely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Severity {
    /// Aborts the enclosing function's compilation; exit code 1.
    #[default]
    Error,

    /// Printed and compilation continues. Used for the implicit-cast
    /// family of diagnostics and similar advisories.
    Warning,
}

impl Severity {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Severity::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_error_is_fatal() {
        assert!(Severity::Error.is_fatal());
        assert!(!Severity::Warning.is_fatal());
    }
}
