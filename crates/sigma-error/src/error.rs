//! The main diagnostic type for the Sigma compiler.

use crate::{ErrorKind, Severity, SourceSpan};
use std::fmt;

/// Unified diagnostic type for every fallible entry point in the core.
///
/// A context-chaining design: a `kind` that is matched on for control flow,
/// a free-form `message`, an `operation` trail, and a bag of `(key, value)`
/// context pairs appended as the error propagates up through pipeline
/// stages.
pub struct Error {
    kind: ErrorKind,
    message: String,
    severity: Severity,
    operation: &'static str,
    span: Option<SourceSpan>,
    context: Vec<(&'static str, String)>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let severity = if kind.is_warning() {
            Severity::Warning
        } else {
            Severity::Error
        };

        Self {
            kind,
            message: message.into(),
            severity,
            operation: "",
            span: None,
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Stable decimal diagnostic code, e.g. `4009`.
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    pub fn span(&self) -> Option<&SourceSpan> {
        self.span.as_ref()
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    pub fn source_ref(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_ref().map(|e| e.as_ref())
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Anchor this diagnostic at a source range (`{file, start, end}`).
    pub fn at(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    /// Set the operation that raised this error. If one was already set, it
    /// is preserved in context as `"called"` so the call chain survives.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// # Panics (debug only)
    /// Panics in debug mode if a source error was already set.
    pub fn set_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity.is_fatal()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} C{:04}: {}",
            self.severity,
            self.code(),
            self.message
        )?;

        if let Some(span) = &self.span {
            write!(f, " at {}", span)?;
        }

        if !self.context.is_empty() {
            write!(f, " {{ ")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, " }}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} C{:04} ({}) at {}", self.severity, self.code(), self.kind, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f, "    {}", self.message)?;
        }

        if let Some(span) = &self.span {
            writeln!(f, "    span: {}", span)?;
        }

        if !self.context.is_empty() {
            writeln!(f, "    context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f, "    source: {:?}", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            _ => ErrorKind::CannotReadFile,
        };
        Error::new(kind, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorKind::FileNotFound, format!("file '{}' not found", path))
            .with_context("path", path)
    }

    pub fn unknown_variable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownVariable, format!("unknown variable '{}'", name))
            .with_context("name", name)
    }

    pub fn unknown_function(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownFunction, format!("unknown function '{}'", name))
            .with_context("name", name)
    }

    pub fn unknown_namespace(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownNamespace, format!("unknown namespace '{}'", name))
            .with_context("name", name)
    }

    pub fn unknown_type(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownTypeName, format!("unknown type '{}'", name))
            .with_context("name", name)
    }

    pub fn no_call_overload(name: impl Into<String>, candidates: impl Into<String>) -> Self {
        let name = name.into();
        let candidates = candidates.into();
        Self::new(
            ErrorKind::NoCallOverload,
            format!("no overload of '{}' matches the call", name),
        )
        .with_context("name", name)
        .with_context("candidates", candidates)
    }

    pub fn invalid_cast(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self::new(ErrorKind::InvalidCast, format!("cannot cast '{}' to '{}'", from, to))
            .with_context("from", from)
            .with_context("to", to)
    }

    pub fn not_all_control_paths_return(function: impl Into<String>) -> Self {
        let function = function.into();
        Self::new(
            ErrorKind::NotAllControlPathsReturn,
            format!("not all control paths of '{}' return a value", function),
        )
        .with_context("function", function)
    }

    pub fn duplicate_declaration(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorKind::DuplicateDeclaration,
            format!("'{}' is already declared in this namespace", name),
        )
        .with_context("name", name)
    }

    pub fn invalid_void_use(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidVoidUse, format!("invalid use of void {}", context.into()))
    }

    pub fn literal_overflow(literal: impl Into<String>, target: impl Into<String>) -> Self {
        let literal = literal.into();
        let target = target.into();
        Self::new(
            ErrorKind::LiteralOverflow,
            format!("literal '{}' overflows '{}'", literal, target),
        )
        .with_context("literal", literal)
        .with_context("target", target)
    }

    pub fn numerical_bool(literal: impl Into<String>) -> Self {
        let literal = literal.into();
        Self::new(
            ErrorKind::NumericalBool,
            format!("numeric literal '{}' used where 'bool' is expected", literal),
        )
        .with_context("literal", literal)
    }

    pub fn numerical_char(literal: impl Into<String>) -> Self {
        let literal = literal.into();
        Self::new(
            ErrorKind::NumericalChar,
            format!("numeric literal '{}' used where 'char' is expected", literal),
        )
        .with_context("literal", literal)
    }

    pub fn implicit_truncation_cast(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self::new(
            ErrorKind::ImplicitTruncationCast,
            format!("implicit narrowing cast from '{}' to '{}'", from, to),
        )
        .with_context("from", from)
        .with_context("to", to)
    }

    pub fn implicit_extension_cast(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self::new(
            ErrorKind::ImplicitExtensionCast,
            format!("implicit widening cast from '{}' to '{}'", from, to),
        )
        .with_context("from", from)
        .with_context("to", to)
    }

    pub fn implicit_cast(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self::new(ErrorKind::ImplicitCast, format!("implicit cast from '{}' to '{}'", from, to))
            .with_context("from", from)
            .with_context("to", to)
    }

    pub fn codegen_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CodegenInvariant, message)
    }

    pub fn object_emit_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ObjectEmitFailed, message)
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        let feature = feature.into();
        Self::new(ErrorKind::NotImplemented, format!("'{}' is not implemented", feature))
            .with_context("feature", feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    #[test]
    fn creation_and_code() {
        let err = Error::unknown_variable("x");
        assert_eq!(err.kind(), ErrorKind::UnknownVariable);
        assert_eq!(err.code(), 4001);
        assert!(err.is_fatal());
    }

    #[test]
    fn warning_kinds_are_not_fatal() {
        let err = Error::new(ErrorKind::ImplicitTruncationCast, "narrowing i64 to i32");
        assert_eq!(err.severity(), Severity::Warning);
        assert!(!err.is_fatal());
    }

    #[test]
    fn operation_chaining_preserves_call_trail() {
        let err = Error::unexpected("boom")
            .with_operation("checker::check_expr")
            .with_operation("translate::lower_function");

        assert_eq!(err.operation(), "translate::lower_function");
        assert_eq!(err.context()[0], ("called", "checker::check_expr".to_string()));
    }

    #[test]
    fn span_round_trips() {
        let span = SourceSpan::point("main.s", Position::new(4, 10));
        let err = Error::not_all_control_paths_return("main").at(span.clone());
        assert_eq!(err.span(), Some(&span));
        assert!(format!("{}", err).contains("main.s:4:10"));
    }

    #[test]
    fn display_contains_code_and_message() {
        let err = Error::duplicate_declaration("f");
        let s = format!("{}", err);
        assert!(s.contains("C4010"));
        assert!(s.contains("already declared"));
    }
}
