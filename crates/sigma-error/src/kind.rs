//! Diagnostic kinds produced by the Sigma compiler core.
//!
//! Each variant maps to a stable decimal code via [`ErrorKind::code`],
//! partitioned by compilation phase: filesystem (1000s), lexer (2000s),
//! parser (3000s), semantic/codegen (4000s), driver/linker (5000s).

use strum_macros::{Display, IntoStaticStr};

use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, Display)]
#[non_exhaustive]
pub enum ErrorKind {
    // Filesystem (1000s)
    FileNotFound,
    CannotReadFile,
    WrongExtension,

    // Lexer (2000s) — propagated from the external tokenizer, not originated here.
    MalformedToken,

    // Parser (3000s) — propagated from the external parser, not originated here.
    UnexpectedToken,

    // Semantic (4000s)
    UnknownVariable,
    UnknownFunction,
    UnknownNamespace,
    UnknownTypeName,
    NoCallOverload,
    AmbiguousCallOverload,
    InvalidCast,
    TypeMismatch,
    NotAllControlPathsReturn,
    DuplicateDeclaration,
    InvalidVoidUse,
    LiteralOverflow,
    NumericalBool,
    NumericalChar,
    ImplicitTruncationCast,
    ImplicitExtensionCast,
    ImplicitCast,

    // Codegen assertions — internal invariant violations, not user errors.
    CodegenInvariant,

    // Driver/linker (5000s)
    ObjectEmitFailed,
    LinkFailed,

    // General — catch-all, never anchored to a phase-specific code.
    Unexpected,
    NotImplemented,
    InvalidArgument,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    /// The phase this kind is partitioned under.
    pub fn phase(&self) -> Phase {
        use ErrorKind::*;
        match self {
            FileNotFound | CannotReadFile | WrongExtension => Phase::Filesystem,
            MalformedToken => Phase::Lexer,
            UnexpectedToken => Phase::Parser,
            UnknownVariable
            | UnknownFunction
            | UnknownNamespace
            | UnknownTypeName
            | NoCallOverload
            | AmbiguousCallOverload
            | InvalidCast
            | TypeMismatch
            | NotAllControlPathsReturn
            | DuplicateDeclaration
            | InvalidVoidUse
            | LiteralOverflow
            | NumericalBool
            | NumericalChar
            | ImplicitTruncationCast
            | ImplicitExtensionCast
            | ImplicitCast
            | CodegenInvariant => Phase::Semantic,
            ObjectEmitFailed | LinkFailed => Phase::Driver,
            Unexpected | NotImplemented | InvalidArgument => Phase::Semantic,
        }
    }

    /// The offset within the phase's decimal block (e.g. 3 for the third
    /// semantic error kind declared). Stable for the lifetime of this enum
    /// because variants are never reordered, only appended.
    fn offset(&self) -> u32 {
        use ErrorKind::*;
        match self {
            FileNotFound => 1,
            CannotReadFile => 2,
            WrongExtension => 3,
            MalformedToken => 1,
            UnexpectedToken => 1,
            UnknownVariable => 1,
            UnknownFunction => 2,
            UnknownNamespace => 3,
            UnknownTypeName => 4,
            NoCallOverload => 5,
            AmbiguousCallOverload => 6,
            InvalidCast => 7,
            TypeMismatch => 8,
            NotAllControlPathsReturn => 9,
            DuplicateDeclaration => 10,
            InvalidVoidUse => 11,
            LiteralOverflow => 12,
            NumericalBool => 13,
            NumericalChar => 14,
            ImplicitTruncationCast => 15,
            ImplicitExtensionCast => 16,
            ImplicitCast => 17,
            CodegenInvariant => 90,
            ObjectEmitFailed => 1,
            LinkFailed => 2,
            Unexpected => 99,
            NotImplemented => 98,
            InvalidArgument => 97,
        }
    }

    /// Stable decimal diagnostic code, e.g. `4009` for
    /// `NotAllControlPathsReturn`. Rendered as `Cxxxx` in diagnostic output.
    pub fn code(&self) -> u32 {
        self.phase().base() + self.offset()
    }

    /// Warnings never abort compilation; everything else is a hard error
    /// that terminates the enclosing function's pipeline.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ErrorKind::ImplicitTruncationCast
                | ErrorKind::ImplicitExtensionCast
                | ErrorKind::ImplicitCast
                | ErrorKind::NumericalBool
                | ErrorKind::NumericalChar
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_partitioning() {
        assert_eq!(ErrorKind::FileNotFound.code(), 1001);
        assert_eq!(ErrorKind::UnexpectedToken.code(), 3001);
        assert_eq!(ErrorKind::NotAllControlPathsReturn.code(), 4009);
        assert_eq!(ErrorKind::ObjectEmitFailed.code(), 5001);
    }

    #[test]
    fn warnings_do_not_abort() {
        assert!(ErrorKind::ImplicitCast.is_warning());
        assert!(!ErrorKind::NoCallOverload.is_warning());
    }
}
