//! The string table: the sole owner of identifier and literal bytes.
//!
//! AST and IR nodes carry only an opaque [`InternedStr`] key; comparing two
//! keys is therefore constant-time integer equality, and cloning a node
//! never touches the underlying bytes. A single struct, since the compiler
//! runs single-threaded end to end and the table is owned directly by the
//! translation-unit context rather than shared via `Arc`.

use parking_lot::RwLock;
use string_interner::backend::DefaultBackend;
use string_interner::symbol::DefaultSymbol;
use string_interner::StringInterner;

/// Interned string symbol backed by a `StringInterner`. Dense and
/// monotonic: the `n`th distinct string interned gets symbol index `n`.
pub type InternedStr = DefaultSymbol;

/// The string table owned by a [`crate::context::TranslationUnitContext`].
#[derive(Debug, Default)]
pub struct InternPool {
    interner: RwLock<StringInterner<DefaultBackend>>,
}

impl InternPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `value`, returning its (possibly pre-existing) symbol.
    #[inline]
    pub fn intern<S: AsRef<str>>(&self, value: S) -> InternedStr {
        self.interner.write().get_or_intern(value.as_ref())
    }

    pub fn intern_batch<S: AsRef<str>>(&self, values: impl IntoIterator<Item = S>) -> Vec<InternedStr> {
        values.into_iter().map(|v| self.intern(v)).collect()
    }

    /// Resolve a symbol back into an owned string. Returns a byte-identical
    /// copy of whatever was interned for `symbol`.
    pub fn resolve_owned(&self, symbol: InternedStr) -> Option<String> {
        self.interner.read().resolve(symbol).map(|s| s.to_owned())
    }

    pub fn with_resolved<R, F: FnOnce(&str) -> R>(&self, symbol: InternedStr, f: F) -> Option<R> {
        self.interner.read().resolve(symbol).map(f)
    }

    pub fn len(&self) -> usize {
        self.interner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_stable_symbol() {
        let pool = InternPool::default();
        let first = pool.intern("foo");
        let second = pool.intern("foo");
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_owned_is_byte_identical() {
        let pool = InternPool::default();
        let sym = pool.intern("bar");
        assert_eq!(pool.resolve_owned(sym).unwrap(), "bar");
    }

    #[test]
    fn symbols_are_dense_and_monotonic() {
        let pool = InternPool::default();
        let a = pool.intern("a");
        let b = pool.intern("b");
        let a_again = pool.intern("a");
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn intern_batch_deduplicates() {
        let pool = InternPool::default();
        let symbols = pool.intern_batch(["x", "y", "x", "z", "y"]);
        assert_eq!(symbols[0], symbols[2]);
        assert_eq!(symbols[1], symbols[4]);
        assert_ne!(symbols[0], symbols[1]);
        assert_eq!(pool.len(), 3);
    }
}
