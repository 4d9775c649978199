//! Symbol table entries: named entities introduced by declarations.
//!
//! Monotonic ids, arena allocation, `RwLock`-guarded mutable fields set
//! incrementally as the checker resolves types and overloads. No
//! `previous`-chain shadowing and no cross-reference tracking between
//! symbols; resolution in this compiler is a straightforward
//! innermost-scope lookup with no reverse-dependency bookkeeping.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ast::AstId;
use crate::interner::InternedStr;
use crate::types::TypeId;

static NEXT_SYMBOL_ID: AtomicU32 = AtomicU32::new(1);

#[inline]
pub fn reset_symbol_id_counter() {
    NEXT_SYMBOL_ID.store(1, Ordering::SeqCst);
}

pub(crate) static NEXT_SCOPE_ID: AtomicU32 = AtomicU32::new(1);

#[inline]
pub fn reset_scope_id_counter() {
    NEXT_SCOPE_ID.store(1, Ordering::SeqCst);
}

/// Unique identifier for a symbol within a translation unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct SymId(pub u32);

impl std::fmt::Display for SymId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a scope within a translation unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct ScopeId(pub u32);

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of the named entity a symbol represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymKind {
    Unknown,
    Namespace,
    Function,
    Struct,
    Field,
    Variable,
    Param,
    Const,
}

/// A named entity introduced by a declaration.
///
/// Most fields start unresolved (`Unknown` kind, no type) and are filled in
/// as the checker walks the declaration that owns this symbol.
#[derive(Debug)]
pub struct Symbol {
    pub id: SymId,
    pub name: InternedStr,
    pub owner: RwLock<AstId>,
    pub scope: RwLock<Option<ScopeId>>,
    pub kind: RwLock<SymKind>,
    pub ty: RwLock<Option<TypeId>>,
    /// Byte offset of a struct field within its struct layout.
    pub field_offset: RwLock<Option<u32>>,
    /// Ordinal position among a function's parameters, used by the backend's
    /// calling-convention lowering.
    pub param_index: RwLock<Option<u32>>,
    pub is_external: RwLock<bool>,
    pub is_variadic: RwLock<bool>,
}

impl Clone for Symbol {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            owner: RwLock::new(*self.owner.read()),
            scope: RwLock::new(*self.scope.read()),
            kind: RwLock::new(*self.kind.read()),
            ty: RwLock::new(*self.ty.read()),
            field_offset: RwLock::new(*self.field_offset.read()),
            param_index: RwLock::new(*self.param_index.read()),
            is_external: RwLock::new(*self.is_external.read()),
            is_variadic: RwLock::new(*self.is_variadic.read()),
        }
    }
}

impl Symbol {
    pub fn new(owner: AstId, name: InternedStr) -> Self {
        let id = SymId(NEXT_SYMBOL_ID.fetch_add(1, Ordering::SeqCst));
        Self {
            id,
            name,
            owner: RwLock::new(owner),
            scope: RwLock::new(None),
            kind: RwLock::new(SymKind::Unknown),
            ty: RwLock::new(None),
            field_offset: RwLock::new(None),
            param_index: RwLock::new(None),
            is_external: RwLock::new(false),
            is_variadic: RwLock::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> SymId {
        self.id
    }

    #[inline]
    pub fn owner(&self) -> AstId {
        *self.owner.read()
    }

    #[inline]
    pub fn kind(&self) -> SymKind {
        *self.kind.read()
    }

    #[inline]
    pub fn set_kind(&self, kind: SymKind) {
        *self.kind.write() = kind;
    }

    #[inline]
    pub fn ty(&self) -> Option<TypeId> {
        *self.ty.read()
    }

    #[inline]
    pub fn set_ty(&self, ty: TypeId) {
        *self.ty.write() = Some(ty);
    }

    #[inline]
    pub fn scope(&self) -> Option<ScopeId> {
        *self.scope.read()
    }

    #[inline]
    pub fn set_scope(&self, scope: ScopeId) {
        *self.scope.write() = Some(scope);
    }

    #[inline]
    pub fn field_offset(&self) -> Option<u32> {
        *self.field_offset.read()
    }

    #[inline]
    pub fn set_field_offset(&self, offset: u32) {
        *self.field_offset.write() = Some(offset);
    }

    #[inline]
    pub fn param_index(&self) -> Option<u32> {
        *self.param_index.read()
    }

    #[inline]
    pub fn set_param_index(&self, index: u32) {
        *self.param_index.write() = Some(index);
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        *self.is_external.read()
    }

    #[inline]
    pub fn set_is_external(&self, value: bool) {
        *self.is_external.write() = value;
    }

    #[inline]
    pub fn is_variadic(&self) -> bool {
        *self.is_variadic.read()
    }

    #[inline]
    pub fn set_is_variadic(&self, value: bool) {
        *self.is_variadic.write() = value;
    }

    pub fn format_compact(&self) -> String {
        format!("{}@{:?} <{:?}>", self.id, self.owner(), self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::InternPool;

    fn ast_id(i: u32) -> AstId {
        AstId(i)
    }

    #[test]
    fn monotonic_ids() {
        reset_symbol_id_counter();
        let pool = InternPool::default();
        let name = pool.intern("f");
        let a = Symbol::new(ast_id(1), name);
        let b = Symbol::new(ast_id(2), name);
        assert!(b.id.0 > a.id.0);
    }

    #[test]
    fn kind_and_type_round_trip() {
        reset_symbol_id_counter();
        let pool = InternPool::default();
        let sym = Symbol::new(ast_id(1), pool.intern("counter"));
        assert_eq!(sym.kind(), SymKind::Unknown);
        sym.set_kind(SymKind::Variable);
        sym.set_ty(TypeId(3));
        assert_eq!(sym.kind(), SymKind::Variable);
        assert_eq!(sym.ty(), Some(TypeId(3)));
    }

    #[test]
    fn field_offset_defaults_to_none() {
        reset_symbol_id_counter();
        let pool = InternPool::default();
        let sym = Symbol::new(ast_id(1), pool.intern("x"));
        assert_eq!(sym.field_offset(), None);
        sym.set_field_offset(8);
        assert_eq!(sym.field_offset(), Some(8));
    }
}
