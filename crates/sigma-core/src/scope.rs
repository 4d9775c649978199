//! Scope hierarchy and name resolution.
//!
//! A scope is either `Regular` (a block or function body: plain shadowing,
//! last definition wins) or `Namespace` (file or struct scope: declarations
//! are order-independent and functions may overload by signature). No
//! graph-building `BlockId` linkage and no `previous`-chain cloning support
//! — this compiler has a single translation unit per compile, so scopes
//! are never moved between arenas.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::ast::AstId;
use crate::interner::{InternPool, InternedStr};
use crate::symbol::{ScopeId, SymId, Symbol, NEXT_SCOPE_ID};
use std::sync::atomic::Ordering;

use crate::ast::Arena;

/// Whether a scope shadows by nesting order or holds order-independent,
/// possibly-overloaded declarations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Regular,
    Namespace,
}

/// One level of the scope tree.
#[derive(Debug)]
pub struct Scope<'tcx> {
    id: ScopeId,
    kind: ScopeKind,
    owner: AstId,
    parent: Option<ScopeId>,
    /// name -> overload set. A `Regular` scope's vectors never grow past one
    /// entry; a `Namespace` scope's function names may hold several.
    symbols: RwLock<HashMap<InternedStr, Vec<&'tcx Symbol>>>,
}

impl<'tcx> Scope<'tcx> {
    pub fn new(owner: AstId, kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            id: ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::SeqCst)),
            kind,
            owner,
            parent,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    #[inline]
    pub fn owner(&self) -> AstId {
        self.owner
    }

    #[inline]
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Declare `symbol` in this scope. In a `Regular` scope, a pre-existing
    /// declaration with the same name is a duplicate; in a `Namespace`
    /// scope, multiple `Function` symbols may share a name (overloading)
    /// but any other kind colliding with an existing declaration is a
    /// duplicate. The caller is responsible for raising the diagnostic;
    /// this method reports whether the insert collided.
    pub fn declare(&self, symbol: &'tcx Symbol) -> Result<(), &'tcx Symbol> {
        let mut table = self.symbols.write();
        let bucket = table.entry(symbol.name).or_default();

        if let Some(existing) = bucket.first() {
            let overload_ok = self.kind == ScopeKind::Namespace
                && matches!(symbol.kind(), crate::symbol::SymKind::Function)
                && bucket.iter().all(|s| matches!(s.kind(), crate::symbol::SymKind::Function));
            if !overload_ok {
                return Err(existing);
            }
        }

        bucket.push(symbol);
        Ok(())
    }

    /// All symbols declared under `name` in this scope only (no parent walk).
    pub fn lookup_local(&self, name: InternedStr) -> Vec<&'tcx Symbol> {
        self.symbols.read().get(&name).cloned().unwrap_or_default()
    }

    pub fn for_each_symbol<F: FnMut(&'tcx Symbol)>(&self, mut visit: F) {
        for bucket in self.symbols.read().values() {
            for sym in bucket {
                visit(sym);
            }
        }
    }

    pub fn format_compact(&self) -> String {
        let total: usize = self.symbols.read().values().map(|v| v.len()).sum();
        format!("{}/{}", self.owner, total)
    }
}

/// Stack of nested scopes, used while walking declarations top to bottom.
pub struct ScopeStack<'tcx> {
    arena: &'tcx Arena<'tcx>,
    interner: &'tcx InternPool,
    stack: Vec<&'tcx Scope<'tcx>>,
}

impl<'tcx> ScopeStack<'tcx> {
    pub fn new(arena: &'tcx Arena<'tcx>, interner: &'tcx InternPool) -> Self {
        Self {
            arena,
            interner,
            stack: Vec::new(),
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, owner: AstId, kind: ScopeKind) -> &'tcx Scope<'tcx> {
        let parent = self.stack.last().map(|s| s.id());
        let scope = self.arena.alloc(Scope::new(owner, kind, parent));
        self.stack.push(scope);
        scope
    }

    pub fn pop(&mut self) -> Option<&'tcx Scope<'tcx>> {
        self.stack.pop()
    }

    #[inline]
    pub fn top(&self) -> Option<&'tcx Scope<'tcx>> {
        self.stack.last().copied()
    }

    /// Innermost-first lookup across the whole chain.
    pub fn resolve(&self, name: &str) -> Option<&'tcx Symbol> {
        let key = self.interner.intern(name);
        for scope in self.stack.iter().rev() {
            let found = scope.lookup_local(key);
            if let Some(sym) = found.last() {
                return Some(sym);
            }
        }
        None
    }

    /// All overload candidates visible for `name`, taken from the innermost
    /// scope in which any declaration exists (overload sets do not merge
    /// across scope boundaries).
    pub fn resolve_overloads(&self, name: &str) -> Vec<&'tcx Symbol> {
        let key = self.interner.intern(name);
        for scope in self.stack.iter().rev() {
            let found = scope.lookup_local(key);
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    pub fn declare(&self, owner: AstId, name: &str) -> &'tcx Symbol {
        let key = self.interner.intern(name);
        self.arena.alloc(Symbol::new(owner, key))
    }

    pub fn declare_into_top(
        &self,
        owner: AstId,
        name: &str,
    ) -> Result<&'tcx Symbol, &'tcx Symbol> {
        let symbol = self.declare(owner, name);
        match self.top() {
            Some(scope) => scope.declare(symbol).map(|_| symbol),
            None => Ok(symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{reset_scope_id_counter, reset_symbol_id_counter, SymKind};

    fn ast_id(i: u32) -> AstId {
        AstId(i)
    }

    #[test]
    fn regular_scope_rejects_duplicate() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let arena = Arena::default();
        let pool = InternPool::default();
        let scope = arena.alloc(Scope::new(ast_id(1), ScopeKind::Regular, None));

        let a = arena.alloc(Symbol::new(ast_id(2), pool.intern("x")));
        let b = arena.alloc(Symbol::new(ast_id(3), pool.intern("x")));

        assert!(scope.declare(a).is_ok());
        assert!(scope.declare(b).is_err());
    }

    #[test]
    fn namespace_scope_allows_function_overloads() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let arena = Arena::default();
        let pool = InternPool::default();
        let scope = arena.alloc(Scope::new(ast_id(1), ScopeKind::Namespace, None));

        let a = arena.alloc(Symbol::new(ast_id(2), pool.intern("add")));
        a.set_kind(SymKind::Function);
        let b = arena.alloc(Symbol::new(ast_id(3), pool.intern("add")));
        b.set_kind(SymKind::Function);

        assert!(scope.declare(a).is_ok());
        assert!(scope.declare(b).is_ok());
        assert_eq!(scope.lookup_local(pool.intern("add")).len(), 2);
    }

    #[test]
    fn namespace_scope_rejects_overload_kind_mismatch() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let arena = Arena::default();
        let pool = InternPool::default();
        let scope = arena.alloc(Scope::new(ast_id(1), ScopeKind::Namespace, None));

        let func = arena.alloc(Symbol::new(ast_id(2), pool.intern("thing")));
        func.set_kind(SymKind::Function);
        let strukt = arena.alloc(Symbol::new(ast_id(3), pool.intern("thing")));
        strukt.set_kind(SymKind::Struct);

        assert!(scope.declare(func).is_ok());
        assert!(scope.declare(strukt).is_err());
    }

    #[test]
    fn scope_stack_resolves_innermost_first() {
        reset_symbol_id_counter();
        reset_scope_id_counter();
        let arena = Arena::default();
        let pool = InternPool::default();
        let mut stack = ScopeStack::new(&arena, &pool);

        stack.push(ast_id(1), ScopeKind::Namespace);
        stack.declare_into_top(ast_id(2), "x").unwrap();

        stack.push(ast_id(3), ScopeKind::Regular);
        let inner = stack.declare_into_top(ast_id(4), "x").unwrap();

        let resolved = stack.resolve("x").unwrap();
        assert_eq!(resolved.id, inner.id);
    }
}
