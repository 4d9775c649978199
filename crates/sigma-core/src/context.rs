//! The translation-unit context: the single owning structure a compile
//! thread touches that holds the arena, string table, AST node index, type
//! table, and the diagnostics collected along the way.
//!
//! This compiler only ever sees one translation unit per process, so global
//! compilation context and per-file context collapse into one struct, with
//! an `RwLock`-guarded id -> node map and an O(1) `Vec`-indexed symbol table
//! built once parsing settles (`build_lookup_maps_from_arena`).

use parking_lot::RwLock;
use std::collections::HashMap;

use sigma_error::Error;

use crate::ast::{
    Arena, AssignExpr, AstBase, AstId, AstKind, AstRef, BinaryExpr, Block, Call, CastExpr,
    ExprStmt, FieldDecl, Function, IdentExpr, If, Literal, MemberExpr, Param, Return, StructDecl,
    UnaryExpr, VarDecl,
};
use crate::interner::{InternPool, InternedStr};
use crate::symbol::{ScopeId, SymId, Symbol};
use crate::types::TypeTable;

/// Everything needed to type-check and lower a single source file.
pub struct TranslationUnitContext<'tcx> {
    pub arena: Arena<'tcx>,
    pub interner: InternPool,
    pub types: RwLock<TypeTable>,
    pub file_name: String,

    symbol_map: RwLock<Vec<&'tcx Symbol>>,
    diagnostics: RwLock<Vec<Error>>,
    ast_names: RwLock<HashMap<AstId, InternedStr>>,
    ast_index: RwLock<HashMap<AstId, AstRef<'tcx>>>,
    ids: RwLock<AstIdGen>,
    /// Implicit casts the checker spliced in after the tree was built:
    /// original expression id -> the `Cast` node now standing in for it.
    /// Child-slot fields (`VarDecl::init`, `Return::value`, `Call::args`,
    /// ...) stay plain `AstId`s and are never rewritten in place; lowering
    /// consults this table through [`TranslationUnitContext::effective_expr`]
    /// instead.
    implicit_casts: RwLock<HashMap<AstId, AstId>>,
}

impl<'tcx> std::fmt::Debug for TranslationUnitContext<'tcx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationUnitContext")
            .field("file_name", &self.file_name)
            .field("diagnostics", &self.diagnostics.read().len())
            .finish()
    }
}

impl<'tcx> TranslationUnitContext<'tcx> {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            arena: Arena::default(),
            interner: InternPool::default(),
            types: RwLock::new(TypeTable::new()),
            file_name: file_name.into(),
            symbol_map: RwLock::new(Vec::new()),
            diagnostics: RwLock::new(Vec::new()),
            ast_names: RwLock::new(HashMap::new()),
            ast_index: RwLock::new(HashMap::new()),
            ids: RwLock::new(AstIdGen::default()),
            implicit_casts: RwLock::new(HashMap::new()),
        }
    }

    pub fn next_ast_id(&self) -> AstId {
        self.ids.write().next()
    }

    pub fn intern(&self, s: impl AsRef<str>) -> InternedStr {
        self.interner.intern(s)
    }

    pub fn resolve(&self, sym: InternedStr) -> Option<String> {
        self.interner.resolve_owned(sym)
    }

    /// Record the error and keep going; callers decide whether to abort the
    /// current pipeline stage based on `Error::is_fatal`.
    pub fn report(&self, error: Error) {
        self.diagnostics.write().push(error);
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.diagnostics.read().iter().any(|e| e.is_fatal())
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.read().iter().map(|e| e.to_string()).collect()
    }

    pub fn take_diagnostics(&self) -> Vec<Error> {
        std::mem::take(&mut *self.diagnostics.write())
    }

    /// Rebuild the `SymId -> &Symbol` index from arena contents. Called once
    /// after declaration collection completes, before the checker starts
    /// resolving references.
    pub fn build_symbol_index(&'tcx self) {
        let mut symbols: Vec<&'tcx Symbol> = self.arena.iter_symbol().collect();
        symbols.sort_unstable_by_key(|s| s.id().0);
        *self.symbol_map.write() = symbols;
    }

    pub fn symbol(&self, id: SymId) -> Option<&'tcx Symbol> {
        let idx = id.0.checked_sub(1)?;
        self.symbol_map.read().get(idx as usize).copied()
    }

    pub fn set_ast_name(&self, id: AstId, name: InternedStr) {
        self.ast_names.write().insert(id, name);
    }

    pub fn ast_name(&self, id: AstId) -> Option<InternedStr> {
        self.ast_names.read().get(&id).copied()
    }

    /// Record a freshly allocated node under its id so later passes can walk
    /// the tree by [`AstId`] instead of holding onto `&'tcx` references.
    pub fn register(&self, id: AstId, node: AstRef<'tcx>) {
        self.ast_index.write().insert(id, node);
    }

    pub fn try_node(&self, id: AstId) -> Option<AstRef<'tcx>> {
        self.ast_index.read().get(&id).copied()
    }

    /// Look up a previously registered node. Panics on an unregistered id,
    /// which only happens if a caller threads an id that was never built
    /// through one of the `alloc_*` constructors below — a bug in the
    /// caller, not a recoverable diagnostic.
    pub fn node(&self, id: AstId) -> AstRef<'tcx> {
        self.try_node(id).unwrap_or_else(|| panic!("ast id {id} was never registered"))
    }

    pub fn kind_of(&self, id: AstId) -> AstKind {
        self.node(id).kind()
    }

    /// Record that `original` now reads through an implicit `Cast` node the
    /// checker allocated, rather than through its own value.
    pub fn wrap_implicit_cast(&self, original: AstId, cast: AstId) {
        self.implicit_casts.write().insert(original, cast);
    }

    /// Resolve an expression id to the node lowering should actually read:
    /// the id itself, unless the checker wrapped it in an implicit cast.
    pub fn effective_expr(&self, id: AstId) -> AstId {
        self.implicit_casts.read().get(&id).copied().unwrap_or(id)
    }

    fn base(&self, kind: AstKind, span: sigma_error::SourceSpan) -> AstBase {
        AstBase::new(self.next_ast_id(), kind, span)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn alloc_function(
        &'tcx self,
        span: sigma_error::SourceSpan,
        name: InternedStr,
        params: Vec<AstId>,
        return_ty: Option<AstId>,
        body: Option<AstId>,
        is_variadic: bool,
        is_extern: bool,
    ) -> &'tcx Function<'tcx> {
        let base = self.base(AstKind::Function, span);
        let id = base.id;
        let node = self.arena.alloc(Function::new(
            base,
            name,
            params,
            return_ty,
            body,
            is_variadic,
            is_extern,
            std::cell::Cell::new(None),
        ));
        self.register(id, AstRef::Function(node));
        node
    }

    pub fn alloc_struct(&'tcx self, span: sigma_error::SourceSpan, name: InternedStr, fields: Vec<AstId>) -> &'tcx StructDecl<'tcx> {
        let base = self.base(AstKind::Struct, span);
        let id = base.id;
        let node = self.arena.alloc(StructDecl::new(base, name, fields, std::cell::Cell::new(None)));
        self.register(id, AstRef::Struct(node));
        node
    }

    pub fn alloc_param(&'tcx self, span: sigma_error::SourceSpan, name: InternedStr, type_name: InternedStr) -> &'tcx Param<'tcx> {
        let base = self.base(AstKind::Param, span);
        let id = base.id;
        let node = self.arena.alloc(Param::new(base, name, type_name, std::cell::Cell::new(None)));
        self.register(id, AstRef::Param(node));
        node
    }

    pub fn alloc_field(&'tcx self, span: sigma_error::SourceSpan, name: InternedStr, type_name: InternedStr) -> &'tcx FieldDecl<'tcx> {
        let base = self.base(AstKind::Field, span);
        let id = base.id;
        let node = self.arena.alloc(FieldDecl::new(base, name, type_name, std::cell::Cell::new(None)));
        self.register(id, AstRef::Field(node));
        node
    }

    pub fn alloc_block(&'tcx self, span: sigma_error::SourceSpan, stmts: Vec<AstId>) -> &'tcx Block<'tcx> {
        let base = self.base(AstKind::Block, span);
        let id = base.id;
        let node = self.arena.alloc(Block::new(base, stmts));
        self.register(id, AstRef::Block(node));
        node
    }

    pub fn alloc_var_decl(
        &'tcx self,
        span: sigma_error::SourceSpan,
        name: InternedStr,
        type_name: Option<InternedStr>,
        init: Option<AstId>,
    ) -> &'tcx VarDecl<'tcx> {
        let base = self.base(AstKind::VarDecl, span);
        let id = base.id;
        let node = self.arena.alloc(VarDecl::new(base, name, type_name, init, std::cell::Cell::new(None)));
        self.register(id, AstRef::VarDecl(node));
        node
    }

    pub fn alloc_if(&'tcx self, span: sigma_error::SourceSpan, cond: AstId, then_branch: AstId, else_branch: Option<AstId>) -> &'tcx If<'tcx> {
        let base = self.base(AstKind::If, span);
        let id = base.id;
        let node = self.arena.alloc(If::new(base, cond, then_branch, else_branch));
        self.register(id, AstRef::If(node));
        node
    }

    pub fn alloc_return(&'tcx self, span: sigma_error::SourceSpan, value: Option<AstId>) -> &'tcx Return<'tcx> {
        let base = self.base(AstKind::Return, span);
        let id = base.id;
        let node = self.arena.alloc(Return::new(base, value));
        self.register(id, AstRef::Return(node));
        node
    }

    pub fn alloc_expr_stmt(&'tcx self, span: sigma_error::SourceSpan, expr: AstId) -> &'tcx ExprStmt<'tcx> {
        let base = self.base(AstKind::ExprStmt, span);
        let id = base.id;
        let node = self.arena.alloc(ExprStmt::new(base, expr));
        self.register(id, AstRef::ExprStmt(node));
        node
    }

    pub fn alloc_binary(&'tcx self, span: sigma_error::SourceSpan, op: crate::ast::BinOp, lhs: AstId, rhs: AstId) -> &'tcx BinaryExpr<'tcx> {
        let base = self.base(AstKind::Binary, span);
        let id = base.id;
        let node = self.arena.alloc(BinaryExpr::new(base, op, lhs, rhs));
        self.register(id, AstRef::Binary(node));
        node
    }

    pub fn alloc_unary(&'tcx self, span: sigma_error::SourceSpan, op: crate::ast::UnOp, operand: AstId) -> &'tcx UnaryExpr<'tcx> {
        let base = self.base(AstKind::Unary, span);
        let id = base.id;
        let node = self.arena.alloc(UnaryExpr::new(base, op, operand));
        self.register(id, AstRef::Unary(node));
        node
    }

    pub fn alloc_call(&'tcx self, span: sigma_error::SourceSpan, callee: InternedStr, args: Vec<AstId>) -> &'tcx Call<'tcx> {
        let base = self.base(AstKind::Call, span);
        let id = base.id;
        let node = self.arena.alloc(Call::new(base, callee, args, std::cell::Cell::new(None)));
        self.register(id, AstRef::Call(node));
        node
    }

    pub fn alloc_literal(&'tcx self, span: sigma_error::SourceSpan, value: crate::ast::LiteralValue) -> &'tcx Literal<'tcx> {
        let base = self.base(AstKind::Literal, span);
        let id = base.id;
        let node = self.arena.alloc(Literal::new(base, value));
        self.register(id, AstRef::Literal(node));
        node
    }

    pub fn alloc_ident(&'tcx self, span: sigma_error::SourceSpan, name: InternedStr) -> &'tcx IdentExpr<'tcx> {
        let base = self.base(AstKind::Ident, span);
        let id = base.id;
        let node = self.arena.alloc(IdentExpr::new(base, name, std::cell::Cell::new(None)));
        self.register(id, AstRef::Ident(node));
        node
    }

    pub fn alloc_cast(&'tcx self, span: sigma_error::SourceSpan, target_ty: AstId, operand: AstId, implicit: bool) -> &'tcx CastExpr<'tcx> {
        let base = self.base(AstKind::Cast, span);
        let id = base.id;
        let node = self.arena.alloc(CastExpr::new(base, target_ty, operand, implicit));
        self.register(id, AstRef::Cast(node));
        node
    }

    pub fn alloc_member(&'tcx self, span: sigma_error::SourceSpan, base_expr: AstId, field: InternedStr) -> &'tcx MemberExpr<'tcx> {
        let base = self.base(AstKind::Member, span);
        let id = base.id;
        let node = self.arena.alloc(MemberExpr::new(base, base_expr, field));
        self.register(id, AstRef::Member(node));
        node
    }

    pub fn alloc_assign(&'tcx self, span: sigma_error::SourceSpan, target: AstId, value: AstId) -> &'tcx AssignExpr<'tcx> {
        let base = self.base(AstKind::Assign, span);
        let id = base.id;
        let node = self.arena.alloc(AssignExpr::new(base, target, value));
        self.register(id, AstRef::Assign(node));
        node
    }
}

/// Monotonic id allocator for AST nodes, separate from the arena so callers
/// can predict an id before the node backing it exists (e.g. to set
/// `AstBase::parent` while still building children).
#[derive(Default)]
pub struct AstIdGen {
    next: u32,
}

impl AstIdGen {
    pub fn next(&mut self) -> AstId {
        let id = AstId(self.next);
        self.next += 1;
        id
    }
}

/// Placeholder scope id reserved for the file-level namespace, the root of
/// every translation unit's scope tree.
pub const FILE_SCOPE_OWNER: AstId = AstId(u32::MAX);

pub fn unresolved_symbol_error(name: &str) -> Error {
    Error::unknown_variable(name)
}

/// Helper re-exported for callers that need a fresh `ScopeId`-keyed map
/// without depending on `sigma_core::scope` directly.
pub type ScopeIndex<'tcx> = HashMap<ScopeId, &'tcx crate::scope::Scope<'tcx>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_round_trips_through_context() {
        let ctx = TranslationUnitContext::new("main.s");
        let sym = ctx.intern("main");
        assert_eq!(ctx.resolve(sym).unwrap(), "main");
    }

    #[test]
    fn reporting_an_error_marks_fatal() {
        let ctx = TranslationUnitContext::new("main.s");
        assert!(!ctx.has_fatal_errors());
        ctx.report(unresolved_symbol_error("x"));
        assert!(ctx.has_fatal_errors());
    }

    #[test]
    fn ast_id_gen_is_monotonic() {
        let mut gen = AstIdGen::default();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
    }
}
