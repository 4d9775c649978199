//! The typed abstract syntax tree.
//!
//! Nodes are allocated in the per-translation-unit [`Arena`] declared below
//! via `declare_arena!`: every node gets a stable `&'tcx` reference for the
//! lifetime of the compile, and cross-references between nodes are plain
//! `AstId`s resolved through [`crate::context::TranslationUnitContext`]
//! rather than raw pointers, so the tree stays `Clone`-free and trivially
//! `Sync`. This module never parses source text itself: callers build a
//! tree directly through [`crate::context::TranslationUnitContext`]'s
//! `alloc_*` constructors, the same API a parser would call.

use strum_macros::{Display, EnumIter, EnumString, FromRepr};

use sigma_error::SourceSpan;

use crate::declare_arena;
use crate::interner::InternedStr;
use crate::scope::Scope;
use crate::symbol::Symbol;
use crate::types::TypeId;

declare_arena!([
    ast_function: Function<'tcx>,
    ast_struct: StructDecl<'tcx>,
    ast_param: Param<'tcx>,
    ast_field: FieldDecl<'tcx>,
    ast_block: Block<'tcx>,
    ast_var_decl: VarDecl<'tcx>,
    ast_if: If<'tcx>,
    ast_return: Return<'tcx>,
    ast_expr_stmt: ExprStmt<'tcx>,
    ast_binary: BinaryExpr<'tcx>,
    ast_unary: UnaryExpr<'tcx>,
    ast_call: Call<'tcx>,
    ast_literal: Literal<'tcx>,
    ast_ident: IdentExpr<'tcx>,
    ast_cast: CastExpr<'tcx>,
    ast_member: MemberExpr<'tcx>,
    ast_assign: AssignExpr<'tcx>,
] @vec [
    symbol: Symbol,
    scope: Scope<'tcx>,
]);

/// Stable identifier for an AST node within a translation unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct AstId(pub u32);

impl std::fmt::Display for AstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, FromRepr, Display, Default)]
#[strum(serialize_all = "snake_case")]
pub enum AstKind {
    #[default]
    Undefined,
    Function,
    Struct,
    Param,
    Field,
    Block,
    VarDecl,
    If,
    Return,
    ExprStmt,
    Binary,
    Unary,
    Call,
    Literal,
    Ident,
    Cast,
    Member,
    Assign,
}

/// Binary operators recognized by the checker and instruction selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
}

/// A literal value, already range-checked against its inferred type by the
/// time it reaches codegen (an overflowing literal is raised as a
/// diagnostic during checking).
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    /// An integer literal spelled with a `u`/`U` suffix (`5u`) — defaults to
    /// `u32` rather than `i32` absent a contextual expected type.
    UInt(i64),
    Float(f64),
    Bool(bool),
    Str(InternedStr),
}

/// Metadata shared by every AST node.
#[derive(Debug, Clone)]
pub struct AstBase {
    pub id: AstId,
    pub parent: Option<AstId>,
    pub kind: AstKind,
    pub span: SourceSpan,
    /// Filled in by the checker; `None` until then, and always `None` for
    /// statement-only nodes that never produce a value.
    pub ty: std::cell::Cell<Option<TypeId>>,
}

impl AstBase {
    pub fn new(id: AstId, kind: AstKind, span: SourceSpan) -> Self {
        Self {
            id,
            parent: None,
            kind,
            span,
            ty: std::cell::Cell::new(None),
        }
    }
}

macro_rules! ast_node {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone)]
        pub struct $name<'tcx> {
            pub base: AstBase,
            $(pub $field: $ty,)*
            _marker: std::marker::PhantomData<&'tcx ()>,
        }

        impl<'tcx> $name<'tcx> {
            pub fn new(base: AstBase, $($field: $ty),*) -> Self {
                Self { base, $($field,)* _marker: std::marker::PhantomData }
            }
        }
    };
}

ast_node!(Function {
    name: InternedStr,
    params: Vec<AstId>,
    return_ty: Option<AstId>,
    body: Option<AstId>,
    is_variadic: bool,
    is_extern: bool,
    symbol: std::cell::Cell<Option<&'tcx Symbol>>,
});

ast_node!(StructDecl {
    name: InternedStr,
    fields: Vec<AstId>,
    symbol: std::cell::Cell<Option<&'tcx Symbol>>,
});

ast_node!(Param {
    name: InternedStr,
    type_name: InternedStr,
    symbol: std::cell::Cell<Option<&'tcx Symbol>>,
});

ast_node!(FieldDecl {
    name: InternedStr,
    type_name: InternedStr,
    symbol: std::cell::Cell<Option<&'tcx Symbol>>,
});

ast_node!(Block {
    stmts: Vec<AstId>,
});

ast_node!(VarDecl {
    name: InternedStr,
    type_name: Option<InternedStr>,
    init: Option<AstId>,
    symbol: std::cell::Cell<Option<&'tcx Symbol>>,
});

ast_node!(If {
    cond: AstId,
    then_branch: AstId,
    else_branch: Option<AstId>,
});

ast_node!(Return {
    value: Option<AstId>,
});

ast_node!(ExprStmt {
    expr: AstId,
});

ast_node!(BinaryExpr {
    op: BinOp,
    lhs: AstId,
    rhs: AstId,
});

ast_node!(UnaryExpr {
    op: UnOp,
    operand: AstId,
});

ast_node!(Call {
    callee: InternedStr,
    args: Vec<AstId>,
    resolved: std::cell::Cell<Option<crate::symbol::SymId>>,
});

ast_node!(Literal {
    value: LiteralValue,
});

ast_node!(IdentExpr {
    name: InternedStr,
    resolved: std::cell::Cell<Option<crate::symbol::SymId>>,
});

ast_node!(CastExpr {
    target_ty: AstId,
    operand: AstId,
    implicit: bool,
});

ast_node!(MemberExpr {
    base_expr: AstId,
    field: InternedStr,
});

ast_node!(AssignExpr {
    target: AstId,
    value: AstId,
});

/// A typed handle to any allocated node, keyed by [`AstId`] in
/// [`crate::context::TranslationUnitContext`]'s node index. Lets the checker
/// and lowering pass walk the tree by id without threading `&'tcx` node
/// references through every call.
#[derive(Clone, Copy)]
pub enum AstRef<'tcx> {
    Function(&'tcx Function<'tcx>),
    Struct(&'tcx StructDecl<'tcx>),
    Param(&'tcx Param<'tcx>),
    Field(&'tcx FieldDecl<'tcx>),
    Block(&'tcx Block<'tcx>),
    VarDecl(&'tcx VarDecl<'tcx>),
    If(&'tcx If<'tcx>),
    Return(&'tcx Return<'tcx>),
    ExprStmt(&'tcx ExprStmt<'tcx>),
    Binary(&'tcx BinaryExpr<'tcx>),
    Unary(&'tcx UnaryExpr<'tcx>),
    Call(&'tcx Call<'tcx>),
    Literal(&'tcx Literal<'tcx>),
    Ident(&'tcx IdentExpr<'tcx>),
    Cast(&'tcx CastExpr<'tcx>),
    Member(&'tcx MemberExpr<'tcx>),
    Assign(&'tcx AssignExpr<'tcx>),
}

impl<'tcx> AstRef<'tcx> {
    pub fn kind(&self) -> AstKind {
        match self {
            AstRef::Function(_) => AstKind::Function,
            AstRef::Struct(_) => AstKind::Struct,
            AstRef::Param(_) => AstKind::Param,
            AstRef::Field(_) => AstKind::Field,
            AstRef::Block(_) => AstKind::Block,
            AstRef::VarDecl(_) => AstKind::VarDecl,
            AstRef::If(_) => AstKind::If,
            AstRef::Return(_) => AstKind::Return,
            AstRef::ExprStmt(_) => AstKind::ExprStmt,
            AstRef::Binary(_) => AstKind::Binary,
            AstRef::Unary(_) => AstKind::Unary,
            AstRef::Call(_) => AstKind::Call,
            AstRef::Literal(_) => AstKind::Literal,
            AstRef::Ident(_) => AstKind::Ident,
            AstRef::Cast(_) => AstKind::Cast,
            AstRef::Member(_) => AstKind::Member,
            AstRef::Assign(_) => AstKind::Assign,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_error::Position;

    fn dummy_span() -> SourceSpan {
        SourceSpan::point("t.s", Position::new(1, 1))
    }

    #[test]
    fn arena_allocates_distinct_nodes() {
        let arena = Arena::default();
        let a = arena.alloc(Literal::new(
            AstBase::new(AstId(1), AstKind::Literal, dummy_span()),
            LiteralValue::Int(1),
        ));
        let b = arena.alloc(Literal::new(
            AstBase::new(AstId(2), AstKind::Literal, dummy_span()),
            LiteralValue::Int(2),
        ));
        assert_ne!(a.base.id, b.base.id);
    }

    #[test]
    fn node_type_slot_starts_empty() {
        let base = AstBase::new(AstId(1), AstKind::Ident, dummy_span());
        assert_eq!(base.ty.get(), None);
        base.ty.set(Some(TypeId(0)));
        assert_eq!(base.ty.get(), Some(TypeId(0)));
    }
}
