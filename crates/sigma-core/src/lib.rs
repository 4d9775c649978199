//! # sigma-core
//!
//! Typed AST, semantic analyzer, and sea-of-nodes intermediate representation
//! for the Sigma compiler. A single [`TranslationUnitContext`] owns every
//! allocation for one compile: the arena-backed AST (`ast`), the interned
//! string table (`interner`), the type system (`types`), the scope tree and
//! symbol table (`scope`, `symbol`), the checker (`checker`), and the
//! sea-of-nodes graph lowering (`ir`, `translate`).

pub mod arena;
pub mod ast;
pub mod cfg;
pub mod checker;
pub mod context;
pub mod interner;
pub mod ir;
pub mod mangle;
pub mod scheduler;
pub mod scope;
pub mod symbol;
pub mod translate;
pub mod types;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

pub use ast::{
    AssignExpr, AstBase, AstId, AstKind, AstRef, BinOp, BinaryExpr, Block as AstBlock, Call,
    CastExpr, ExprStmt, FieldDecl, Function, IdentExpr, If, Literal, LiteralValue, MemberExpr,
    Param, Return, StructDecl, UnOp, UnaryExpr, VarDecl,
};
pub use cfg::{Block, BlockId, Cfg};
pub use checker::Checker;
pub use context::{AstIdGen, TranslationUnitContext, FILE_SCOPE_OWNER};
pub use interner::{InternPool, InternedStr};
pub use ir::{CmpKind, Graph, Node, NodeId, Op};
pub use mangle::mangle;
pub use scheduler::{schedule, Schedule};
pub use scope::{Scope, ScopeKind, ScopeStack};
pub use symbol::{ScopeId, SymId, SymKind, Symbol};
pub use translate::lower_function;
pub use types::{FloatWidth, IntWidth, Type, TypeId, TypeTable};
