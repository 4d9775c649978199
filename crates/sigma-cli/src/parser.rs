//! Recursive-descent parser building the AST directly through
//! `sigma_core::context::TranslationUnitContext`'s `alloc_*` constructors —
//! the interface `sigma_core::ast`'s module doc names as "the same API a
//! parser would call". `sigma-core` never implements a parser itself, so
//! this crate supplies it.
//!
//! Standard precedence-climbing expression grammar (assignment looser than
//! `||`, looser than `&&`, looser than equality, looser than relational,
//! looser than additive, looser than multiplicative, tightest is unary/
//! postfix) plus the handful of statement forms Sigma programs need: `ret`,
//! `if`/`else if`/`else`, `TYPE name = expr;` declarations, and bare
//! expression statements.

use sigma_core::ast::{AstId, BinOp, LiteralValue, UnOp};
use sigma_core::context::TranslationUnitContext;
use sigma_error::{Error, ErrorKind, Position, Result, SourceSpan};

use crate::lexer::{Lexer, Token, TokenKind};

/// Builtin scalar type keywords `resolve_type_name` recognizes without a
/// scope lookup. Used to disambiguate an explicit `(TYPE)expr` cast from a
/// plain parenthesized expression — a bare `(x)` where `x` is a variable
/// name is never mistaken for a cast because variable names never collide
/// with this fixed list.
const BUILTIN_TYPES: &[&str] =
    &["void", "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64"];

pub struct Parser<'tcx> {
    ctx: &'tcx TranslationUnitContext<'tcx>,
    tokens: Vec<Token>,
    pos: usize,
    file: String,
}

/// The two top-level item collections `Checker::declare_items` expects.
pub struct Items {
    pub functions: Vec<AstId>,
    pub structs: Vec<AstId>,
}

pub fn parse<'tcx>(ctx: &'tcx TranslationUnitContext<'tcx>, file: &str, src: &str) -> Result<Items> {
    let tokens = Lexer::new(file, src).tokenize()?;
    Parser { ctx, tokens, pos: 0, file: file.to_string() }.parse_program()
}

impl<'tcx> Parser<'tcx> {
    fn parse_program(&mut self) -> Result<Items> {
        let mut functions = Vec::new();
        let mut structs = Vec::new();
        while !self.at(TokenKind::Eof) {
            if self.at(TokenKind::Struct) {
                structs.push(self.parse_struct()?);
            } else {
                functions.push(self.parse_function()?);
            }
        }
        Ok(Items { functions, structs })
    }

    // --- token plumbing ---------------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(&kind)
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn mark(&self) -> Position {
        self.tokens[self.pos].span.start
    }

    fn finish(&self, start: Position) -> SourceSpan {
        let end = if self.pos > 0 { self.tokens[self.pos - 1].span.end } else { start };
        SourceSpan::new(self.file.clone(), start, end)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.at(kind.clone()) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&format!("expected {kind:?}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn unexpected(&self, message: &str) -> Error {
        Error::new(ErrorKind::UnexpectedToken, format!("{message}, found {:?}", self.peek()))
            .at(self.tokens[self.pos].span.clone())
    }

    // --- type references ----------------------------------------------------

    /// A type reference stored as a plain interned name, for `Param`/
    /// `FieldDecl`/`VarDecl`'s direct `type_name: InternedStr` field.
    fn parse_type_name_str(&mut self) -> Result<String> {
        let mut name = self.expect_ident()?;
        while self.at(TokenKind::Star) {
            self.bump();
            name.push('*');
        }
        Ok(name)
    }

    /// A type reference stored as an `AstId`, for `Function::return_ty`/
    /// `CastExpr::target_ty`, which `checker.rs` resolves through
    /// `ctx.ast_name` rather than a direct `InternedStr` field.
    fn parse_type_name_node(&mut self) -> Result<AstId> {
        let start = self.mark();
        let name = self.parse_type_name_str()?;
        let span = self.finish(start);
        let interned = self.ctx.intern(&name);
        let node = self.ctx.alloc_ident(span, interned);
        self.ctx.set_ast_name(node.base.id, interned);
        Ok(node.base.id)
    }

    // --- top-level items ------------------------------------------------------

    fn parse_struct(&mut self) -> Result<AstId> {
        let start = self.mark();
        self.expect(TokenKind::Struct)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let field_start = self.mark();
            let ty = self.parse_type_name_str()?;
            let field_name = self.expect_ident()?;
            self.expect(TokenKind::Semicolon)?;
            let field_span = self.finish(field_start);
            let field = self.ctx.alloc_field(field_span, self.ctx.intern(&field_name), self.ctx.intern(&ty));
            fields.push(field.base.id);
        }
        self.expect(TokenKind::RBrace)?;
        let span = self.finish(start);
        Ok(self.ctx.alloc_struct(span, self.ctx.intern(&name), fields).base.id)
    }

    fn parse_function(&mut self) -> Result<AstId> {
        let start = self.mark();
        let is_extern = if self.at(TokenKind::Extern) {
            self.bump();
            true
        } else {
            false
        };

        let return_ty = self.parse_type_name_node()?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        let mut is_variadic = false;
        while !self.at(TokenKind::RParen) {
            if self.at(TokenKind::Ellipsis) {
                self.bump();
                is_variadic = true;
                break;
            }
            let param_start = self.mark();
            let ty = self.parse_type_name_str()?;
            let param_name = self.expect_ident()?;
            let span = self.finish(param_start);
            let param = self.ctx.alloc_param(span, self.ctx.intern(&param_name), self.ctx.intern(&ty));
            params.push(param.base.id);
            if self.at(TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = if is_extern {
            self.expect(TokenKind::Semicolon)?;
            None
        } else {
            Some(self.parse_block()?)
        };

        let span = self.finish(start);
        let func = self.ctx.alloc_function(span, self.ctx.intern(&name), params, Some(return_ty), body, is_variadic, is_extern);
        Ok(func.base.id)
    }

    // --- statements ------------------------------------------------------------

    fn parse_block(&mut self) -> Result<AstId> {
        let start = self.mark();
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        let span = self.finish(start);
        Ok(self.ctx.alloc_block(span, stmts).base.id)
    }

    fn parse_block_or_stmt(&mut self) -> Result<AstId> {
        if self.at(TokenKind::LBrace) {
            self.parse_block()
        } else {
            self.parse_stmt()
        }
    }

    fn parse_stmt(&mut self) -> Result<AstId> {
        match self.peek() {
            TokenKind::Ret => self.parse_return(),
            TokenKind::If => self.parse_if(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Ident(_) if self.is_var_decl_start() => self.parse_var_decl(),
            _ => self.parse_expr_stmt(),
        }
    }

    /// A var decl is `TYPE name ...`: two consecutive identifiers, the
    /// second followed by `=` or `;`. Anything else starting with an
    /// identifier (a call, an assignment, a bare reference) is an
    /// expression statement — see the module doc.
    fn is_var_decl_start(&self) -> bool {
        matches!(self.tokens.get(self.pos).map(|t| &t.kind), Some(TokenKind::Ident(_)))
            && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Ident(_)))
            && matches!(
                self.tokens.get(self.pos + 2).map(|t| &t.kind),
                Some(TokenKind::Assign) | Some(TokenKind::Semicolon)
            )
    }

    fn parse_var_decl(&mut self) -> Result<AstId> {
        let start = self.mark();
        let ty = self.parse_type_name_str()?;
        let name = self.expect_ident()?;
        let init = if self.at(TokenKind::Assign) {
            self.bump();
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;
        let span = self.finish(start);
        let decl = self.ctx.alloc_var_decl(span, self.ctx.intern(&name), Some(self.ctx.intern(&ty)), init);
        Ok(decl.base.id)
    }

    fn parse_return(&mut self) -> Result<AstId> {
        let start = self.mark();
        self.expect(TokenKind::Ret)?;
        let value = if self.at(TokenKind::Semicolon) { None } else { Some(self.parse_expr()?) };
        self.expect(TokenKind::Semicolon)?;
        let span = self.finish(start);
        Ok(self.ctx.alloc_return(span, value).base.id)
    }

    fn parse_if(&mut self) -> Result<AstId> {
        let start = self.mark();
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_block_or_stmt()?;
        let else_branch = if self.at(TokenKind::Else) {
            self.bump();
            if self.at(TokenKind::If) {
                Some(self.parse_if()?)
            } else {
                Some(self.parse_block_or_stmt()?)
            }
        } else {
            None
        };
        let span = self.finish(start);
        Ok(self.ctx.alloc_if(span, cond, then_branch, else_branch).base.id)
    }

    fn parse_expr_stmt(&mut self) -> Result<AstId> {
        let start = self.mark();
        let expr = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        let span = self.finish(start);
        Ok(self.ctx.alloc_expr_stmt(span, expr).base.id)
    }

    // --- expressions -----------------------------------------------------------

    fn parse_expr(&mut self) -> Result<AstId> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<AstId> {
        let start = self.mark();
        let target = self.parse_logical_or()?;
        if self.at(TokenKind::Assign) {
            self.bump();
            let value = self.parse_assignment()?;
            let span = self.finish(start);
            return Ok(self.ctx.alloc_assign(span, target, value).base.id);
        }
        Ok(target)
    }

    fn parse_logical_or(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut lhs = self.parse_logical_and()?;
        while self.at(TokenKind::OrOr) {
            self.bump();
            let rhs = self.parse_logical_and()?;
            let span = self.finish(start);
            lhs = self.ctx.alloc_binary(span, BinOp::Or, lhs, rhs).base.id;
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut lhs = self.parse_equality()?;
        while self.at(TokenKind::AndAnd) {
            self.bump();
            let rhs = self.parse_equality()?;
            let span = self.finish(start);
            lhs = self.ctx.alloc_binary(span, BinOp::And, lhs, rhs).base.id;
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_relational()?;
            let span = self.finish(start);
            lhs = self.ctx.alloc_binary(span, op, lhs, rhs).base.id;
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            let span = self.finish(start);
            lhs = self.ctx.alloc_binary(span, op, lhs, rhs).base.id;
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            let span = self.finish(start);
            lhs = self.ctx.alloc_binary(span, op, lhs, rhs).base.id;
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            let span = self.finish(start);
            lhs = self.ctx.alloc_binary(span, op, lhs, rhs).base.id;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<AstId> {
        let start = self.mark();
        match self.peek() {
            TokenKind::Minus => {
                self.bump();
                let operand = self.parse_unary()?;
                let span = self.finish(start);
                Ok(self.ctx.alloc_unary(span, UnOp::Neg, operand).base.id)
            }
            TokenKind::Bang => {
                self.bump();
                let operand = self.parse_unary()?;
                let span = self.finish(start);
                Ok(self.ctx.alloc_unary(span, UnOp::Not, operand).base.id)
            }
            TokenKind::LParen if self.looks_like_cast() => {
                self.bump(); // (
                let ty_name = self.expect_ident()?;
                self.expect(TokenKind::RParen)?;
                let interned = self.ctx.intern(&ty_name);
                let ty_span = self.finish(start);
                let ty_node = self.ctx.alloc_ident(ty_span.clone(), interned);
                self.ctx.set_ast_name(ty_node.base.id, interned);
                let operand = self.parse_unary()?;
                let span = self.finish(start);
                Ok(self.ctx.alloc_cast(span, ty_node.base.id, operand, false).base.id)
            }
            _ => self.parse_postfix(),
        }
    }

    fn looks_like_cast(&self) -> bool {
        let ident_is_builtin = matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(TokenKind::Ident(name)) if BUILTIN_TYPES.contains(&name.as_str())
        );
        ident_is_builtin && matches!(self.tokens.get(self.pos + 2).map(|t| &t.kind), Some(TokenKind::RParen))
    }

    fn parse_postfix(&mut self) -> Result<AstId> {
        let start = self.mark();
        let mut node = self.parse_primary()?;
        while self.at(TokenKind::Dot) {
            self.bump();
            let field = self.expect_ident()?;
            let span = self.finish(start);
            node = self.ctx.alloc_member(span, node, self.ctx.intern(&field)).base.id;
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<AstId> {
        let start = self.mark();
        match self.peek().clone() {
            TokenKind::IntLiteral(v) => {
                self.bump();
                let span = self.finish(start);
                Ok(self.ctx.alloc_literal(span, LiteralValue::Int(v)).base.id)
            }
            TokenKind::UIntLiteral(v) => {
                self.bump();
                let span = self.finish(start);
                Ok(self.ctx.alloc_literal(span, LiteralValue::UInt(v)).base.id)
            }
            TokenKind::FloatLiteral(v) => {
                self.bump();
                let span = self.finish(start);
                Ok(self.ctx.alloc_literal(span, LiteralValue::Float(v)).base.id)
            }
            TokenKind::StringLiteral(s) => {
                self.bump();
                let span = self.finish(start);
                let interned = self.ctx.intern(&s);
                Ok(self.ctx.alloc_literal(span, LiteralValue::Str(interned)).base.id)
            }
            TokenKind::True => {
                self.bump();
                let span = self.finish(start);
                Ok(self.ctx.alloc_literal(span, LiteralValue::Bool(true)).base.id)
            }
            TokenKind::False => {
                self.bump();
                let span = self.finish(start);
                Ok(self.ctx.alloc_literal(span, LiteralValue::Bool(false)).base.id)
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.at(TokenKind::LParen) {
                    self.parse_call(start, name)
                } else {
                    let span = self.finish(start);
                    Ok(self.ctx.alloc_ident(span, self.ctx.intern(&name)).base.id)
                }
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn parse_call(&mut self, start: Position, callee: String) -> Result<AstId> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if self.at(TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let span = self.finish(start);
        Ok(self.ctx.alloc_call(span, self.ctx.intern(&callee), args).base.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_core::ast::AstRef;

    fn leaked_ctx() -> &'static TranslationUnitContext<'static> {
        Box::leak(Box::new(TranslationUnitContext::new("t.s")))
    }

    #[test]
    fn parses_a_function_returning_an_addition() {
        let ctx = leaked_ctx();
        let items = parse(ctx, "t.s", "i32 main() { ret 100 + 200; }").unwrap();
        assert_eq!(items.functions.len(), 1);
        match ctx.node(items.functions[0]) {
            AstRef::Function(f) => assert_eq!(ctx.resolve(f.name).unwrap(), "main"),
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn parses_if_else_if_else_chain() {
        let ctx = leaked_ctx();
        let items = parse(
            ctx,
            "t.s",
            "i32 main() { i32 x = 3; if (x == 1) { ret 10; } else if (x == 3) { ret 30; } else { ret 99; } }",
        )
        .unwrap();
        assert_eq!(items.functions.len(), 1);
    }

    #[test]
    fn parses_extern_variadic_declaration() {
        let ctx = leaked_ctx();
        let items = parse(ctx, "t.s", "extern i32 print(char* fmt, ...); i32 main() { ret 0; }").unwrap();
        assert_eq!(items.functions.len(), 2);
    }

    #[test]
    fn parses_struct_declaration() {
        let ctx = leaked_ctx();
        let items = parse(ctx, "t.s", "struct Point { i32 x; i32 y; } i32 main() { ret 0; }").unwrap();
        assert_eq!(items.structs.len(), 1);
        assert_eq!(items.functions.len(), 1);
    }

    #[test]
    fn unsigned_suffixed_literal_becomes_a_uint_node() {
        let ctx = leaked_ctx();
        let items = parse(ctx, "t.s", "i32 main() { i32 x = 5u; ret x; }").unwrap();
        match ctx.node(items.functions[0]) {
            AstRef::Function(f) => match ctx.node(f.body.unwrap()) {
                AstRef::Block(b) => match ctx.node(b.stmts[0]) {
                    AstRef::VarDecl(v) => match ctx.node(v.init.unwrap()) {
                        AstRef::Literal(l) => assert_eq!(l.value, LiteralValue::UInt(5)),
                        _ => panic!("expected a literal init"),
                    },
                    _ => panic!("expected a var decl"),
                },
                _ => panic!("expected a block"),
            },
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn distinguishes_assignment_from_var_decl() {
        let ctx = leaked_ctx();
        let items = parse(ctx, "t.s", "i32 main() { i32 x = 1; x = 2; ret x; }").unwrap();
        assert_eq!(items.functions.len(), 1);
    }
}
