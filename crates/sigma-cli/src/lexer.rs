//! Hand-rolled tokenizer for Sigma source text. Lexing lives outside
//! `sigma-core` as a separate front-end concern, with `sigma-core` only ever
//! seeing the AST a parser builds from this crate's tokens.
//!
//! Token taxonomy covers what Sigma programs actually spell: `ret` rather
//! than `return`, no `while`/`for`/`break`/`new` (Sigma's grammar has no
//! loops), no `char` literal. Single pass over the source bytes, tracking
//! 1-based line/column for `sigma_error::SourceSpan`.

use sigma_error::{Error, ErrorKind, Position, SourceSpan};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    IntLiteral(i64),
    UIntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    True,
    False,

    Ret,
    If,
    Else,
    Extern,
    Struct,

    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Dot,
    Ellipsis,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    file: String,
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(file: impl Into<String>, src: &'a str) -> Self {
        Lexer { file: file.into(), src: src.as_bytes(), pos: 0, line: 1, col: 1 }
    }

    pub fn tokenize(mut self) -> sigma_error::Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.position();
            let Some(c) = self.peek() else {
                tokens.push(Token { kind: TokenKind::Eof, span: SourceSpan::point(self.file.clone(), start) });
                break;
            };

            let kind = if c.is_ascii_digit() {
                self.lex_number()?
            } else if c == '"' {
                self.lex_string()?
            } else if c.is_ascii_alphabetic() || c == '_' {
                self.lex_ident_or_keyword()
            } else {
                self.lex_operator()?
            };

            let end = self.position();
            tokens.push(Token { kind, span: SourceSpan::new(self.file.clone(), start, end) });
        }
        Ok(tokens)
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).map(|&b| b as char)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).map(|&b| b as char)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self) -> sigma_error::Result<TokenKind> {
        let start_pos = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let digits = std::str::from_utf8(&self.src[start_pos..self.pos]).unwrap_or_default().to_string();

        // The float suffix just picks the literal kind; the `u`/`U` suffix
        // is preserved as its own token kind so the checker can tell `5u`
        // apart from `5` when it picks a default type for it.
        let mut is_unsigned = false;
        match self.peek() {
            Some('u') | Some('U') => {
                is_unsigned = true;
                self.bump();
            }
            Some('f') | Some('F') => {
                is_float = true;
                self.bump();
            }
            _ => {}
        }

        if is_float {
            let value: f64 = digits.parse().map_err(|_| {
                Error::new(ErrorKind::MalformedToken, format!("invalid float literal '{digits}'"))
                    .at(SourceSpan::point(self.file.clone(), self.position()))
            })?;
            Ok(TokenKind::FloatLiteral(value))
        } else {
            let value: i64 = digits.parse().map_err(|_| {
                Error::new(ErrorKind::MalformedToken, format!("invalid integer literal '{digits}'"))
                    .at(SourceSpan::point(self.file.clone(), self.position()))
            })?;
            Ok(if is_unsigned { TokenKind::UIntLiteral(value) } else { TokenKind::IntLiteral(value) })
        }
    }

    fn lex_string(&mut self) -> sigma_error::Result<TokenKind> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some('0') => s.push('\0'),
                    Some(other) => s.push(other),
                    None => {
                        return Err(Error::new(ErrorKind::MalformedToken, "unterminated escape in string literal")
                            .at(SourceSpan::point(self.file.clone(), self.position())))
                    }
                },
                Some(c) => s.push(c),
                None => {
                    return Err(Error::new(ErrorKind::MalformedToken, "unterminated string literal")
                        .at(SourceSpan::point(self.file.clone(), self.position())))
                }
            }
        }
        Ok(TokenKind::StringLiteral(s))
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let start_pos = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start_pos..self.pos]).unwrap_or_default();
        match text {
            "ret" => TokenKind::Ret,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "extern" => TokenKind::Extern,
            "struct" => TokenKind::Struct,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Ident(text.to_string()),
        }
    }

    fn lex_operator(&mut self) -> sigma_error::Result<TokenKind> {
        let c = self.bump().unwrap();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.bump();
                    self.bump();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' if self.peek() == Some('&') => {
                self.bump();
                TokenKind::AndAnd
            }
            '|' if self.peek() == Some('|') => {
                self.bump();
                TokenKind::OrOr
            }
            other => {
                return Err(Error::new(ErrorKind::MalformedToken, format!("unexpected character '{other}'"))
                    .at(SourceSpan::point(self.file.clone(), self.position())))
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new("t.s", src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_addition_expression() {
        assert_eq!(
            kinds("100 + 200"),
            vec![TokenKind::IntLiteral(100), TokenKind::Plus, TokenKind::IntLiteral(200), TokenKind::Eof]
        );
    }

    #[test]
    fn unsigned_suffix_produces_its_own_token_kind() {
        assert_eq!(kinds("5u"), vec![TokenKind::UIntLiteral(5), TokenKind::Eof]);
        assert_eq!(kinds("5U"), vec![TokenKind::UIntLiteral(5), TokenKind::Eof]);
        assert_eq!(kinds("5"), vec![TokenKind::IntLiteral(5), TokenKind::Eof]);
    }

    #[test]
    fn lexes_printf_call_with_escaped_string() {
        let toks = kinds(r#"print("hello %d\n", 42)"#);
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("print".into()),
                TokenKind::LParen,
                TokenKind::StringLiteral("hello %d\n".into()),
                TokenKind::Comma,
                TokenKind::IntLiteral(42),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_ret_keyword_from_identifier() {
        assert_eq!(kinds("ret retval"), vec![TokenKind::Ret, TokenKind::Ident("retval".into()), TokenKind::Eof]);
    }

    #[test]
    fn line_comment_is_skipped() {
        assert_eq!(kinds("1 // comment\n+ 2"), vec![TokenKind::IntLiteral(1), TokenKind::Plus, TokenKind::IntLiteral(2), TokenKind::Eof]);
    }
}
