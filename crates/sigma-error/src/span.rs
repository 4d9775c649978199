//! Source locations and the caret-underline diagnostic renderer.
//!
//! A line-plus-caret renderer implemented as pure string formatting with
//! no console/file I/O.

use std::fmt;

/// A 1-based line/column pair, matching the lexer's `TokenInfo::location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A half-open source range within a single file, carried by diagnostics
/// that anchor to a located AST/IR node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub file: String,
    pub start: Position,
    pub end: Position,
}

impl SourceSpan {
    pub fn new(file: impl Into<String>, start: Position, end: Position) -> Self {
        Self {
            file: file.into(),
            start,
            end,
        }
    }

    pub fn point(file: impl Into<String>, at: Position) -> Self {
        Self::new(file, at, at)
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.start)
    }
}

/// Render a diagnostic line plus a caret underline beneath the offending
/// range, reproducible byte-for-byte across runs.
///
/// `line_text` is the full text of `span.start.line` with no trailing
/// newline. Columns are 1-based; a span whose `end` is on a different line
/// than `start` underlines to the end of `line_text`.
pub fn render_diagnostic(
    path: &str,
    code: u32,
    severity: &str,
    message: &str,
    span: Option<&SourceSpan>,
    line_text: Option<&str>,
) -> String {
    let mut out = String::new();
    match span {
        Some(s) => {
            out.push_str(&format!(
                "{}:{}: {} C{:04}: {}\n",
                path, s.start, severity, code, message
            ));
        }
        None => {
            out.push_str(&format!("{}: {} C{:04}: {}\n", path, severity, code, message));
        }
    }

    if let (Some(s), Some(text)) = (span, line_text) {
        out.push_str(text);
        out.push('\n');

        let start_col = s.start.col.saturating_sub(1) as usize;
        let width = if s.end.line == s.start.line {
            (s.end.col.saturating_sub(s.start.col)).max(1) as usize
        } else {
            text.chars().count().saturating_sub(start_col).max(1)
        };

        out.push_str(&" ".repeat(start_col));
        out.push_str(&"^".repeat(width));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_line_caret() {
        let span = SourceSpan::new("main.s", Position::new(3, 5), Position::new(3, 8));
        let rendered = render_diagnostic(
            "main.s",
            4009,
            "error",
            "not all control paths return",
            Some(&span),
            Some("  i32 x = 3;"),
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "main.s:3:5: error C4009: not all control paths return");
        assert_eq!(lines[1], "  i32 x = 3;");
        assert_eq!(lines[2], "    ^^^");
    }

    #[test]
    fn renders_without_span() {
        let rendered = render_diagnostic("main.s", 1001, "error", "file not found", None, None);
        assert_eq!(rendered, "main.s: error C1001: file not found\n");
    }
}
