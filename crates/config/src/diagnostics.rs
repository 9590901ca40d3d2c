//! Line-mapped validation diagnostics

use std::fmt;

/// How many lines of context to show around the offending line.
const EXCERPT_CONTEXT: usize = 2;

/// One configuration problem, tied back to its source location.
///
/// `start_line` is where the enclosing entry begins; `error_line` is the
/// exact offending line. They coincide for failures on the entry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub start_line: usize,
    pub error_line: usize,
    pub excerpt: String,
}

impl Diagnostic {
    /// Build a diagnostic, rendering the excerpt from the original text.
    pub fn new(message: impl Into<String>, start_line: usize, error_line: usize, text: &str) -> Self {
        Self {
            message: message.into(),
            start_line,
            error_line,
            excerpt: render_excerpt(text, error_line, EXCERPT_CONTEXT),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error at line {}: {}", self.error_line, self.message)?;
        write!(f, "{}", self.excerpt)
    }
}

/// Render a numbered window of `context` lines around 1-based `line`,
/// marking the offending line with `>`.
pub fn render_excerpt(text: &str, line: usize, context: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || line == 0 {
        return String::new();
    }
    let line = line.min(lines.len());
    let first = line.saturating_sub(context + 1) + 1;
    let last = (line + context).min(lines.len());
    let width = last.to_string().len();

    let mut out = String::new();
    for n in first..=last {
        let marker = if n == line { '>' } else { ' ' };
        out.push_str(&format!("{marker} {n:>width$} | {}\n", lines[n - 1]));
    }
    out
}
