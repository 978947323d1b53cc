//! Diagnostic message handling for the via compiler

use crate::{SourceBuffer, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for diagnostic messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single diagnosis with severity, message and source span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn info(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Render this diagnosis against its source buffer:
    /// a `file:line:col: severity: message` header, the offending source
    /// line, and a caret underline of the span.
    pub fn render(&self, source: &SourceBuffer) -> String {
        let pos = source.position(self.span.start);
        let mut out = format!(
            "{}:{}:{}: {}: {}\n",
            source.name(),
            pos.line,
            pos.column,
            self.severity,
            self.message
        );
        let line = source.line_text(pos.line);
        out.push_str("  | ");
        out.push_str(line);
        out.push('\n');
        out.push_str("  | ");
        for _ in 1..pos.column {
            out.push(' ');
        }
        let width = (self.span.len() as usize).max(1).min(line.len().max(1));
        for _ in 0..width {
            out.push('^');
        }
        if let Some(help) = &self.help {
            out.push('\n');
            out.push_str("  = help: ");
            out.push_str(help);
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.severity, self.message, self.span)
    }
}

/// Per-compile collection of diagnoses. Created by the driver, filled by the
/// passes, emitted as a batch after the failing pass.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub messages: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::error(message, span));
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::warning(message, span));
    }

    pub fn info(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::info(message, span));
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    /// Render every accumulated diagnosis against `source`.
    pub fn render(&self, source: &SourceBuffer) -> String {
        let mut out = String::new();
        for d in &self.messages {
            out.push_str(&d.render(source));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn has_errors_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.warning("something odd", Span::new(0, 1));
        assert!(!diags.has_errors());
        diags.error("something wrong", Span::new(0, 1));
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn render_underlines_span() {
        let source = SourceBuffer::new("t.via", "var x = ;");
        let d = Diagnostic::error("expected expression", Span::new(8, 9));
        let rendered = d.render(&source);
        assert!(rendered.starts_with("t.via:1:9: error: expected expression"));
        assert!(rendered.contains("var x = ;"));
        assert!(rendered.ends_with("        ^"));
    }
}
