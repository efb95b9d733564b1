//! Diagnostic model shared by every compiler phase.
//!
//! Phases return `(artifact, Vec<Diagnostic>)` instead of failing on the
//! first problem, so one invocation surfaces as many findings as possible.
//! The driver decides the exit code from the highest severity seen.

use crate::ast::Span;
use std::path::PathBuf;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

/// Which class of problem a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Lex,
    Parse,
    IncludeResolution,
    SymbolDuplicate,
    UnresolvedReference,
    TypeMismatch,
    OverflowPolicyConflict,
    AccessModifierViolation,
    RecursionDetected,
    CppRequirementMismatch,
    Io,
    InternalCompilerError,
}

/// A single finding, positioned in the source where possible.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    /// File the finding points into, when known.
    pub file: Option<PathBuf>,
    /// Position within `file`; line is 1-based, column 0-based.
    pub span: Option<Span>,
    /// Indented continuation lines printed under the main message.
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Diagnostic {
            category,
            severity: Severity::Error,
            message: message.into(),
            file: None,
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(category, message)
        }
    }

    pub fn note(category: Category, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Note,
            ..Diagnostic::error(category, message)
        }
    }

    pub fn at(mut self, file: impl Into<PathBuf>, span: Span) -> Self {
        self.file = Some(file.into());
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    fn severity_label(&self) -> &'static str {
        match self.severity {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Note => "Note",
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: ", self.severity_label())?;
        if let Some(ref file) = self.file {
            write!(f, "{}", file.display())?;
            if let Some(span) = self.span {
                write!(f, ":{}:{}", span.line, span.column)?;
            }
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)?;
        for note in &self.notes {
            write!(f, "\n    {}", note)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// Format diagnostics for stderr: one block per diagnostic, errors
/// separated by a blank line.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();
    for (i, d) in diagnostics.iter().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        output.push_str(&d.to_string());
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_position() {
        let d = Diagnostic::error(Category::Parse, "expected '{' after condition")
            .at("src/main.cnx", Span::new(12, 4, 1));
        assert_eq!(
            d.to_string(),
            "Error: src/main.cnx:12:4 expected '{' after condition"
        );
    }

    #[test]
    fn test_display_without_position() {
        let d = Diagnostic::error(Category::Io, "failed to read input");
        assert_eq!(d.to_string(), "Error: failed to read input");
    }

    #[test]
    fn test_warning_and_note_labels() {
        let w = Diagnostic::warning(Category::IncludeResolution, "header skipped");
        assert!(w.to_string().starts_with("Warning: "));
        let n = Diagnostic::note(Category::Parse, "see declaration");
        assert!(n.to_string().starts_with("Note: "));
    }

    #[test]
    fn test_notes_are_indented() {
        let d = Diagnostic::error(Category::IncludeResolution, "include cycle detected")
            .with_note("a.cnx includes b.cnx")
            .with_note("b.cnx includes a.cnx");
        let text = d.to_string();
        assert!(text.contains("\n    a.cnx includes b.cnx"));
        assert!(text.contains("\n    b.cnx includes a.cnx"));
    }

    #[test]
    fn test_blank_line_between_diagnostics() {
        let diags = vec![
            Diagnostic::error(Category::Parse, "first"),
            Diagnostic::error(Category::Parse, "second"),
        ];
        let text = format_diagnostics(&diags);
        assert_eq!(text, "Error: first\n\nError: second\n");
    }

    #[test]
    fn test_has_errors() {
        let diags = vec![Diagnostic::warning(Category::Lex, "odd suffix")];
        assert!(!has_errors(&diags));
        let diags = vec![
            Diagnostic::warning(Category::Lex, "odd suffix"),
            Diagnostic::error(Category::Parse, "bad token"),
        ];
        assert!(has_errors(&diags));
    }
}
