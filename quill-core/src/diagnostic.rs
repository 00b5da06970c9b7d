//! Diagnostics for the Quill compiler.
//!
//! Every stage reports user-facing problems as `Diagnostic` values and
//! keeps going with a documented local recovery; only internal invariant
//! violations abort (see `error::CoreError::Internal`). Results of the
//! scanner and parser carry their diagnostics alongside the produced
//! structure so a single pass can surface many independent errors.

use crate::span::Span;

/// Whether a diagnostic is a hard error or a recovery note.
///
/// Notes record the local recovery a stage applied (an assumed
/// indentation depth, a skipped statement) at debug level; they never
/// fail a compilation on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Note,
}

/// One reported problem, tied to a source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    /// Stable machine-readable code, e.g. "E0102".
    pub code: Option<&'static str>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span,
            code: None,
        }
    }

    pub fn note(message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Note,
            message: message.into(),
            span,
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Returns true if any diagnostic in the slice is a hard error.
pub fn any_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{FileId, Span};

    #[test]
    fn builder_attaches_code_and_severity() {
        let span = Span::new(FileId(0), 0, 1);
        let diag = Diagnostic::error("bad indentation", span).with_code("E0102");
        assert!(diag.is_error());
        assert_eq!(diag.code, Some("E0102"));

        let note = Diagnostic::note("assumed depth 4", span);
        assert!(!note.is_error());
    }

    #[test]
    fn any_errors_ignores_notes() {
        let span = Span::new(FileId(0), 0, 0);
        let only_notes = vec![Diagnostic::note("skipped", span)];
        assert!(!any_errors(&only_notes));

        let mixed = vec![
            Diagnostic::note("skipped", span),
            Diagnostic::error("unexpected token", span),
        ];
        assert!(any_errors(&mixed));
    }
}
