use ariadne::{Color, Label, Report, ReportKind, Source};
use std::fmt;

use crate::error::ExprError;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The rule cannot contribute anything.
    Error,
    /// The rule works but is probably not what the author meant.
    Warning,
}

/// A diagnostic message with a span into a rule value or expression.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// How bad it is.
    pub severity: Severity,
    /// Byte range in the source.
    pub span: std::ops::Range<usize>,
    /// Headline message.
    pub message: String,
    /// Text attached to the highlighted span.
    pub label: Option<String>,
}

impl Diagnostic {
    /// An error diagnostic.
    pub fn error(span: std::ops::Range<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            span,
            message: message.into(),
            label: None,
        }
    }

    /// A warning diagnostic.
    pub fn warning(span: std::ops::Range<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            span,
            message: message.into(),
            label: None,
        }
    }

    /// Attach a label to the highlighted span.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Shift the span, for expressions embedded at `offset` in a larger string.
    pub fn offset(mut self, offset: usize) -> Self {
        self.span = self.span.start + offset..self.span.end + offset;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{prefix}: {}", self.message)
    }
}

/// Turn an expression error into diagnostics against its source.
pub fn from_error(source: &str, error: &ExprError) -> Vec<Diagnostic> {
    let whole = 0..source.len();
    match error {
        ExprError::Parse { errors } => errors
            .iter()
            .map(|e| Diagnostic::error(e.span.clone(), e.message.clone()))
            .collect(),
        ExprError::Unsafe { identifier } => {
            let span = source
                .find(identifier.as_str())
                .map_or(whole, |start| start..start + identifier.len());
            vec![Diagnostic::error(span, error.to_string()).with_label("blocked identifier")]
        }
        ExprError::Invalid { .. } | ExprError::Eval { .. } => {
            vec![Diagnostic::error(whole, error.to_string())]
        }
    }
}

/// Render diagnostics using ariadne for pretty terminal output.
pub fn render_diagnostics(source: &str, filename: &str, diagnostics: &[Diagnostic]) -> String {
    let mut output = Vec::new();

    for diag in diagnostics {
        let kind = match diag.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };
        let color = match diag.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let span = (filename, diag.span.clone());
        let label_text = diag.label.as_deref().unwrap_or(&diag.message);
        Report::build(kind, span)
            .with_message(&diag.message)
            .with_label(
                Label::new((filename, diag.span.clone()))
                    .with_message(label_text)
                    .with_color(color),
            )
            .finish()
            .write((filename, Source::from(source)), &mut output)
            .ok();
    }

    String::from_utf8(output).unwrap_or_default()
}
