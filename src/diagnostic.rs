use std::fmt;

use crate::span::Span;

/// A compiler diagnostic (error or warning) raised while lowering a kernel.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagKind,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    /// Secondary locations, e.g. the other side of a conflict.
    pub related: Vec<(String, Span)>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

/// Failure classification. Every diagnostic belongs to exactly one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagKind {
    /// Disallowed field shape: reference, VLA, unsupported precision,
    /// non-trivial aggregate, malformed resource type.
    StructuralViolation,
    /// Resource type nested inside a union.
    UnionResourceViolation,
    /// Flattened parameter list larger than the target budget.
    SizeBudgetExceeded,
    /// Incompatible execution constraints from two declarations.
    AttributeConflict,
    /// Disallowed construct reachable from a kernel.
    CallGraphViolation,
    /// Kernel name type is not usable as a kernel name.
    KernelNaming,
    /// The kernel object itself is not a decomposable aggregate.
    InvalidKernelObject,
}

impl DiagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagKind::StructuralViolation => "structural-violation",
            DiagKind::UnionResourceViolation => "union-resource-violation",
            DiagKind::SizeBudgetExceeded => "size-budget-exceeded",
            DiagKind::AttributeConflict => "attribute-conflict",
            DiagKind::CallGraphViolation => "call-graph-violation",
            DiagKind::KernelNaming => "kernel-naming",
            DiagKind::InvalidKernelObject => "invalid-kernel-object",
        }
    }
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Diagnostic {
    pub fn error(kind: DiagKind, message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message,
            span,
            notes: Vec::new(),
            related: Vec::new(),
            help: None,
        }
    }

    pub fn warning(kind: DiagKind, message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message, span)
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_related(mut self, message: String, span: Span) -> Self {
        self.related.push((message, span));
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let clamp = |span: Span| {
            let end = (span.end as usize).min(source.len());
            (span.start as usize).min(end)..end
        };

        let range = clamp(self.span);
        let mut report = Report::build(kind, filename, range.start)
            .with_code(self.kind.as_str())
            .with_message(&self.message)
            .with_label(
                Label::new((filename, range))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for (message, span) in &self.related {
            report = report.with_label(
                Label::new((filename, clamp(*span)))
                    .with_message(message)
                    .with_color(Color::Blue),
            );
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        let _ = report.finish().eprint((filename, Source::from(source)));
    }

    /// One-line rendering for units without source text.
    pub fn render_plain(&self) -> String {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let mut out = format!(
            "{}[{}]: {} (at {}..{})",
            level, self.kind, self.message, self.span.start, self.span.end
        );
        for (message, span) in &self.related {
            out.push_str(&format!("\n  note: {} (at {}..{})", message, span.start, span.end));
        }
        for note in &self.notes {
            out.push_str(&format!("\n  note: {}", note));
        }
        if let Some(help) = &self.help {
            out.push_str(&format!("\n  help: {}", help));
        }
        out
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
