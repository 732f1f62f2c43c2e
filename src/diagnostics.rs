//! Diagnostic taxonomy shared by the planner, apply walker, graph builder and
//! state manager. Every fallible core operation reports failures as a
//! `Diagnostic` rather than an ad-hoc string so callers (CLI renderer, JSON
//! output, tests) can branch on `kind` instead of parsing messages.

use std::fmt;

/// Coarse error taxonomy. Matches the failure modes the walkers and state
/// manager can produce; does not distinguish API-internal cases any finer
/// than the kind they share blame with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    ConfigError,
    GraphCycle,
    ProviderError,
    PlanError,
    StateError,
    BackendError,
    Cancelled,
    Internal,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::ConfigError => "ConfigError",
            DiagnosticKind::GraphCycle => "GraphCycle",
            DiagnosticKind::ProviderError => "ProviderError",
            DiagnosticKind::PlanError => "PlanError",
            DiagnosticKind::StateError => "StateError",
            DiagnosticKind::BackendError => "BackendError",
            DiagnosticKind::Cancelled => "Cancelled",
            DiagnosticKind::Internal => "Internal",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One entry in the flat, ordered diagnostics collection a walk returns.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub summary: String,
    pub detail: Option<String>,
    pub address: Option<String>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            summary: summary.into(),
            detail: None,
            address: None,
        }
    }

    pub fn warning(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            summary: summary.into(),
            detail: None,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        write!(f, "{}: [{}] {}", sev, self.kind, self.summary)?;
        if let Some(addr) = &self.address {
            write!(f, " (at {})", addr)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// A flat, ordered collection of diagnostics accumulated during a walk.
/// Mirrors what the plan/apply walkers return alongside their main result.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Convert the first error (if any) into an `anyhow::Error`, preserving
    /// its full `Display` rendering. Used at the CLI boundary where the rest
    /// of the codebase still threads `anyhow::Result`.
    pub fn into_result<T>(self, ok: T) -> anyhow::Result<T> {
        if let Some(first) = self.0.iter().find(|d| d.is_error()) {
            anyhow::bail!("{}", first);
        }
        Ok(ok)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
