//! Normalized diagnostics produced from checker and annotator output.
//!
//! A [`Diagnostic`] is an immutable value owned by the invocation result
//! that produced it. The [`parser`] module turns raw tool output into a
//! [`ParsedOutput`], which is either a list of recognized diagnostics or a
//! single synthetic fallback carrying the raw text.

pub mod parser;

pub use parser::{parse, DiagnosticParser, UNPARSED_OUTPUT_CODE};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Severity
// ============================================================================

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Should be looked at but does not fail a round.
    Warning,
    /// Fails a round.
    Error,
}

impl Severity {
    /// Check if this severity keeps the refinement loop going.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Map a tool-reported severity word. Unknown words become warnings.
    #[must_use]
    pub fn from_word(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "error" | "err" | "fatal" => Self::Error,
            _ => Self::Warning,
        }
    }

    /// Check if a severity word marks output that is not a diagnostic.
    #[must_use]
    pub fn is_informational(word: &str) -> bool {
        matches!(
            word.trim().to_ascii_lowercase().as_str(),
            "info" | "note" | "ignore"
        )
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

// ============================================================================
// Diagnostic
// ============================================================================

/// A single reported issue tied to a file location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    /// File the issue was reported against.
    pub file: PathBuf,
    /// 1-based line; 0 when the tool gave no location.
    pub line: u32,
    /// 1-based column, if reported.
    pub column: Option<u32>,
    /// Severity of the issue.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Diagnostic kind, e.g. `bad-return`.
    pub code: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic without a location.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            file: PathBuf::new(),
            line: 0,
            column: None,
            severity,
            message: message.into(),
            code: None,
        }
    }

    /// Create an error-severity diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Create a warning-severity diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Add a file location.
    #[must_use]
    pub fn with_location(mut self, file: impl AsRef<Path>, line: u32) -> Self {
        self.file = file.as_ref().to_path_buf();
        self.line = line;
        self
    }

    /// Add column information.
    #[must_use]
    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    /// Add a diagnostic code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether this is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity.is_blocking()
    }

    /// Identity used to compare diagnostics across rounds.
    ///
    /// Columns are ignored because annotation edits routinely shift them.
    #[must_use]
    pub fn identity(&self) -> (u32, Option<&str>, &str) {
        (self.line, self.code.as_deref(), self.message.as_str())
    }

    /// Format as a string for display.
    #[must_use]
    pub fn format(&self) -> String {
        let mut parts = vec![format!("[{}]", self.severity)];

        if let Some(ref code) = self.code {
            parts.push(format!("[{}]", code));
        }

        parts.push(self.message.clone());

        if !self.file.as_os_str().is_empty() {
            let loc = match (self.line, self.column) {
                (0, _) => self.file.display().to_string(),
                (line, Some(col)) => format!("{}:{}:{}", self.file.display(), line, col),
                (line, None) => format!("{}:{}", self.file.display(), line),
            };
            parts.push(format!("at {}", loc));
        }

        parts.join(" ")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Count error-severity diagnostics.
#[must_use]
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

// ============================================================================
// Parse Result
// ============================================================================

/// Outcome of parsing one tool invocation's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "diagnostics", rename_all = "snake_case")]
pub enum ParsedOutput {
    /// Output matched a known shape (possibly yielding nothing).
    Parsed(Vec<Diagnostic>),
    /// Output matched nothing although the tool failed.
    RawFallback(Diagnostic),
}

impl ParsedOutput {
    /// Borrow the diagnostics regardless of variant.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Parsed(diagnostics) => diagnostics,
            Self::RawFallback(diagnostic) => std::slice::from_ref(diagnostic),
        }
    }

    /// Take the diagnostics regardless of variant.
    #[must_use]
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            Self::Parsed(diagnostics) => diagnostics,
            Self::RawFallback(diagnostic) => vec![diagnostic],
        }
    }

    /// Whether the parser had to fall back to raw text.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::RawFallback(_))
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Aggregate counts over a set of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    pub errors: usize,
    pub warnings: usize,
    /// Count per diagnostic code; uncoded diagnostics are keyed `unknown`.
    pub by_code: BTreeMap<String, usize>,
}

impl DiagnosticSummary {
    /// Summarize a slice of diagnostics.
    #[must_use]
    pub fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        let mut summary = Self::default();
        for diagnostic in diagnostics {
            match diagnostic.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
            }
            let code = diagnostic.code.clone().unwrap_or_else(|| "unknown".into());
            *summary.by_code.entry(code).or_insert(0) += 1;
        }
        summary
    }

    /// Total number of diagnostics.
    #[must_use]
    pub fn total(&self) -> usize {
        self.errors + self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_word() {
        assert_eq!(Severity::from_word("ERROR"), Severity::Error);
        assert_eq!(Severity::from_word("error"), Severity::Error);
        assert_eq!(Severity::from_word("warn"), Severity::Warning);
        assert_eq!(Severity::from_word("whatever"), Severity::Warning);
    }

    #[test]
    fn test_informational_severity_words() {
        assert!(Severity::is_informational("info"));
        assert!(Severity::is_informational(" NOTE "));
        assert!(Severity::is_informational("ignore"));
        assert!(!Severity::is_informational("warning"));
        assert!(!Severity::is_informational("error"));
    }

    #[test]
    fn test_diagnostic_format() {
        let diag = Diagnostic::error("Returned type `str` is not assignable")
            .with_location("pkg/mod.py", 12)
            .with_column(5)
            .with_code("bad-return");

        assert_eq!(
            diag.format(),
            "[ERROR] [bad-return] Returned type `str` is not assignable at pkg/mod.py:12:5"
        );
    }

    #[test]
    fn test_diagnostic_format_without_location() {
        let diag = Diagnostic::warning("something odd");
        assert_eq!(diag.format(), "[WARNING] something odd");
    }

    #[test]
    fn test_identity_ignores_column() {
        let a = Diagnostic::error("x").with_location("a.py", 3).with_column(1);
        let b = Diagnostic::error("x").with_location("a.py", 3).with_column(9);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_parsed_output_accessors() {
        let fallback = ParsedOutput::RawFallback(Diagnostic::error("boom"));
        assert!(fallback.is_fallback());
        assert_eq!(fallback.diagnostics().len(), 1);

        let parsed = ParsedOutput::Parsed(vec![]);
        assert!(!parsed.is_fallback());
        assert!(parsed.into_diagnostics().is_empty());
    }

    #[test]
    fn test_summary() {
        let diags = vec![
            Diagnostic::error("a").with_code("bad-return"),
            Diagnostic::error("b").with_code("bad-return"),
            Diagnostic::warning("c"),
        ];
        let summary = DiagnosticSummary::from_diagnostics(&diags);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.by_code.get("bad-return"), Some(&2));
        assert_eq!(summary.by_code.get("unknown"), Some(&1));
        assert_eq!(error_count(&diags), 2);
    }
}
