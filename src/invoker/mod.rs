//! External annotator/checker invocation.
//!
//! The [`TypeTool`] trait is the seam between the refinement engine and the
//! outside world: the controller only ever calls [`TypeTool::run_annotate`]
//! and [`TypeTool::run_check`]. [`PyreflyInvoker`] is the production
//! implementation; [`crate::testing::MockTypeTool`] scripts outcomes in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use autotype::invoker::{CancelToken, InvokerConfig, PyreflyInvoker, TypeTool};
//! use autotype::config::AutotypeConfig;
//!
//! let config = AutotypeConfig::load(".")?;
//! let invoker = PyreflyInvoker::new(InvokerConfig::resolve(&config));
//! let result = invoker.run_check(Path::new("app.py"), &CancelToken::new()).await?;
//! println!("{} errors", result.error_count());
//! ```

pub mod process;
pub mod pyrefly;

pub use process::{CommandSpec, ProcessOutput, ProcessRunner};
pub use pyrefly::{CommandLocation, InvokerConfig, PyreflyInvoker};

use crate::diagnostics::{error_count, Diagnostic};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

// ============================================================================
// Annotation Mode
// ============================================================================

/// How eagerly the annotator should infer annotations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationMode {
    /// Only annotations the annotator is confident about.
    #[default]
    Conservative,
    /// Annotate as much as possible.
    Aggressive,
}

impl fmt::Display for AnnotationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl FromStr for AnnotationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!(
                "unknown mode '{other}' (expected conservative or aggressive)"
            )),
        }
    }
}

// ============================================================================
// Invocation Results
// ============================================================================

/// Result of one annotate invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationResult {
    /// Whether the file content changed.
    pub changed: bool,
    /// Diagnostics reported by the annotator, in output order.
    pub diagnostics: Vec<Diagnostic>,
    /// Raw stdout followed by stderr.
    pub raw_output: String,
    /// Process exit code.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl AnnotationResult {
    /// A no-op annotation with nothing to report.
    #[must_use]
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            diagnostics: Vec::new(),
            raw_output: String::new(),
            exit_code: Some(0),
            duration_ms: 0,
        }
    }

    /// Whether the annotator confirmed there is nothing left to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.changed && self.diagnostics.is_empty()
    }
}

/// Result of one check invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Diagnostics reported by the checker, in output order.
    pub diagnostics: Vec<Diagnostic>,
    /// Process exit code.
    pub exit_status: Option<i32>,
    /// Raw stdout followed by stderr.
    pub raw_output: String,
    /// Whether the parser fell back to raw text.
    pub fallback: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CheckResult {
    /// A clean check.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            diagnostics: Vec::new(),
            exit_status: Some(0),
            raw_output: String::new(),
            fallback: false,
            duration_ms: 0,
        }
    }

    /// A check reporting the given diagnostics with exit status 1.
    #[must_use]
    pub fn with_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let exit_status = if error_count(&diagnostics) > 0 { 1 } else { 0 };
        Self {
            diagnostics,
            exit_status: Some(exit_status),
            raw_output: String::new(),
            fallback: false,
            duration_ms: 0,
        }
    }

    /// Number of error-severity diagnostics.
    #[must_use]
    pub fn error_count(&self) -> usize {
        error_count(&self.diagnostics)
    }

    /// Whether the check passed (no errors).
    #[must_use]
    pub fn passed(&self) -> bool {
        self.error_count() == 0
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation handle shared between a caller and invocations.
///
/// Cloning yields a handle to the same token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TypeTool Trait
// ============================================================================

/// Abstraction over the external annotator and checker.
///
/// Implementations must be `Send + Sync` so independent sessions can share
/// one tool across tasks.
#[async_trait]
pub trait TypeTool: Send + Sync {
    /// Display name used in logs and errors.
    fn name(&self) -> &str;

    /// Run the annotator against `path`, mutating it in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AutotypeError::ToolInvocation`] when the tool cannot be
    /// run to completion, or [`crate::AutotypeError::FileNotFound`].
    async fn run_annotate(
        &self,
        path: &Path,
        mode: AnnotationMode,
        cancel: &CancelToken,
    ) -> Result<AnnotationResult>;

    /// Run the checker against `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AutotypeError::ToolInvocation`] when the tool cannot be
    /// run to completion, or [`crate::AutotypeError::FileNotFound`].
    async fn run_check(&self, path: &Path, cancel: &CancelToken) -> Result<CheckResult>;

    /// Run the checker over a whole project directory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AutotypeError::ToolInvocation`] when the tool cannot be
    /// run to completion, or [`crate::AutotypeError::FileNotFound`].
    async fn run_check_project(&self, root: &Path, cancel: &CancelToken) -> Result<CheckResult>;
}

#[async_trait]
impl<T: TypeTool + ?Sized> TypeTool for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run_annotate(
        &self,
        path: &Path,
        mode: AnnotationMode,
        cancel: &CancelToken,
    ) -> Result<AnnotationResult> {
        (**self).run_annotate(path, mode, cancel).await
    }

    async fn run_check(&self, path: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        (**self).run_check(path, cancel).await
    }

    async fn run_check_project(&self, root: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        (**self).run_check_project(root, cancel).await
    }
}
