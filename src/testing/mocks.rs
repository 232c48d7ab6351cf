//! Scripted [`TypeTool`] implementation.

use crate::backup::hash_file;
use crate::diagnostics::Diagnostic;
use crate::error::{AutotypeError, InvocationFailure, Result};
use crate::invoker::{AnnotationMode, AnnotationResult, CancelToken, CheckResult, TypeTool};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One scripted annotate outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockAnnotation {
    /// Content written to the file, if any.
    pub write: Option<String>,
    /// Reported `changed` flag when nothing is written. A written outcome
    /// reports whether the file content hash moved.
    pub changed: bool,
    /// Reported diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

/// Test double for the external annotator and checker.
///
/// Scripts are consumed one entry per call; the last entry repeats. An empty
/// annotate script is a no-op annotator, an empty check script a clean check.
///
/// # Example
///
/// ```rust,ignore
/// let tool = MockTypeTool::new()
///     .annotate_changes("x: int = 1\n")
///     .check_sequence(vec![vec![error], vec![]]);
/// ```
#[derive(Debug, Default)]
pub struct MockTypeTool {
    annotations: Vec<MockAnnotation>,
    checks: Vec<Vec<Diagnostic>>,
    annotate_failure: Option<InvocationFailure>,
    check_failure: Option<(usize, InvocationFailure)>,
    annotate_calls: AtomicUsize,
    check_calls: AtomicUsize,
    project_checks: AtomicUsize,
}

impl MockTypeTool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `content` on every annotate call.
    ///
    /// Only the first call that actually rewrites the file reports a change;
    /// later calls find the content already in place.
    #[must_use]
    pub fn annotate_changes(mut self, content: &str) -> Self {
        self.annotations = vec![MockAnnotation {
            write: Some(content.to_string()),
            changed: false,
            diagnostics: Vec::new(),
        }];
        self
    }

    /// Script annotate outcomes call by call.
    #[must_use]
    pub fn annotate_sequence(mut self, outcomes: Vec<MockAnnotation>) -> Self {
        self.annotations = outcomes;
        self
    }

    /// Make every annotate call fail.
    #[must_use]
    pub fn annotate_fails(mut self, reason: InvocationFailure) -> Self {
        self.annotate_failure = Some(reason);
        self
    }

    /// Report the same diagnostics on every check.
    #[must_use]
    pub fn check_always(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.checks = vec![diagnostics];
        self
    }

    /// Script check diagnostics call by call.
    #[must_use]
    pub fn check_sequence(mut self, sequence: Vec<Vec<Diagnostic>>) -> Self {
        self.checks = sequence;
        self
    }

    /// Make every check fail.
    #[must_use]
    pub fn check_fails(self, reason: InvocationFailure) -> Self {
        self.check_fails_after(0, reason)
    }

    /// Let `successes` checks succeed, then fail every later one.
    #[must_use]
    pub fn check_fails_after(mut self, successes: usize, reason: InvocationFailure) -> Self {
        self.check_failure = Some((successes, reason));
        self
    }

    /// Number of annotate calls so far.
    pub fn annotate_calls(&self) -> usize {
        self.annotate_calls.load(Ordering::SeqCst)
    }

    /// Number of check calls so far.
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Number of project-wide checks so far.
    pub fn project_checks(&self) -> usize {
        self.project_checks.load(Ordering::SeqCst)
    }
}

fn scripted<T>(script: &[T], call: usize) -> Option<&T> {
    script.get(call).or_else(|| script.last())
}

fn ensure_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AutotypeError::FileNotFound {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl TypeTool for MockTypeTool {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run_annotate(
        &self,
        path: &Path,
        _mode: AnnotationMode,
        cancel: &CancelToken,
    ) -> Result<AnnotationResult> {
        let call = self.annotate_calls.fetch_add(1, Ordering::SeqCst);
        ensure_file(path)?;

        if cancel.is_cancelled() {
            return Err(AutotypeError::tool(
                "mock autotype",
                InvocationFailure::Cancelled,
                "cancelled",
            ));
        }
        if let Some(reason) = self.annotate_failure {
            return Err(AutotypeError::tool("mock autotype", reason, "scripted failure"));
        }

        let Some(outcome) = scripted(&self.annotations, call) else {
            return Ok(AnnotationResult::unchanged());
        };
        let changed = match &outcome.write {
            Some(content) => {
                let before = hash_file(path)?;
                std::fs::write(path, content)?;
                hash_file(path)? != before
            }
            None => outcome.changed,
        };

        Ok(AnnotationResult {
            changed,
            diagnostics: outcome.diagnostics.clone(),
            raw_output: String::new(),
            exit_code: Some(0),
            duration_ms: 0,
        })
    }

    async fn run_check(&self, path: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        let call = self.check_calls.fetch_add(1, Ordering::SeqCst);
        ensure_file(path)?;

        if cancel.is_cancelled() {
            return Err(AutotypeError::tool(
                "mock check",
                InvocationFailure::Cancelled,
                "cancelled",
            ));
        }
        if let Some((successes, reason)) = self.check_failure {
            if call >= successes {
                return Err(AutotypeError::tool("mock check", reason, "scripted failure"));
            }
        }

        let diagnostics = scripted(&self.checks, call).cloned().unwrap_or_default();
        Ok(CheckResult::with_diagnostics(diagnostics))
    }

    async fn run_check_project(&self, root: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        if !root.is_dir() {
            return Err(AutotypeError::FileNotFound {
                path: root.to_path_buf(),
            });
        }
        let call = self.project_checks.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(AutotypeError::tool(
                "mock check",
                InvocationFailure::Cancelled,
                "cancelled",
            ));
        }
        if let Some((_, reason)) = self.check_failure {
            return Err(AutotypeError::tool("mock check", reason, "scripted failure"));
        }

        let diagnostics = scripted(&self.checks, call).cloned().unwrap_or_default();
        Ok(CheckResult::with_diagnostics(diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestFixture;

    #[tokio::test]
    async fn test_default_is_noop_and_clean() {
        let fixture = TestFixture::new();
        let file = fixture.write_file("a.py", "x = 1\n");
        let tool = MockTypeTool::new();
        let cancel = CancelToken::new();

        let annotation = tool
            .run_annotate(&file, AnnotationMode::Conservative, &cancel)
            .await
            .unwrap();
        assert!(annotation.is_noop());
        assert!(tool.run_check(&file, &cancel).await.unwrap().passed());
        assert_eq!(tool.annotate_calls(), 1);
        assert_eq!(tool.check_calls(), 1);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_entry() {
        let fixture = TestFixture::new();
        let file = fixture.write_file("a.py", "x = 1\n");
        let tool = MockTypeTool::new().check_sequence(vec![
            vec![Diagnostic::error("first")],
            vec![Diagnostic::error("second")],
        ]);
        let cancel = CancelToken::new();

        let messages: Vec<String> = futures::future::join_all(
            (0..3).map(|_| tool.run_check(&file, &cancel)),
        )
        .await
        .into_iter()
        .map(|r| r.unwrap().diagnostics[0].message.clone())
        .collect();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages.iter().filter(|m| *m == "second").count(), 2);
    }

    #[tokio::test]
    async fn test_annotate_writes_content() {
        let fixture = TestFixture::new();
        let file = fixture.write_file("a.py", "x = 1\n");
        let tool = MockTypeTool::new().annotate_changes("x: int = 1\n");

        let result = tool
            .run_annotate(&file, AnnotationMode::Aggressive, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.changed);
        assert_eq!(fixture.read_file("a.py"), "x: int = 1\n");
    }

    #[tokio::test]
    async fn test_rewriting_same_content_is_unchanged() {
        let fixture = TestFixture::new();
        let file = fixture.write_file("a.py", "x = 1\n");
        let tool = MockTypeTool::new().annotate_changes("x: int = 1\n");
        let cancel = CancelToken::new();

        let first = tool
            .run_annotate(&file, AnnotationMode::Conservative, &cancel)
            .await
            .unwrap();
        let second = tool
            .run_annotate(&file, AnnotationMode::Conservative, &cancel)
            .await
            .unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert!(second.is_noop());
        assert_eq!(tool.annotate_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let fixture = TestFixture::new();
        let file = fixture.write_file("a.py", "x = 1\n");
        let tool = MockTypeTool::new()
            .annotate_fails(InvocationFailure::Crashed)
            .check_fails(InvocationFailure::NotFound);
        let cancel = CancelToken::new();

        let err = tool
            .run_annotate(&file, AnnotationMode::Conservative, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.invocation_failure(), Some(InvocationFailure::Crashed));

        let err = tool.run_check(&file, &cancel).await.unwrap_err();
        assert_eq!(err.invocation_failure(), Some(InvocationFailure::NotFound));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let tool = MockTypeTool::new();
        let err = tool
            .run_check(Path::new("/no/such/file.py"), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutotypeError::FileNotFound { .. }));
    }
}
