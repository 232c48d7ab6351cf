//! Project context aggregation.
//!
//! A single directory walk collects Python files matching the include globs
//! (exclusions always win), computes per-file annotation statistics, and
//! aggregates them into a [`ProjectContext`] used to prioritise batch runs.
//! Checker diagnostics are only attached on the explicit eager path,
//! [`ProjectContext::populate_diagnostics`].

pub mod analysis;

pub use analysis::{FileAnalysis, FunctionInfo, MissingAnnotation, MissingKind, PythonAnalyzer};

use crate::config::{build_globset, AutotypeConfig};
use crate::diagnostics::DiagnosticSummary;
use crate::error::{AutotypeError, InvocationFailure, Result};
use crate::invoker::{CancelToken, TypeTool};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Child name used to test whether a whole directory is excluded.
const DIR_PROBE: &str = "autotype_probe_child";

/// Statistics for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub path: PathBuf,
    /// Path relative to the project root.
    pub relative: PathBuf,
    pub lines: usize,
    pub functions: usize,
    pub annotated_functions: usize,
    pub missing_annotations: usize,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Present only after [`ProjectContext::populate_diagnostics`].
    pub diagnostics: Option<DiagnosticSummary>,
    /// Why the eager check failed for this file.
    pub check_error: Option<String>,
}

impl FileStats {
    /// Fraction of functions that are fully annotated; 1.0 with no functions.
    #[must_use]
    pub fn coverage(&self) -> f64 {
        ratio(self.annotated_functions, self.functions)
    }
}

/// Aggregate figures over a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub file_count: usize,
    pub total_lines: usize,
    pub total_functions: usize,
    pub annotated_functions: usize,
    pub missing_annotations: usize,
    /// Annotated over total functions.
    pub coverage: f64,
    /// Error/warning totals once diagnostics are populated.
    pub diagnostics: Option<DiagnosticSummary>,
}

/// Aggregate metadata about a project tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub root: PathBuf,
    /// Files in ascending relative-path order.
    pub files: Vec<FileStats>,
    /// Configuration the scan ran with.
    pub config: AutotypeConfig,
    /// Files that matched an include pattern but were excluded.
    pub excluded: usize,
    /// Whether a project-wide check exited cleanly (eager mode only).
    pub checker_compatible: Option<bool>,
    pub scanned_at: DateTime<Utc>,
}

impl ProjectContext {
    /// Aggregate figures.
    #[must_use]
    pub fn summary(&self) -> ContextSummary {
        let total_functions = self.files.iter().map(|f| f.functions).sum();
        let annotated_functions = self.files.iter().map(|f| f.annotated_functions).sum();

        let diagnostics = self
            .files
            .iter()
            .filter_map(|f| f.diagnostics.as_ref())
            .fold(None, |acc: Option<DiagnosticSummary>, summary| {
                let mut acc = acc.unwrap_or_default();
                acc.errors += summary.errors;
                acc.warnings += summary.warnings;
                for (code, count) in &summary.by_code {
                    *acc.by_code.entry(code.clone()).or_insert(0) += count;
                }
                Some(acc)
            });

        ContextSummary {
            file_count: self.files.len(),
            total_lines: self.files.iter().map(|f| f.lines).sum(),
            total_functions,
            annotated_functions,
            missing_annotations: self.files.iter().map(|f| f.missing_annotations).sum(),
            coverage: ratio(annotated_functions, total_functions),
            diagnostics,
        }
    }

    /// Files by descending missing-annotation count, ties by path.
    #[must_use]
    pub fn prioritized(&self) -> Vec<&FileStats> {
        prioritize(&self.files)
    }

    /// Look up a file by its relative path.
    #[must_use]
    pub fn file(&self, relative: impl AsRef<Path>) -> Option<&FileStats> {
        let relative = relative.as_ref();
        self.files.iter().find(|f| f.relative == relative)
    }

    /// Run the checker on every file and attach diagnostic summaries.
    ///
    /// Per-file failures are recorded on the file. A missing checker aborts
    /// with the first `NotFound` error since no file could succeed.
    ///
    /// # Errors
    ///
    /// Returns the `NotFound` tool error if the checker is unavailable.
    pub async fn populate_diagnostics<T: TypeTool>(
        &mut self,
        tool: &T,
        max_concurrent: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        let permits = Semaphore::new(max_concurrent.max(1));
        let permits = &permits;

        let results = join_all(self.files.iter().map(|file| async move {
            let _permit = permits.acquire().await.ok();
            tool.run_check(&file.path, cancel).await
        }))
        .await;

        for (file, result) in self.files.iter_mut().zip(results) {
            match result {
                Ok(check) => {
                    file.diagnostics = Some(DiagnosticSummary::from_diagnostics(&check.diagnostics));
                    file.check_error = None;
                }
                Err(e) if e.invocation_failure() == Some(InvocationFailure::NotFound) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!("Check failed for {}: {}", file.relative.display(), e);
                    file.diagnostics = None;
                    file.check_error = Some(e.to_string());
                }
            }
        }

        info!("Populated diagnostics for {} file(s)", self.files.len());
        Ok(())
    }
}

/// Order files by descending missing-annotation count, ties by path.
#[must_use]
pub fn prioritize(files: &[FileStats]) -> Vec<&FileStats> {
    let mut files: Vec<&FileStats> = files.iter().collect();
    files.sort_by(|a, b| {
        b.missing_annotations
            .cmp(&a.missing_annotations)
            .then_with(|| a.relative.cmp(&b.relative))
    });
    files
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        1.0
    } else {
        part as f64 / whole as f64
    }
}

/// Walks a project tree and builds a [`ProjectContext`].
#[derive(Debug, Clone)]
pub struct ProjectScanner {
    root: PathBuf,
    includes: GlobSet,
    excludes: GlobSet,
    config: AutotypeConfig,
    analyzer: PythonAnalyzer,
}

impl ProjectScanner {
    /// Create a scanner using the configuration's include/exclude globs.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::InvalidConfig`] for a malformed glob and
    /// [`AutotypeError::FileNotFound`] if `root` is not a directory.
    pub fn new(root: impl Into<PathBuf>, config: &AutotypeConfig) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(AutotypeError::FileNotFound { path: root });
        }
        Ok(Self {
            includes: build_globset("project.includes", &config.project.includes)?,
            excludes: build_globset("project.excludes", &config.project.excludes)?,
            root,
            config: config.clone(),
            analyzer: PythonAnalyzer::new()?,
        })
    }

    /// Create a scanner with explicit globs on top of the default config.
    ///
    /// # Errors
    ///
    /// See [`ProjectScanner::new`].
    pub fn with_globs(
        root: impl Into<PathBuf>,
        includes: Vec<String>,
        excludes: Vec<String>,
    ) -> Result<Self> {
        let config = AutotypeConfig::default()
            .with_includes(includes)
            .with_excludes(excludes);
        Self::new(root, &config)
    }

    fn is_excluded_dir(&self, relative: &Path) -> bool {
        self.excludes.is_match(relative) || self.excludes.is_match(relative.join(DIR_PROBE))
    }

    /// Walk the tree once and collect statistics.
    ///
    /// # Errors
    ///
    /// Currently infallible after construction; unreadable entries are logged
    /// and skipped.
    pub fn scan(&self) -> Result<ProjectContext> {
        let mut files = Vec::new();
        let mut excluded = 0usize;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .map_or(true, |rel| !self.is_excluded_dir(rel))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if !self.includes.is_match(relative) {
                continue;
            }
            if self.excludes.is_match(relative) {
                excluded += 1;
                continue;
            }

            match self.file_stats(entry.path(), relative) {
                Ok(stats) => files.push(stats),
                Err(e) => warn!("Skipping {}: {}", relative.display(), e),
            }
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));

        info!(
            "Scanned {}: {} file(s), {} excluded",
            self.root.display(),
            files.len(),
            excluded
        );

        Ok(ProjectContext {
            root: self.root.clone(),
            files,
            config: self.config.clone(),
            excluded,
            checker_compatible: None,
            scanned_at: Utc::now(),
        })
    }

    fn file_stats(&self, path: &Path, relative: &Path) -> Result<FileStats> {
        let metadata = std::fs::metadata(path)?;
        let analysis = self.analyzer.analyze_file(path)?;
        debug!(
            "{}: {} function(s), {} missing",
            relative.display(),
            analysis.total_functions(),
            analysis.missing_count()
        );

        Ok(FileStats {
            path: path.to_path_buf(),
            relative: relative.to_path_buf(),
            lines: analysis.lines,
            functions: analysis.total_functions(),
            annotated_functions: analysis.annotated_functions(),
            missing_annotations: analysis.missing_count(),
            size_bytes: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            diagnostics: None,
            check_error: None,
        })
    }
}

/// Scan `root` with the configuration's globs.
///
/// # Errors
///
/// See [`ProjectScanner::new`].
pub fn scan(root: impl Into<PathBuf>, config: &AutotypeConfig) -> Result<ProjectContext> {
    ProjectScanner::new(root, config)?.scan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostic;
    use crate::testing::{MockTypeTool, TestFixture};

    fn relative_paths(context: &ProjectContext) -> Vec<String> {
        context
            .files
            .iter()
            .map(|f| f.relative.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_scan_default_globs() {
        let fixture = TestFixture::python_project();
        let context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();

        assert_eq!(
            relative_paths(&context),
            vec!["main.py", "pkg/__init__.py", "pkg/core.py", "pkg/util.py"]
        );
        assert!(context.checker_compatible.is_none());
        assert!(context.files.iter().all(|f| f.diagnostics.is_none()));
    }

    #[test]
    fn test_scan_is_deterministic() {
        let fixture = TestFixture::python_project();
        let config = AutotypeConfig::default();
        let first = relative_paths(&scan(fixture.path(), &config).unwrap());
        let second = relative_paths(&scan(fixture.path(), &config).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let fixture = TestFixture::python_project();
        let scanner = ProjectScanner::with_globs(
            fixture.path(),
            vec!["**/*.py".to_string(), "pkg/util.py".to_string()],
            vec!["pkg/util.py".to_string()],
        )
        .unwrap();
        let context = scanner.scan().unwrap();

        let paths = relative_paths(&context);
        assert!(!paths.contains(&"pkg/util.py".to_string()));
        assert!(paths.contains(&"pkg/core.py".to_string()));
        // Without default excludes the hidden and vendored trees are visible.
        assert!(paths.contains(&".venv/lib/site.py".to_string()));
        assert_eq!(context.excluded, 1);
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let fixture = TestFixture::python_project();
        let context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();
        let paths = relative_paths(&context);
        assert!(!paths.iter().any(|p| p.starts_with(".venv")));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
        assert!(!paths.iter().any(|p| p.contains("__pycache__")));
    }

    #[test]
    fn test_file_stats_and_summary() {
        let fixture = TestFixture::python_project();
        let context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();

        let main = context.file("main.py").unwrap();
        // add(a, b) and greet(self, name), plus COUNT.
        assert_eq!(main.functions, 2);
        assert_eq!(main.annotated_functions, 0);
        assert_eq!(main.missing_annotations, 6);
        assert!(main.size_bytes > 0);
        assert!(main.modified.is_some());

        let core = context.file("pkg/core.py").unwrap();
        assert_eq!(core.missing_annotations, 0);
        assert!((core.coverage() - 1.0).abs() < f64::EPSILON);

        let summary = context.summary();
        assert_eq!(summary.file_count, 4);
        assert_eq!(summary.total_functions, 5);
        assert_eq!(summary.annotated_functions, 2);
        assert!((summary.coverage - 0.4).abs() < 1e-9);
        assert!(summary.diagnostics.is_none());
    }

    #[test]
    fn test_prioritized_order() {
        let fixture = TestFixture::new();
        fixture.write_file("b.py", "def f(a):\n    pass\n");
        fixture.write_file("a.py", "def f(a):\n    pass\n");
        fixture.write_file("c.py", "def f(a, b, c):\n    pass\n");
        fixture.write_file("d.py", "def f() -> None:\n    pass\n");

        let context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();
        let order: Vec<_> = context
            .prioritized()
            .iter()
            .map(|f| f.relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(order, vec!["c.py", "a.py", "b.py", "d.py"]);
    }

    #[test]
    fn test_empty_project() {
        let fixture = TestFixture::new();
        let context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();
        assert!(context.files.is_empty());
        let summary = context.summary();
        assert_eq!(summary.file_count, 0);
        assert!((summary.coverage - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        let fixture = TestFixture::new();
        let err = ProjectScanner::with_globs(fixture.path(), vec!["[".to_string()], vec![])
            .unwrap_err();
        assert!(err.aborts_batch());
    }

    #[test]
    fn test_missing_root() {
        let err = scan("/definitely/not/a/project", &AutotypeConfig::default()).unwrap_err();
        assert!(matches!(err, AutotypeError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_populate_diagnostics() {
        let fixture = TestFixture::python_project();
        let mut context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();
        let tool = MockTypeTool::new().check_always(vec![
            Diagnostic::error("bad").with_code("bad-return"),
            Diagnostic::warning("meh"),
        ]);

        context
            .populate_diagnostics(&tool, 2, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(tool.check_calls(), 4);
        assert!(context.files.iter().all(|f| f.diagnostics.is_some()));
        let summary = context.summary().diagnostics.unwrap();
        assert_eq!(summary.errors, 4);
        assert_eq!(summary.warnings, 4);
        assert_eq!(summary.by_code.get("bad-return"), Some(&4));
    }

    #[tokio::test]
    async fn test_populate_diagnostics_missing_checker() {
        let fixture = TestFixture::python_project();
        let mut context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();
        let tool = MockTypeTool::new().check_fails(InvocationFailure::NotFound);

        let err = context
            .populate_diagnostics(&tool, 2, &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.invocation_failure(), Some(InvocationFailure::NotFound));
    }

    #[tokio::test]
    async fn test_populate_diagnostics_records_per_file_failures() {
        let fixture = TestFixture::python_project();
        let mut context = scan(fixture.path(), &AutotypeConfig::default()).unwrap();
        let tool = MockTypeTool::new().check_fails(InvocationFailure::Timeout);

        context
            .populate_diagnostics(&tool, 1, &CancelToken::new())
            .await
            .unwrap();
        assert!(context.files.iter().all(|f| f.check_error.is_some()));
        assert!(context.summary().diagnostics.is_none());
    }
}
