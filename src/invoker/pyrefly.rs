//! Pyrefly-backed [`TypeTool`].
//!
//! Command lines:
//!
//! - annotate: `<launcher…> pyrefly autotype <file> <mode args…>`
//! - check: `<launcher…> pyrefly check <file> --output-format json`

use super::process::{CommandSpec, ProcessOutput, ProcessRunner};
use super::{AnnotationMode, AnnotationResult, CancelToken, CheckResult, TypeTool};
use crate::backup::hash_file;
use crate::config::{AutotypeConfig, CheckerSection, UntypedDefBehavior};
use crate::diagnostics::{Diagnostic, DiagnosticParser};
use crate::error::{AutotypeError, InvocationFailure, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default binary name looked up on `PATH`.
pub const DEFAULT_BINARY: &str = "pyrefly";

/// Where the checker lives, resolved once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLocation {
    /// Run `program` with `prefix` before the subcommand.
    Resolved { program: PathBuf, prefix: Vec<String> },
    /// Nothing usable was found; every invocation fails with `NotFound`.
    Missing { reason: String },
}

impl CommandLocation {
    /// Render as a shell-like command prefix for display.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Resolved { program, prefix } => std::iter::once(program.display().to_string())
                .chain(prefix.iter().cloned())
                .collect::<Vec<_>>()
                .join(" "),
            Self::Missing { reason } => format!("<missing: {reason}>"),
        }
    }
}

/// Explicit invoker configuration.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub location: CommandLocation,
    pub annotate_timeout: Duration,
    pub check_timeout: Duration,
    pub max_concurrent_processes: usize,
    pub conservative_args: Vec<String>,
    pub aggressive_args: Vec<String>,
    /// Forwarded checker settings and the diagnostic-kind filter.
    pub checker: CheckerSection,
}

impl InvokerConfig {
    /// Resolve the checker location from configuration using `PATH`.
    #[must_use]
    pub fn resolve(config: &AutotypeConfig) -> Self {
        Self::resolve_with(config, |name| which::which(name).ok())
    }

    /// Resolve the checker location with a custom executable lookup.
    ///
    /// Order: explicit launcher, then the configured or default binary, then
    /// `uv run pyrefly` when only `uv` is installed.
    pub fn resolve_with<F>(config: &AutotypeConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let binary = config
            .tool
            .binary
            .as_ref()
            .map_or_else(|| DEFAULT_BINARY.to_string(), |p| p.display().to_string());

        let launcher = config.tool.launcher.as_deref().and_then(<[String]>::split_first);

        let location = match launcher {
            Some((head, rest)) => match lookup(head.as_str()) {
                Some(program) => CommandLocation::Resolved {
                    program,
                    prefix: rest.iter().cloned().chain(std::iter::once(binary)).collect(),
                },
                None => CommandLocation::Missing {
                    reason: format!("launcher '{head}' not found"),
                },
            },
            None => match lookup(binary.as_str()) {
                Some(program) => CommandLocation::Resolved {
                    program,
                    prefix: Vec::new(),
                },
                None => {
                    let may_use_uv =
                        config.tool.launcher.is_none() && config.tool.binary.is_none();
                    match lookup("uv").filter(|_| may_use_uv) {
                        Some(uv) => CommandLocation::Resolved {
                            program: uv,
                            prefix: vec!["run".to_string(), DEFAULT_BINARY.to_string()],
                        },
                        None => CommandLocation::Missing {
                            reason: format!("'{binary}' not found on PATH"),
                        },
                    }
                }
            },
        };

        debug!("Checker command: {}", location.display());
        Self::from_parts(config, location)
    }

    /// Use an explicit program with no launcher.
    #[must_use]
    pub fn with_program(config: &AutotypeConfig, program: impl Into<PathBuf>) -> Self {
        Self::from_parts(
            config,
            CommandLocation::Resolved {
                program: program.into(),
                prefix: Vec::new(),
            },
        )
    }

    fn from_parts(config: &AutotypeConfig, location: CommandLocation) -> Self {
        Self {
            location,
            annotate_timeout: Duration::from_millis(config.tool.annotate_timeout_ms),
            check_timeout: Duration::from_millis(config.tool.check_timeout_ms),
            max_concurrent_processes: config.tool.max_concurrent_processes,
            conservative_args: config.tool.conservative_args.clone(),
            aggressive_args: config.tool.aggressive_args.clone(),
            checker: config.checker.clone(),
        }
    }

    /// Whether a checker command was found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.location, CommandLocation::Resolved { .. })
    }

    fn mode_args(&self, mode: AnnotationMode) -> &[String] {
        match mode {
            AnnotationMode::Conservative => &self.conservative_args,
            AnnotationMode::Aggressive => &self.aggressive_args,
        }
    }
}

/// Runs pyrefly as a subprocess.
#[derive(Debug, Clone)]
pub struct PyreflyInvoker {
    config: InvokerConfig,
    runner: ProcessRunner,
}

impl PyreflyInvoker {
    /// Create an invoker with its own process limit.
    #[must_use]
    pub fn new(config: InvokerConfig) -> Self {
        let runner = ProcessRunner::new(config.max_concurrent_processes);
        Self { config, runner }
    }

    /// Create an invoker sharing an existing process limit.
    #[must_use]
    pub fn with_runner(config: InvokerConfig, runner: ProcessRunner) -> Self {
        Self { config, runner }
    }

    #[must_use]
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    #[must_use]
    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    fn base_command(&self, subcommand: &str, timeout: Duration) -> Result<CommandSpec> {
        match &self.config.location {
            CommandLocation::Resolved { program, prefix } => Ok(CommandSpec::new(
                format!("{DEFAULT_BINARY} {subcommand}"),
                program,
                timeout,
            )
            .args(prefix)
            .arg(subcommand)),
            CommandLocation::Missing { reason } => Err(AutotypeError::tool(
                format!("{DEFAULT_BINARY} {subcommand}"),
                InvocationFailure::NotFound,
                reason.clone(),
            )),
        }
    }

    /// Build the annotate command for `path`.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` tool error if no checker was resolved.
    pub fn annotate_command(&self, path: &Path, mode: AnnotationMode) -> Result<CommandSpec> {
        Ok(self
            .base_command("autotype", self.config.annotate_timeout)?
            .arg(path)
            .args(self.config.mode_args(mode)))
    }

    /// Build the check command for `path`.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` tool error if no checker was resolved.
    pub fn check_command(&self, path: &Path) -> Result<CommandSpec> {
        let spec = self
            .base_command("check", self.config.check_timeout)?
            .arg(path);
        Ok(self.with_checker_args(spec))
    }

    fn with_checker_args(&self, mut spec: CommandSpec) -> CommandSpec {
        spec = spec.args(["--output-format", "json"]);
        if let Some(version) = &self.config.checker.python_version {
            spec = spec.arg("--python-version").arg(version);
        }
        let behavior = self.config.checker.untyped_def_behavior;
        if behavior != UntypedDefBehavior::default() {
            spec = spec.arg("--untyped-def-behavior").arg(behavior.as_arg());
        }
        spec
    }

    /// Parse output and drop diagnostics whose kind is disabled.
    fn diagnostics_from(&self, path: &Path, output: &ProcessOutput) -> (Vec<Diagnostic>, bool) {
        let parsed = DiagnosticParser::for_file(path).parse(&output.combined(), output.exit_code);
        let fallback = parsed.is_fallback();
        let diagnostics = parsed
            .into_diagnostics()
            .into_iter()
            .filter(|d| self.config.checker.is_enabled(d.code.as_deref()))
            .collect();
        (diagnostics, fallback)
    }

    /// Check a whole project directory (the checker discovers files itself).
    ///
    /// # Errors
    ///
    /// Returns a tool error if the checker cannot be run.
    pub async fn check_project(&self, root: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        let spec = self
            .base_command("check", self.config.check_timeout)?
            .current_dir(root);
        let spec = self.with_checker_args(spec);
        let output = self.runner.run(&spec, cancel).await?;
        let (diagnostics, fallback) = self.diagnostics_from(root, &output);
        Ok(CheckResult {
            diagnostics,
            exit_status: output.exit_code,
            raw_output: output.combined(),
            fallback,
            duration_ms: duration_ms(output.duration),
        })
    }
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

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl TypeTool for PyreflyInvoker {
    fn name(&self) -> &str {
        DEFAULT_BINARY
    }

    async fn run_annotate(
        &self,
        path: &Path,
        mode: AnnotationMode,
        cancel: &CancelToken,
    ) -> Result<AnnotationResult> {
        ensure_file(path)?;
        let spec = self.annotate_command(path, mode)?;

        let before = hash_file(path)?;
        let output = self.runner.run(&spec, cancel).await?;
        // A file removed by the annotator counts as changed.
        let changed = hash_file(path).map_or(true, |after| after != before);

        let (diagnostics, _) = self.diagnostics_from(path, &output);
        info!(
            "Annotated {} ({mode}): changed={}, {} diagnostic(s)",
            path.display(),
            changed,
            diagnostics.len()
        );

        Ok(AnnotationResult {
            changed,
            diagnostics,
            raw_output: output.combined(),
            exit_code: output.exit_code,
            duration_ms: duration_ms(output.duration),
        })
    }

    async fn run_check(&self, path: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        ensure_file(path)?;
        let spec = self.check_command(path)?;
        let output = self.runner.run(&spec, cancel).await?;

        let (diagnostics, fallback) = self.diagnostics_from(path, &output);
        info!(
            "Checked {}: exit={:?}, {} diagnostic(s)",
            path.display(),
            output.exit_code,
            diagnostics.len()
        );

        Ok(CheckResult {
            diagnostics,
            exit_status: output.exit_code,
            raw_output: output.combined(),
            fallback,
            duration_ms: duration_ms(output.duration),
        })
    }

    async fn run_check_project(&self, root: &Path, cancel: &CancelToken) -> Result<CheckResult> {
        if !root.is_dir() {
            return Err(AutotypeError::FileNotFound {
                path: root.to_path_buf(),
            });
        }
        let result = self.check_project(root, cancel).await?;
        info!(
            "Checked project {}: exit={:?}, {} diagnostic(s)",
            root.display(),
            result.exit_status,
            result.diagnostics.len()
        );
        Ok(result)
    }
}
