//! Timed, cancellable, bounded subprocess execution.
//!
//! Every external process goes through a [`ProcessRunner`], which caps the
//! number of concurrently running children with a semaphore. A child that
//! outlives its timeout or is cancelled is killed (`kill_on_drop`).

use super::CancelToken;
use crate::error::{AutotypeError, InvocationFailure, Result};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A fully resolved command line.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Short label for logs and errors, e.g. `pyrefly check`.
    pub label: String,
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<OsString>,
    /// Working directory, if not inherited.
    pub current_dir: Option<PathBuf>,
    /// Wall-clock budget.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a spec with no arguments.
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Stdout followed by stderr, separated by a newline when both are set.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Whether the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs subprocesses with a shared concurrency limit.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ProcessRunner {
    /// Create a runner allowing `max_concurrent` children at once (min 1).
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Configured concurrency limit.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of children that could start right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a command to completion.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the program is missing or not executable
    /// - `Timeout` if the process outlives `spec.timeout` (it is killed)
    /// - `Cancelled` if `cancel` fires first (the process is killed)
    /// - `Crashed` if the process dies by signal or cannot be driven
    pub async fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(cancelled(spec));
        }

        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|e| AutotypeError::tool(&spec.label, InvocationFailure::Crashed, e.to_string()))?,
            _ = cancel.cancelled() => return Err(cancelled(spec)),
        };

        let mut command = AsyncCommand::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        debug!(
            "Spawning {}: {} {:?}",
            spec.label,
            spec.program.display(),
            spec.args
        );

        let start = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(AutotypeError::tool(
                    &spec.label,
                    InvocationFailure::NotFound,
                    format!("cannot execute {}: {}", spec.program.display(), e),
                ));
            }
            Err(e) => {
                return Err(AutotypeError::tool(
                    &spec.label,
                    InvocationFailure::Crashed,
                    format!("failed to spawn {}: {}", spec.program.display(), e),
                ));
            }
        };

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            result = tokio::time::timeout(spec.timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(AutotypeError::tool(
                        &spec.label,
                        InvocationFailure::Crashed,
                        e.to_string(),
                    ));
                }
                Err(_elapsed) => {
                    warn!("{} timed out after {}ms", spec.label, spec.timeout.as_millis());
                    return Err(AutotypeError::timeout(&spec.label, spec.timeout));
                }
            },
            _ = cancel.cancelled() => {
                debug!("{} cancelled", spec.label);
                return Err(cancelled(spec));
            }
        };

        let duration = start.elapsed();
        let exit_code = output.status.code();
        if exit_code.is_none() {
            return Err(AutotypeError::tool(
                &spec.label,
                InvocationFailure::Crashed,
                format!("terminated by signal ({})", output.status),
            ));
        }

        debug!(
            "{} exited with {:?} in {}ms",
            spec.label,
            exit_code,
            duration.as_millis()
        );

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
            duration,
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(4)
    }
}

fn cancelled(spec: &CommandSpec) -> AutotypeError {
    AutotypeError::tool(&spec.label, InvocationFailure::Cancelled, "cancelled by caller")
}
