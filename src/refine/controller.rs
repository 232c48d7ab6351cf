//! The annotate → check → decide loop.

use super::state::{FileTask, RefinementSession, Round, SessionFailure, TaskStatus};
use crate::backup::{hash_file, BackupManager};
use crate::config::{AutotypeConfig, MAX_ROUNDS_CEILING};
use crate::error::{AutotypeError, Result};
use crate::invoker::{AnnotationMode, CancelToken, TypeTool};
use futures::future::join_all;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Per-run refinement options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefineOptions {
    pub max_rounds: u32,
    pub backup: bool,
    pub mode: AnnotationMode,
}

impl RefineOptions {
    #[must_use]
    pub fn from_config(config: &AutotypeConfig) -> Self {
        Self {
            max_rounds: config.refine.max_rounds,
            backup: config.refine.backup,
            mode: config.refine.mode,
        }
    }
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self::from_config(&AutotypeConfig::default())
    }
}

/// Gate consulted before the first mutation of a file.
#[derive(Clone, Default)]
pub enum ApprovalPolicy {
    /// Mutate without asking.
    #[default]
    AutoApprove,
    /// Ask a callback; `false` ends the session with an error.
    Callback(Arc<dyn Fn(&FileTask) -> bool + Send + Sync>),
    /// Stop in `AwaitingApproval` until [`RefinementController::approve`].
    RequireExplicit,
}

impl fmt::Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApprove => write!(f, "AutoApprove"),
            Self::Callback(_) => write!(f, "Callback(..)"),
            Self::RequireExplicit => write!(f, "RequireExplicit"),
        }
    }
}

/// Outcome of one file in a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub path: PathBuf,
    /// `Err` only when the session could not start (e.g. missing file).
    pub result: Result<RefinementSession>,
}

impl BatchEntry {
    /// Terminal status, or `None` when the session never started.
    #[must_use]
    pub fn status(&self) -> Option<TaskStatus> {
        self.result.as_ref().ok().map(RefinementSession::status)
    }
}

/// Drives one or more files through refinement rounds.
///
/// Sessions never share mutable state; the only shared resource is whatever
/// process limit the underlying [`TypeTool`] enforces.
pub struct RefinementController<T: TypeTool> {
    tool: T,
    options: RefineOptions,
    approval: ApprovalPolicy,
    cancel: CancelToken,
    max_concurrent_files: usize,
}

impl<T: TypeTool> RefinementController<T> {
    /// Create a controller. The round cap is clamped to `1..=10`.
    pub fn new(tool: T, options: RefineOptions) -> Self {
        let options = RefineOptions {
            max_rounds: options.max_rounds.clamp(1, MAX_ROUNDS_CEILING),
            ..options
        };
        Self {
            tool,
            options,
            approval: ApprovalPolicy::default(),
            cancel: CancelToken::new(),
            max_concurrent_files: 4,
        }
    }

    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = approval;
        self
    }

    /// Share a cancellation token with the caller.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Limit how many files a batch refines at once.
    #[must_use]
    pub fn with_max_concurrent_files(mut self, n: usize) -> Self {
        self.max_concurrent_files = n.max(1);
        self
    }

    #[must_use]
    pub fn options(&self) -> &RefineOptions {
        &self.options
    }

    #[must_use]
    pub fn tool(&self) -> &T {
        &self.tool
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Create a pending session for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::FileNotFound`] before anything else happens.
    pub fn prepare(&self, path: &Path) -> Result<RefinementSession> {
        if !path.is_file() {
            return Err(AutotypeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let hash = hash_file(path)?;
        Ok(RefinementSession::new(FileTask::new(
            path,
            hash,
            self.options.max_rounds,
        )))
    }

    /// Refine one file until it passes, is deferred, or fails.
    ///
    /// Tool and backup failures end the session in [`TaskStatus::Error`] and
    /// are reported through the returned session, not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::FileNotFound`] if `path` does not exist.
    pub async fn refine(&self, path: &Path) -> Result<RefinementSession> {
        let session = self.prepare(path)?;
        Ok(self.drive(session, false).await)
    }

    /// Resume a session parked in [`TaskStatus::AwaitingApproval`].
    ///
    /// Sessions in any other state are returned unchanged.
    pub async fn approve(&self, session: RefinementSession) -> RefinementSession {
        if session.status() != TaskStatus::AwaitingApproval {
            debug!(
                "Ignoring approval for {} in state {}",
                session.task.path.display(),
                session.status()
            );
            return session;
        }
        self.drive(session, true).await
    }

    /// Refine several files with independent sessions.
    ///
    /// Results are returned in input order.
    pub async fn refine_batch(&self, paths: &[PathBuf]) -> Vec<BatchEntry> {
        self.refine_batch_with(paths, |_| {}).await
    }

    /// Like [`Self::refine_batch`], calling `on_done` as each file finishes.
    pub async fn refine_batch_with<F>(&self, paths: &[PathBuf], on_done: F) -> Vec<BatchEntry>
    where
        F: Fn(&BatchEntry) + Send + Sync,
    {
        let permits = Semaphore::new(self.max_concurrent_files);
        let on_done = &on_done;
        let permits = &permits;

        let futures = paths.iter().map(|path| async move {
            let _permit = permits.acquire().await.ok();
            let entry = BatchEntry {
                path: path.clone(),
                result: self.refine(path).await,
            };
            on_done(&entry);
            entry
        });

        join_all(futures).await
    }

    async fn drive(&self, mut session: RefinementSession, approved: bool) -> RefinementSession {
        if session.is_terminal() {
            return session;
        }

        if !approved && session.status() == TaskStatus::Pending {
            match &self.approval {
                ApprovalPolicy::AutoApprove => {}
                ApprovalPolicy::Callback(callback) => {
                    if !callback(&session.task) {
                        let err = AutotypeError::Other(anyhow::anyhow!(
                            "mutation of {} was not approved",
                            session.task.path.display()
                        ));
                        self.fail(&mut session, &err);
                        return session;
                    }
                }
                ApprovalPolicy::RequireExplicit => {
                    if let Err(e) = session.task.transition(TaskStatus::AwaitingApproval) {
                        self.fail(&mut session, &e);
                    } else {
                        info!("{} awaiting approval", session.task.path.display());
                    }
                    return session;
                }
            }
        }

        let path = session.task.path.clone();
        let mut backups = BackupManager::new();

        loop {
            if self.cancel.is_cancelled() {
                let err = cancelled_error(self.tool.name());
                self.fail(&mut session, &err);
                return session;
            }

            if let Err(e) = session.task.transition(TaskStatus::Annotating) {
                self.fail(&mut session, &e);
                return session;
            }

            if self.options.backup && session.task.backup.is_none() {
                match backups.acquire(&path) {
                    Ok(handle) => session.task.backup = Some(handle),
                    Err(e) => {
                        self.fail(&mut session, &e);
                        return session;
                    }
                }
            }

            let annotation = match self
                .tool
                .run_annotate(&path, self.options.mode, &self.cancel)
                .await
            {
                Ok(annotation) => annotation,
                Err(e) => {
                    self.fail(&mut session, &e);
                    return session;
                }
            };

            // A no-op only settles the file when no earlier round left errors.
            let prior_errors = session.history.last().map_or(0, Round::error_count);
            if annotation.is_noop() && prior_errors == 0 {
                session.record_round(annotation, None);
                self.finish(&mut session, TaskStatus::Passed);
                return session;
            }

            if let Err(e) = session.task.transition(TaskStatus::Checking) {
                self.fail(&mut session, &e);
                return session;
            }

            let check = match self.tool.run_check(&path, &self.cancel).await {
                Ok(check) => check,
                Err(e) => {
                    self.fail(&mut session, &e);
                    return session;
                }
            };

            let errors = check.error_count();
            session.record_round(annotation, Some(check));

            let next = if errors == 0 {
                TaskStatus::Passed
            } else if session.task.has_rounds_left() {
                TaskStatus::NeedsAnotherRound
            } else {
                TaskStatus::Deferred
            };

            debug!(
                "{} round {}/{}: {} error(s) -> {}",
                path.display(),
                session.task.rounds,
                session.task.max_rounds,
                errors,
                next
            );

            if next == TaskStatus::NeedsAnotherRound {
                if let Err(e) = session.task.transition(next) {
                    self.fail(&mut session, &e);
                    return session;
                }
                continue;
            }

            self.finish(&mut session, next);
            return session;
        }
    }

    fn finish(&self, session: &mut RefinementSession, status: TaskStatus) {
        match session.task.transition(status) {
            Ok(()) => info!(
                "{} finished {} after {} round(s)",
                session.task.path.display(),
                status,
                session.task.rounds
            ),
            Err(e) => self.fail(session, &e),
        }
    }

    fn fail(&self, session: &mut RefinementSession, err: &AutotypeError) {
        warn!(
            "{} failed during {}: {}",
            session.task.path.display(),
            session.status(),
            err
        );
        session.failure = Some(SessionFailure::from(err).during(session.status()));
        if !session.is_terminal() {
            session.task.status = TaskStatus::Error;
            session.task.updated_at = chrono::Utc::now();
        }
    }
}

fn cancelled_error(tool: &str) -> AutotypeError {
    AutotypeError::tool(
        tool,
        crate::error::InvocationFailure::Cancelled,
        "cancelled before the next round",
    )
}
