//! Refinement state types and transitions.
//!
//! A [`FileTask`] moves through [`TaskStatus`] values under the control of
//! the [`super::RefinementController`]. The [`RefinementSession`] owns the
//! task together with its ordered round history.

use crate::backup::BackupHandle;
use crate::diagnostics::{error_count, Diagnostic};
use crate::error::{AutotypeError, InvocationFailure, Result};
use crate::invoker::{AnnotationResult, CheckResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle status of a [`FileTask`].
///
/// # Example
///
/// ```
/// use autotype::refine::TaskStatus;
///
/// assert!(TaskStatus::Deferred.is_terminal());
/// assert!(TaskStatus::NeedsAnotherRound.can_transition_to(TaskStatus::Annotating));
/// assert!(!TaskStatus::Passed.can_transition_to(TaskStatus::Annotating));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, nothing has run yet.
    Pending,
    /// Waiting for the caller to approve mutation.
    AwaitingApproval,
    /// The annotator is running.
    Annotating,
    /// The checker is running.
    Checking,
    /// Errors remain and rounds are left.
    NeedsAnotherRound,
    /// No error-severity diagnostics remain.
    Passed,
    /// Errors remain after the final round.
    Deferred,
    /// A tool, backup, or cancellation failure ended the session.
    Error,
}

impl TaskStatus {
    /// Whether no further invocations may happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Deferred | Self::Error)
    }

    /// Whether `next` is a legal successor.
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (_, Error) => !self.is_terminal(),
            (Pending, AwaitingApproval | Annotating) => true,
            (AwaitingApproval, Annotating) => true,
            (Annotating, Checking | Passed) => true,
            (Checking, Passed | NeedsAnotherRound | Deferred) => true,
            (NeedsAnotherRound, Annotating) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Annotating => "annotating",
            Self::Checking => "checking",
            Self::NeedsAnotherRound => "needs_another_round",
            Self::Passed => "passed",
            Self::Deferred => "deferred",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One file under refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTask {
    pub id: Uuid,
    pub path: PathBuf,
    /// SHA-256 of the content at submission.
    pub original_hash: String,
    pub backup: Option<BackupHandle>,
    /// Completed rounds. Only ever increases.
    pub rounds: u32,
    pub max_rounds: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileTask {
    /// Create a pending task.
    ///
    /// # Example
    ///
    /// ```
    /// use autotype::refine::{FileTask, TaskStatus};
    ///
    /// let task = FileTask::new("app.py", "abc123", 3);
    /// assert_eq!(task.status, TaskStatus::Pending);
    /// assert_eq!(task.rounds, 0);
    /// assert!(task.has_rounds_left());
    /// ```
    pub fn new(path: impl Into<PathBuf>, original_hash: impl Into<String>, max_rounds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            original_hash: original_hash.into(),
            backup: None,
            rounds: 0,
            max_rounds,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns an error for an illegal transition; the status is unchanged.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AutotypeError::Other(anyhow::anyhow!(
                "illegal status transition for {}: {} -> {}",
                self.path.display(),
                self.status,
                next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether another round fits under the cap.
    #[must_use]
    pub fn has_rounds_left(&self) -> bool {
        self.rounds < self.max_rounds
    }
}

/// One annotate-then-check cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number.
    pub number: u32,
    pub annotation: AnnotationResult,
    /// Absent when the annotator reported nothing to do.
    pub check: Option<CheckResult>,
}

impl Round {
    /// Diagnostics that decide the round outcome.
    ///
    /// The checker's view wins when it ran; otherwise the annotator's.
    #[must_use]
    pub fn outcome_diagnostics(&self) -> &[Diagnostic] {
        match &self.check {
            Some(check) => &check.diagnostics,
            None => &self.annotation.diagnostics,
        }
    }

    /// Number of error-severity diagnostics in the outcome.
    #[must_use]
    pub fn error_count(&self) -> usize {
        error_count(self.outcome_diagnostics())
    }
}

/// Change in diagnostics from one round to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundDelta {
    /// The later of the two rounds compared.
    pub round: u32,
    /// Present before, gone now.
    pub resolved: Vec<Diagnostic>,
    /// New in this round.
    pub introduced: Vec<Diagnostic>,
    /// Present in both rounds.
    pub persisted: Vec<Diagnostic>,
}

impl RoundDelta {
    /// Compare two diagnostic lists by `(line, code, message)`.
    #[must_use]
    pub fn between(round: u32, previous: &[Diagnostic], current: &[Diagnostic]) -> Self {
        let before: HashSet<_> = previous.iter().map(Diagnostic::identity).collect();
        let after: HashSet<_> = current.iter().map(Diagnostic::identity).collect();

        let (persisted, introduced): (Vec<_>, Vec<_>) = current
            .iter()
            .cloned()
            .partition(|d| before.contains(&d.identity()));
        let resolved = previous
            .iter()
            .filter(|d| !after.contains(&d.identity()))
            .cloned()
            .collect();

        Self {
            round,
            resolved,
            introduced,
            persisted,
        }
    }

    /// Whether this round made things worse.
    #[must_use]
    pub fn is_regression(&self) -> bool {
        self.introduced.iter().any(Diagnostic::is_error)
    }
}

/// Failure that ended a session, in a serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub message: String,
    /// Set for external tool failures.
    pub reason: Option<InvocationFailure>,
    /// Status the task was in when it failed.
    pub phase: Option<TaskStatus>,
}

impl SessionFailure {
    /// Record the status the task was in.
    #[must_use]
    pub fn during(mut self, phase: TaskStatus) -> Self {
        self.phase = Some(phase);
        self
    }
}

impl From<&AutotypeError> for SessionFailure {
    fn from(err: &AutotypeError) -> Self {
        Self {
            message: err.to_string(),
            reason: err.invocation_failure(),
            phase: None,
        }
    }
}

/// A task together with its complete round history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSession {
    pub task: FileTask,
    pub history: Vec<Round>,
    pub failure: Option<SessionFailure>,
}

impl RefinementSession {
    #[must_use]
    pub fn new(task: FileTask) -> Self {
        Self {
            task,
            history: Vec::new(),
            failure: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.task.status.is_terminal()
    }

    /// Append a completed round and advance the counter.
    pub(crate) fn record_round(&mut self, annotation: AnnotationResult, check: Option<CheckResult>) {
        self.task.rounds += 1;
        self.history.push(Round {
            number: self.task.rounds,
            annotation,
            check,
        });
    }

    /// Whether any round changed the file.
    #[must_use]
    pub fn modified(&self) -> bool {
        self.history.iter().any(|r| r.annotation.changed)
    }

    /// Diagnostics from the most recent round, or none.
    #[must_use]
    pub fn final_diagnostics(&self) -> &[Diagnostic] {
        self.history
            .last()
            .map(Round::outcome_diagnostics)
            .unwrap_or_default()
    }

    /// Per-round deltas, one for each round after the first.
    #[must_use]
    pub fn deltas(&self) -> Vec<RoundDelta> {
        self.history
            .windows(2)
            .map(|pair| {
                RoundDelta::between(
                    pair[1].number,
                    pair[0].outcome_diagnostics(),
                    pair[1].outcome_diagnostics(),
                )
            })
            .collect()
    }

    /// Backup artifact path, if a snapshot was taken.
    #[must_use]
    pub fn backup_path(&self) -> Option<&std::path::Path> {
        self.task.backup.as_ref().map(|b| b.backup.as_path())
    }
}
