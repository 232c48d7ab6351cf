//! Refinement loop: supervised, bounded annotate → check rounds per file.
//!
//! ```text
//! Pending ─▶ Annotating ─▶ Checking ─▶ Passed
//!    │           │   ▲          ├────▶ Deferred   (errors at the round cap)
//!    ▼           │   └──────────┴────▶ NeedsAnotherRound
//! AwaitingApproval   (no-op) ─▶ Passed
//! ```
//!
//! Any tool, backup, or cancellation failure moves a non-terminal task to
//! `Error`. Terminal sessions carry their complete round history.

pub mod controller;
pub mod state;

pub use controller::{ApprovalPolicy, BatchEntry, RefineOptions, RefinementController};
pub use state::{FileTask, RefinementSession, Round, RoundDelta, SessionFailure, TaskStatus};
