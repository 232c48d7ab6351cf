//! pyrefly-autotype - Supervised type-annotation refinement for Python
//!
//! Drives the Pyrefly annotator and checker through bounded annotate → check
//! rounds per file, with a snapshot taken before the first mutation, and
//! aggregates project-wide annotation statistics to prioritise the work.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backup`] - Pre-mutation snapshots and restore
//! - [`config`] - Configuration loading and validation
//! - [`diagnostics`] - Checker diagnostics and output parsing
//! - [`error`] - Custom error types and handling
//! - [`invoker`] - External annotator/checker invocation
//! - [`project`] - Project scanning and static annotation analysis
//! - [`refine`] - The refinement state machine and controller
//! - [`tools`] - Named tool calls, resources, and prompts
//! - [`testing`] - Testing infrastructure (mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use autotype::config::AutotypeConfig;
//! use autotype::invoker::{InvokerConfig, PyreflyInvoker};
//! use autotype::refine::{RefineOptions, RefinementController, TaskStatus};
//!
//! let config = AutotypeConfig::load(".")?.apply_env()?;
//! config.validate()?;
//!
//! let invoker = PyreflyInvoker::new(InvokerConfig::resolve(&config));
//! let controller = RefinementController::new(invoker, RefineOptions::from_config(&config));
//!
//! let session = controller.refine(Path::new("app.py")).await?;
//! if session.status() == TaskStatus::Deferred {
//!     println!("{} errors left", session.final_diagnostics().len());
//! }
//! ```

pub mod backup;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod invoker;
pub mod project;
pub mod refine;
pub mod testing;
pub mod tools;

// Re-export commonly used types
pub use error::{AutotypeError, IntoAutotypeError, InvocationFailure, Result};

// Re-export config types
pub use config::{AutotypeConfig, CheckerSection, RefineSection, ToolSection, UntypedDefBehavior};

// Re-export testing types for convenience
pub use testing::MockTypeTool;

// Re-export invoker types
pub use invoker::{
    AnnotationMode, AnnotationResult, CancelToken, CheckResult, InvokerConfig, PyreflyInvoker,
    TypeTool,
};

// Re-export diagnostic types
pub use diagnostics::{Diagnostic, DiagnosticSummary, ParsedOutput, Severity};

// Re-export refinement types
pub use refine::{
    ApprovalPolicy, BatchEntry, FileTask, RefineOptions, RefinementController, RefinementSession,
    Round, RoundDelta, TaskStatus,
};

// Re-export project types
pub use project::{ContextSummary, FileStats, ProjectContext, ProjectScanner};

// Re-export backup types
pub use backup::{BackupHandle, BackupManager};

// Re-export tool surface
pub use tools::ToolServer;
