//! Testing infrastructure for pyrefly-autotype.
//!
//! - **Mocks**: [`MockTypeTool`] scripts annotate/check outcomes and counts
//!   invocations, so the refinement loop can be exercised without pyrefly.
//! - **Fixtures**: temporary Python projects (test-only).
//!
//! # Example
//!
//! ```rust,ignore
//! use autotype::testing::{MockTypeTool, TestFixture};
//!
//! let tool = MockTypeTool::new()
//!     .annotate_changes("def f(x: int) -> int: ...\n")
//!     .check_always(vec![]);
//!
//! let fixture = TestFixture::python_project();
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
