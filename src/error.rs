//! Custom error types for pyrefly-autotype.
//!
//! This module provides structured error types that let the refinement
//! engine decide what is fatal for a single file, what aborts a batch,
//! and what should be degraded locally.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why an external tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationFailure {
    /// The binary is absent or not executable.
    NotFound,
    /// The process exceeded its wall-clock budget and was killed.
    Timeout,
    /// The process died without an exit code (signal) or could not be driven.
    Crashed,
    /// The caller cancelled the invocation.
    Cancelled,
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Timeout => write!(f, "timeout"),
            Self::Crashed => write!(f, "crashed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Main error type for autotype operations
#[derive(Error, Debug)]
pub enum AutotypeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Requested file does not exist
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    // =========================================================================
    // Tool Errors
    // =========================================================================
    /// External annotator/checker could not be used
    #[error("Tool '{tool}' invocation failed ({reason}): {message}")]
    ToolInvocation {
        tool: String,
        reason: InvocationFailure,
        message: String,
    },

    // =========================================================================
    // Backup Errors
    // =========================================================================
    /// Snapshot could not be created or restored
    #[error("Backup error for {path}: {message}")]
    Backup { path: PathBuf, message: String },

    // =========================================================================
    // Tool Surface Errors
    // =========================================================================
    /// Unknown tool, prompt, or resource requested by a caller
    #[error("Unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },

    /// Malformed tool-call arguments
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AutotypeError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid-field configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a tool invocation error
    pub fn tool(
        tool: impl Into<String>,
        reason: InvocationFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            reason,
            message: message.into(),
        }
    }

    /// Create a timeout error for a tool
    pub fn timeout(tool: impl Into<String>, after: Duration) -> Self {
        Self::tool(
            tool,
            InvocationFailure::Timeout,
            format!("killed after {}ms", after.as_millis()),
        )
    }

    /// Create a backup error
    pub fn backup(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Backup {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-arguments error
    pub fn invalid_arguments(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// The invocation failure reason, if this is a tool error.
    #[must_use]
    pub fn invocation_failure(&self) -> Option<InvocationFailure> {
        match self {
            Self::ToolInvocation { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Check if this error ends a single file's session (but not a batch).
    #[must_use]
    pub fn is_fatal_for_file(&self) -> bool {
        matches!(
            self,
            Self::ToolInvocation { .. }
                | Self::Backup { .. }
                | Self::FileNotFound { .. }
                | Self::Io(_)
        )
    }

    /// Check if this error must abort before any file is touched.
    #[must_use]
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidConfig { .. })
    }

    /// Get error code for exit status
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ToolInvocation {
                reason: InvocationFailure::NotFound,
                ..
            } => 6,
            Self::ToolInvocation { .. } => 4,
            Self::Backup { .. } => 5,
            Self::FileNotFound { .. } => 3,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::Unknown { .. } | Self::InvalidArguments { .. } => 2,
            _ => 1,
        }
    }
}

/// Type alias for autotype results
pub type Result<T> = std::result::Result<T, AutotypeError>;

/// Extension trait for converting foreign errors into [`AutotypeError`]
pub trait IntoAutotypeError<T> {
    fn into_config_error(self) -> Result<T>;
    fn into_backup_error(self, path: &std::path::Path) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoAutotypeError<T> for std::result::Result<T, E> {
    fn into_config_error(self) -> Result<T> {
        self.map_err(|e| AutotypeError::config(e.into().to_string()))
    }

    fn into_backup_error(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| AutotypeError::backup(path, e.into().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AutotypeError::tool("pyrefly", InvocationFailure::NotFound, "no such binary");
        let text = err.to_string();
        assert!(text.contains("pyrefly"));
        assert!(text.contains("not_found"));
    }

    #[test]
    fn test_timeout_constructor() {
        let err = AutotypeError::timeout("pyrefly check", Duration::from_millis(1500));
        assert_eq!(err.invocation_failure(), Some(InvocationFailure::Timeout));
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn test_is_fatal_for_file() {
        assert!(AutotypeError::backup("/tmp/a.py", "disk full").is_fatal_for_file());
        assert!(
            AutotypeError::tool("pyrefly", InvocationFailure::Crashed, "sigsegv")
                .is_fatal_for_file()
        );
        assert!(!AutotypeError::config("bad glob").is_fatal_for_file());
    }

    #[test]
    fn test_aborts_batch() {
        assert!(AutotypeError::config("bad glob").aborts_batch());
        assert!(AutotypeError::invalid_config("max_rounds", "must be >= 1").aborts_batch());
        assert!(!AutotypeError::backup("/tmp/a.py", "x").aborts_batch());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            AutotypeError::tool("pyrefly", InvocationFailure::NotFound, "").exit_code(),
            6
        );
        assert_eq!(
            AutotypeError::tool("pyrefly", InvocationFailure::Timeout, "").exit_code(),
            4
        );
        assert_eq!(AutotypeError::config("test").exit_code(), 7);
        assert_eq!(
            AutotypeError::FileNotFound {
                path: PathBuf::from("x.py")
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/autotype.toml");
        let err = AutotypeError::config_with_path("failed to parse", path.clone());
        if let AutotypeError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_backup_error() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        ));

        let converted = result.into_backup_error(std::path::Path::new("/ro/a.py"));
        match converted {
            Err(AutotypeError::Backup { path, message }) => {
                assert_eq!(path, PathBuf::from("/ro/a.py"));
                assert!(message.contains("read-only"));
            }
            _ => panic!("Wrong error variant after conversion"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: AutotypeError = io_err.into();
        assert!(matches!(err, AutotypeError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
