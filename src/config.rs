//! Configuration management for pyrefly-autotype.
//!
//! Configuration is read from `autotype.toml` at the project root or, when
//! that file is absent, from the `[tool.pyrefly-autotype]` table in
//! `pyproject.toml`. Every field has a default, so an empty project works.
//!
//! The core consumes configuration read-only; [`AutotypeConfig::validate`]
//! must succeed before any file is touched.

use crate::error::{AutotypeError, Result};
use crate::invoker::AnnotationMode;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the dedicated configuration file.
pub const CONFIG_FILE: &str = "autotype.toml";

/// Table name inside `pyproject.toml`.
pub const PYPROJECT_TABLE: &str = "pyrefly-autotype";

/// Default number of annotate/check rounds per file.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Hard ceiling for a configured round cap.
pub const MAX_ROUNDS_CEILING: u32 = 10;

/// Environment variable overriding the checker binary.
pub const ENV_BINARY: &str = "PYREFLY_AUTOTYPE_BIN";

/// Environment variable overriding the round cap.
pub const ENV_MAX_ROUNDS: &str = "PYREFLY_AUTOTYPE_MAX_ROUNDS";

/// Default include patterns for project scans.
pub fn default_includes() -> Vec<String> {
    vec!["**/*.py".to_string()]
}

/// Default exclude patterns for project scans.
///
/// Generated and vendored trees are skipped, as are backup artifacts
/// produced by this tool.
pub fn default_excludes() -> Vec<String> {
    [
        "**/.*/**",
        "**/__pycache__/**",
        "**/node_modules/**",
        "**/venv/**",
        "**/build/**",
        "**/dist/**",
        "**/site-packages/**",
        "**/*.bak",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// How the checker treats functions without annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UntypedDefBehavior {
    /// Check bodies and infer return types.
    #[default]
    CheckAndInferReturnType,
    /// Check bodies but treat returns as `Any`.
    CheckAndInferReturnAny,
    /// Skip bodies and treat returns as `Any`.
    SkipAndInferReturnAny,
}

impl UntypedDefBehavior {
    /// The value passed on the checker's command line.
    #[must_use]
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::CheckAndInferReturnType => "check-and-infer-return-type",
            Self::CheckAndInferReturnAny => "check-and-infer-return-any",
            Self::SkipAndInferReturnAny => "skip-and-infer-return-any",
        }
    }
}

/// Include/exclude rules for project scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            includes: default_includes(),
            excludes: default_excludes(),
        }
    }
}

/// Settings forwarded to the type checker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSection {
    /// Target Python version, e.g. `3.12`.
    pub python_version: Option<String>,
    /// Per-diagnostic-kind switches; `false` drops diagnostics with that code.
    pub errors: BTreeMap<String, bool>,
    /// Untyped definition handling.
    pub untyped_def_behavior: UntypedDefBehavior,
}

impl CheckerSection {
    /// Whether diagnostics carrying `code` should be reported.
    #[must_use]
    pub fn is_enabled(&self, code: Option<&str>) -> bool {
        code.and_then(|c| self.errors.get(c).copied())
            .unwrap_or(true)
    }
}

/// Refinement loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineSection {
    pub max_rounds: u32,
    pub backup: bool,
    pub mode: AnnotationMode,
}

impl Default for RefineSection {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            backup: true,
            mode: AnnotationMode::default(),
        }
    }
}

/// External tool location and resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    /// Explicit path to the pyrefly binary.
    pub binary: Option<PathBuf>,
    /// Command prefix such as `["uv", "run"]`. Detected when `None`.
    pub launcher: Option<Vec<String>>,
    pub annotate_timeout_ms: u64,
    pub check_timeout_ms: u64,
    pub max_concurrent_processes: usize,
    pub conservative_args: Vec<String>,
    pub aggressive_args: Vec<String>,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            binary: None,
            launcher: None,
            annotate_timeout_ms: 60_000,
            check_timeout_ms: 30_000,
            max_concurrent_processes: 4,
            conservative_args: Vec::new(),
            aggressive_args: Vec::new(),
        }
    }
}

/// Complete configuration snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutotypeConfig {
    pub project: ProjectSection,
    pub checker: CheckerSection,
    pub refine: RefineSection,
    pub tool: ToolSection,
}

impl AutotypeConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration for a project directory.
    ///
    /// Looks for `autotype.toml`, then `pyproject.toml`; falls back to
    /// defaults when neither carries configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Config`] if a file exists but cannot be parsed.
    pub fn load(project_dir: impl AsRef<Path>) -> Result<Self> {
        let project_dir = project_dir.as_ref();

        let dedicated = project_dir.join(CONFIG_FILE);
        if dedicated.is_file() {
            debug!("Loading configuration from {}", dedicated.display());
            return Self::from_file(&dedicated);
        }

        let pyproject = project_dir.join("pyproject.toml");
        if pyproject.is_file() {
            let content = std::fs::read_to_string(&pyproject)?;
            if let Some(config) = Self::from_pyproject_str(&content)
                .map_err(|e| with_path(e, pyproject.clone()))?
            {
                debug!("Loading configuration from {}", pyproject.display());
                return Ok(config);
            }
        }

        Ok(Self::default())
    }

    /// Parse a dedicated configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Config`] on read or parse failure.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutotypeError::config_with_path(e.to_string(), path.to_path_buf()))?;
        Self::from_toml_str(&content).map_err(|e| with_path(e, path.to_path_buf()))
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Config`] on malformed TOML or unknown values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AutotypeError::config(e.to_string()))
    }

    /// Extract the `[tool.pyrefly-autotype]` table from `pyproject.toml` text.
    ///
    /// Returns `Ok(None)` when the table is absent.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Config`] on malformed TOML.
    pub fn from_pyproject_str(content: &str) -> Result<Option<Self>> {
        let doc: toml::Table =
            toml::from_str(content).map_err(|e| AutotypeError::config(e.to_string()))?;

        let Some(table) = doc
            .get("tool")
            .and_then(|tool| tool.get(PYPROJECT_TABLE))
            .cloned()
        else {
            return Ok(None);
        };

        table
            .try_into()
            .map(Some)
            .map_err(|e: toml::de::Error| AutotypeError::config(e.to_string()))
    }

    /// Apply environment overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::InvalidConfig`] if an override is malformed.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::InvalidConfig`] if an override is malformed.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bin) = lookup(ENV_BINARY).filter(|v| !v.trim().is_empty()) {
            self.tool.binary = Some(PathBuf::from(bin));
        }

        if let Some(raw) = lookup(ENV_MAX_ROUNDS) {
            let rounds = raw.trim().parse::<u32>().map_err(|_| {
                AutotypeError::invalid_config(ENV_MAX_ROUNDS, format!("not a number: {raw:?}"))
            })?;
            self.refine.max_rounds = rounds;
        }

        Ok(self)
    }

    /// Set the round cap.
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.refine.max_rounds = max_rounds;
        self
    }

    /// Enable/disable backups.
    #[must_use]
    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.refine.backup = enabled;
        self
    }

    /// Set the annotation mode.
    #[must_use]
    pub fn with_mode(mut self, mode: AnnotationMode) -> Self {
        self.refine.mode = mode;
        self
    }

    /// Replace include patterns.
    #[must_use]
    pub fn with_includes(mut self, includes: Vec<String>) -> Self {
        self.project.includes = includes;
        self
    }

    /// Replace exclude patterns.
    #[must_use]
    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.project.excludes = excludes;
        self
    }

    /// Set the checker binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.tool.binary = Some(binary.into());
        self
    }

    /// Set an explicit launcher prefix (empty runs the binary directly).
    #[must_use]
    pub fn with_launcher(mut self, launcher: Vec<String>) -> Self {
        self.tool.launcher = Some(launcher);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::InvalidConfig`] for the first bad field.
    pub fn validate(&self) -> Result<()> {
        build_globset("project.includes", &self.project.includes)?;
        build_globset("project.excludes", &self.project.excludes)?;

        if self.refine.max_rounds == 0 || self.refine.max_rounds > MAX_ROUNDS_CEILING {
            return Err(AutotypeError::invalid_config(
                "refine.max_rounds",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_ROUNDS_CEILING, self.refine.max_rounds
                ),
            ));
        }

        if self.tool.annotate_timeout_ms == 0 {
            return Err(AutotypeError::invalid_config(
                "tool.annotate_timeout_ms",
                "must be greater than zero",
            ));
        }

        if self.tool.check_timeout_ms == 0 {
            return Err(AutotypeError::invalid_config(
                "tool.check_timeout_ms",
                "must be greater than zero",
            ));
        }

        if self.tool.max_concurrent_processes == 0 {
            return Err(AutotypeError::invalid_config(
                "tool.max_concurrent_processes",
                "must be at least 1",
            ));
        }

        if let Some(version) = &self.checker.python_version {
            if !is_python_version(version) {
                return Err(AutotypeError::invalid_config(
                    "checker.python_version",
                    format!("expected MAJOR.MINOR[.PATCH], got {version:?}"),
                ));
            }
        }

        Ok(())
    }
}

fn with_path(err: AutotypeError, path: PathBuf) -> AutotypeError {
    match err {
        AutotypeError::Config { message, .. } => AutotypeError::config_with_path(message, path),
        other => other,
    }
}

fn is_python_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Compile a list of glob patterns into a [`GlobSet`].
///
/// # Errors
///
/// Returns [`AutotypeError::InvalidConfig`] naming `field` and the bad pattern.
pub fn build_globset(field: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            AutotypeError::invalid_config(field, format!("invalid glob {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AutotypeError::invalid_config(field, e.to_string()))
}
