//! Tool-call surface over the refinement engine and project aggregator.
//!
//! [`ToolServer`] exposes four named tools with JSON arguments and JSON
//! results, a status resource, and two prompt templates. It is a thin
//! adapter: every tool delegates to the core modules.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = ToolServer::for_project(".")?;
//! let result = server
//!     .call("type_check_file", serde_json::json!({"file_path": "app.py"}))
//!     .await?;
//! ```

pub mod prompts;

pub use prompts::{PromptArgument, PromptDescriptor, PromptResult};

use crate::config::{AutotypeConfig, MAX_ROUNDS_CEILING};
use crate::diagnostics::Diagnostic;
use crate::error::{AutotypeError, Result};
use crate::invoker::{AnnotationMode, CancelToken, InvokerConfig, PyreflyInvoker, TypeTool};
use crate::project::{
    ContextSummary, FileStats, FunctionInfo, MissingAnnotation, ProjectScanner, PythonAnalyzer,
};
use crate::refine::{RefineOptions, RefinementController, Round, SessionFailure, TaskStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ANALYZE_PYTHON_FILE: &str = "analyze_python_file";
pub const ADD_TYPES_TO_FILE: &str = "add_types_to_file";
pub const TYPE_CHECK_FILE: &str = "type_check_file";
pub const GET_PROJECT_CONTEXT: &str = "get_project_context";

/// URI of the status resource.
pub const STATUS_RESOURCE: &str = "pyrefly://analysis/status";

const TOOL_NAMES: [&str; 4] = [
    ANALYZE_PYTHON_FILE,
    ADD_TYPES_TO_FILE,
    TYPE_CHECK_FILE,
    GET_PROJECT_CONTEXT,
];

// ============================================================================
// Descriptors
// ============================================================================

/// A tool with its JSON input schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A readable resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

/// Descriptors for every tool.
#[must_use]
pub fn list_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: ANALYZE_PYTHON_FILE,
            description: "Analyze a Python file for missing type annotations",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the Python file to analyze"
                    },
                    "detailed": {
                        "type": "boolean",
                        "description": "Include per-item locations and checker diagnostics",
                        "default": false
                    }
                },
                "required": ["file_path"]
            }),
        },
        ToolDescriptor {
            name: ADD_TYPES_TO_FILE,
            description: "Add type annotations to a Python file using Pyrefly",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the Python file to add types to"
                    },
                    "backup": {
                        "type": "boolean",
                        "description": "Create a backup of the original file",
                        "default": true
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["conservative", "aggressive"],
                        "description": "How eagerly to infer annotations",
                        "default": "conservative"
                    },
                    "max_rounds": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_ROUNDS_CEILING,
                        "description": "Annotate/check rounds before deferring"
                    }
                },
                "required": ["file_path"]
            }),
        },
        ToolDescriptor {
            name: TYPE_CHECK_FILE,
            description: "Run type checking on a Python file using Pyrefly",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the Python file to type check"
                    }
                },
                "required": ["file_path"]
            }),
        },
        ToolDescriptor {
            name: GET_PROJECT_CONTEXT,
            description: "Get project-wide type information for better type inference",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_path": {
                        "type": "string",
                        "description": "Path to the project directory"
                    },
                    "eager": {
                        "type": "boolean",
                        "description": "Run the checker on every file and the whole project",
                        "default": false
                    }
                },
                "required": ["project_path"]
            }),
        },
    ]
}

/// Descriptors for every resource.
#[must_use]
pub fn list_resources() -> Vec<ResourceDescriptor> {
    vec![ResourceDescriptor {
        uri: STATUS_RESOURCE,
        name: "Pyrefly Analysis Status",
        description: "Current status and capabilities of the Pyrefly type analyzer",
        mime_type: "application/json",
    }]
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeArgs {
    pub file_path: PathBuf,
    #[serde(default)]
    pub detailed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddTypesArgs {
    pub file_path: PathBuf,
    /// Defaults to the configured setting.
    #[serde(default)]
    pub backup: Option<bool>,
    #[serde(default)]
    pub mode: Option<AnnotationMode>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeCheckArgs {
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectContextArgs {
    pub project_path: PathBuf,
    #[serde(default)]
    pub eager: bool,
}

fn parse_args<A: DeserializeOwned>(tool: &str, arguments: Value) -> Result<A> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| AutotypeError::invalid_arguments(tool, e.to_string()))
}

// ============================================================================
// Results
// ============================================================================

/// Result of `add_types_to_file`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddTypesOutput {
    pub file_path: PathBuf,
    pub modified: bool,
    /// Diagnostics from the final round.
    pub diagnostics: Vec<Diagnostic>,
    pub backup_path: Option<PathBuf>,
    pub status: TaskStatus,
    pub rounds: u32,
    pub history: Vec<Round>,
    pub failure: Option<SessionFailure>,
}

/// Result of `type_check_file`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeCheckOutput {
    pub file_path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
    pub exit_status: Option<i32>,
    pub error_count: usize,
    /// Whether the checker output could not be parsed.
    pub fallback: bool,
}

/// Extra information returned by a detailed analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisDetail {
    pub items: Vec<MissingAnnotation>,
    pub functions: Vec<FunctionInfo>,
    /// Checker diagnostics, absent if the checker could not run.
    pub diagnostics: Option<Vec<Diagnostic>>,
    pub check_error: Option<String>,
    /// Raw checker output.
    pub checker_output: Option<String>,
}

/// Result of `analyze_python_file`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeOutput {
    pub file_path: PathBuf,
    pub lines: usize,
    pub missing_annotations: usize,
    pub functions_needing_types: Vec<String>,
    pub variables_needing_types: Vec<String>,
    pub detail: Option<AnalysisDetail>,
}

/// Result of `get_project_context`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectContextOutput {
    pub project_path: PathBuf,
    pub files: Vec<FileStats>,
    pub config: AutotypeConfig,
    pub summary: ContextSummary,
    pub excluded: usize,
    /// Set only for eager requests.
    pub pyrefly_compatible: Option<bool>,
}

// ============================================================================
// Server
// ============================================================================

/// Dispatches tool calls for one project.
pub struct ToolServer<T: TypeTool> {
    root: PathBuf,
    config: AutotypeConfig,
    tool: Arc<T>,
    analyzer: PythonAnalyzer,
    cancel: CancelToken,
}

impl ToolServer<PyreflyInvoker> {
    /// Build a server for `root` using its configuration and environment
    /// overrides, with the real checker.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the project configuration is invalid.
    pub fn for_project(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = AutotypeConfig::load(&root)?.apply_env()?;
        config.validate()?;
        let invoker = PyreflyInvoker::new(InvokerConfig::resolve(&config));
        info!("Checker command: {}", invoker.config().location.display());
        Self::new(root, config, invoker)
    }
}

impl<T: TypeTool> ToolServer<T> {
    /// Create a server around an existing tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the static analyzer cannot be built.
    pub fn new(root: impl Into<PathBuf>, config: AutotypeConfig, tool: T) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            config,
            tool: Arc::new(tool),
            analyzer: PythonAnalyzer::new()?,
            cancel: CancelToken::new(),
        })
    }

    /// Share a cancellation token with the caller.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &AutotypeConfig {
        &self.config
    }

    #[must_use]
    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Relative paths are taken from the project root.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Dispatch a tool call by name.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Unknown`] for an unknown tool,
    /// [`AutotypeError::InvalidArguments`] for malformed arguments, or the
    /// tool's own error.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        debug!("Tool call: {}", name);
        let value = match name {
            ANALYZE_PYTHON_FILE => {
                serde_json::to_value(self.analyze_python_file(parse_args(name, arguments)?).await?)?
            }
            ADD_TYPES_TO_FILE => {
                serde_json::to_value(self.add_types_to_file(parse_args(name, arguments)?).await?)?
            }
            TYPE_CHECK_FILE => {
                serde_json::to_value(self.type_check_file(parse_args(name, arguments)?).await?)?
            }
            GET_PROJECT_CONTEXT => serde_json::to_value(
                self.get_project_context(parse_args(name, arguments)?).await?,
            )?,
            other => {
                return Err(AutotypeError::Unknown {
                    kind: "tool",
                    name: other.to_string(),
                })
            }
        };
        Ok(value)
    }

    /// Refine one file through annotate/check rounds.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::InvalidArguments`] for a round cap outside
    /// `1..=10` and [`AutotypeError::FileNotFound`] for a missing file. Tool
    /// and backup failures are reported in the result's `status` and `failure`.
    pub async fn add_types_to_file(&self, args: AddTypesArgs) -> Result<AddTypesOutput> {
        if let Some(max_rounds) = args.max_rounds {
            if max_rounds == 0 || max_rounds > MAX_ROUNDS_CEILING {
                return Err(AutotypeError::invalid_arguments(
                    ADD_TYPES_TO_FILE,
                    format!(
                        "max_rounds must be between 1 and {MAX_ROUNDS_CEILING}, got {max_rounds}"
                    ),
                ));
            }
        }

        let path = self.resolve(&args.file_path);
        let defaults = RefineOptions::from_config(&self.config);
        let options = RefineOptions {
            max_rounds: args.max_rounds.unwrap_or(defaults.max_rounds),
            backup: args.backup.unwrap_or(defaults.backup),
            mode: args.mode.unwrap_or(defaults.mode),
        };

        let controller = RefinementController::new(Arc::clone(&self.tool), options)
            .with_cancel_token(self.cancel.clone());
        let session = controller.refine(&path).await?;

        Ok(AddTypesOutput {
            file_path: path,
            modified: session.modified(),
            diagnostics: session.final_diagnostics().to_vec(),
            backup_path: session.backup_path().map(Path::to_path_buf),
            status: session.status(),
            rounds: session.task.rounds,
            failure: session.failure.clone(),
            history: session.history,
        })
    }

    /// Run the checker once.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::FileNotFound`] or a tool invocation error.
    pub async fn type_check_file(&self, args: TypeCheckArgs) -> Result<TypeCheckOutput> {
        let path = self.resolve(&args.file_path);
        let result = self.tool.run_check(&path, &self.cancel).await?;
        Ok(TypeCheckOutput {
            file_path: path,
            error_count: result.error_count(),
            exit_status: result.exit_status,
            fallback: result.fallback,
            diagnostics: result.diagnostics,
        })
    }

    /// Report missing annotations without modifying the file.
    ///
    /// The detailed form also runs the checker; a checker failure is
    /// recorded in the detail instead of failing the call.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::FileNotFound`] or an IO error.
    pub async fn analyze_python_file(&self, args: AnalyzeArgs) -> Result<AnalyzeOutput> {
        let path = self.resolve(&args.file_path);
        let analysis = self.analyzer.analyze_file(&path)?;

        let detail = if args.detailed {
            let (diagnostics, check_error, checker_output) =
                match self.tool.run_check(&path, &self.cancel).await {
                    Ok(check) => (Some(check.diagnostics), None, Some(check.raw_output)),
                    Err(e) => {
                        warn!("Checker unavailable for {}: {}", path.display(), e);
                        (None, Some(e.to_string()), None)
                    }
                };
            Some(AnalysisDetail {
                items: analysis.missing.clone(),
                functions: analysis.functions.clone(),
                diagnostics,
                check_error,
                checker_output,
            })
        } else {
            None
        };

        Ok(AnalyzeOutput {
            lines: analysis.lines,
            missing_annotations: analysis.missing_count(),
            functions_needing_types: owned(analysis.functions_needing_types()),
            variables_needing_types: owned(analysis.variables_needing_types()),
            file_path: path,
            detail,
        })
    }

    /// Scan a project and aggregate per-file statistics.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::FileNotFound`] for a missing directory, a
    /// configuration error, or (eager only) a `NotFound` checker error.
    pub async fn get_project_context(
        &self,
        args: ProjectContextArgs,
    ) -> Result<ProjectContextOutput> {
        let project = self.resolve(&args.project_path);
        let config = if project == self.root {
            self.config.clone()
        } else {
            AutotypeConfig::load(&project)?
        };

        let mut context = ProjectScanner::new(&project, &config)?.scan()?;

        if args.eager {
            context
                .populate_diagnostics(
                    self.tool.as_ref(),
                    config.tool.max_concurrent_processes,
                    &self.cancel,
                )
                .await?;
            let project_check = self.tool.run_check_project(&project, &self.cancel).await?;
            context.checker_compatible = Some(project_check.exit_status == Some(0));
        }

        Ok(ProjectContextOutput {
            project_path: project,
            summary: context.summary(),
            excluded: context.excluded,
            pyrefly_compatible: context.checker_compatible,
            files: context.files,
            config: context.config,
        })
    }

    /// Read a resource by URI.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Unknown`] for an unknown URI.
    pub fn read_resource(&self, uri: &str) -> Result<Value> {
        if uri != STATUS_RESOURCE {
            return Err(AutotypeError::Unknown {
                kind: "resource",
                name: uri.to_string(),
            });
        }
        Ok(json!({
            "status": "active",
            "capabilities": [
                "Python file analysis",
                "Type inference",
                "Type checking",
                "Project context analysis"
            ],
            "supported_tools": TOOL_NAMES,
            "checker": self.tool.name(),
            "max_rounds": self.config.refine.max_rounds,
        }))
    }

    /// Handle one line-delimited JSON request.
    ///
    /// Requests name a `tool`, `prompt`, or `resource`, or `list` one of
    /// `tools`, `resources`, or `prompts`. The reply is `{"ok": result}` or
    /// `{"error": message}`.
    pub async fn handle_line(&self, line: &str) -> Value {
        match self.dispatch_line(line).await {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                debug!("Request failed: {}", e);
                json!({ "error": e.to_string() })
            }
        }
    }

    async fn dispatch_line(&self, line: &str) -> Result<Value> {
        let Request {
            tool,
            prompt,
            resource,
            list,
            arguments,
        } = serde_json::from_str(line)
            .map_err(|e| AutotypeError::invalid_arguments("request", e.to_string()))?;

        if let Some(tool) = tool {
            return self.call(&tool, arguments).await;
        }
        if let Some(prompt) = prompt {
            let arguments = prompts::string_arguments(&arguments);
            return Ok(serde_json::to_value(
                self.get_prompt(&prompt, &arguments).await?,
            )?);
        }
        if let Some(uri) = resource {
            return self.read_resource(&uri);
        }
        match list.as_deref() {
            Some("tools") => Ok(serde_json::to_value(list_tools())?),
            Some("resources") => Ok(serde_json::to_value(list_resources())?),
            Some("prompts") => Ok(serde_json::to_value(prompts::list_prompts())?),
            Some(other) => Err(AutotypeError::Unknown {
                kind: "listing",
                name: other.to_string(),
            }),
            None => Err(AutotypeError::invalid_arguments(
                "request",
                "expected one of \"tool\", \"prompt\", \"resource\", or \"list\"",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Request {
    tool: Option<String>,
    prompt: Option<String>,
    resource: Option<String>,
    list: Option<String>,
    #[serde(default)]
    arguments: Value,
}

fn owned(items: Vec<&str>) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationFailure;
    use crate::testing::{MockTypeTool, TestFixture};

    fn server(fixture: &TestFixture, tool: MockTypeTool) -> ToolServer<MockTypeTool> {
        ToolServer::new(fixture.path(), AutotypeConfig::default(), tool).unwrap()
    }

    #[test]
    fn test_list_tools_schemas() {
        let tools = list_tools();
        let names: Vec<_> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names, TOOL_NAMES.to_vec());

        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object");
            assert!(tool.input_schema["required"].as_array().is_some());
        }

        let json = serde_json::to_value(&tools[0]).unwrap();
        assert!(json.get("inputSchema").is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let fixture = TestFixture::new();
        let err = server(&fixture, MockTypeTool::new())
            .call("rewrite_everything", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AutotypeError::Unknown { kind: "tool", .. }));
    }

    #[tokio::test]
    async fn test_add_types_passes() {
        let fixture = TestFixture::new();
        fixture.write_file("app.py", "def f(x):\n    return x\n");
        let tool = MockTypeTool::new().annotate_changes("def f(x: int) -> int:\n    return x\n");
        let server = server(&fixture, tool);

        let result = server
            .call(ADD_TYPES_TO_FILE, json!({"file_path": "app.py"}))
            .await
            .unwrap();

        assert_eq!(result["status"], "passed");
        assert_eq!(result["modified"], true);
        assert_eq!(result["rounds"], 1);
        assert_eq!(result["history"].as_array().unwrap().len(), 1);
        let backup = PathBuf::from(result["backup_path"].as_str().unwrap());
        assert_eq!(
            std::fs::read_to_string(backup).unwrap(),
            "def f(x):\n    return x\n"
        );
        assert_eq!(fixture.read_file("app.py"), "def f(x: int) -> int:\n    return x\n");
    }

    #[tokio::test]
    async fn test_add_types_without_backup_defers() {
        let fixture = TestFixture::new();
        fixture.write_file("app.py", "def f(x):\n    return x\n");
        let tool = MockTypeTool::new()
            .annotate_changes("def f(x: int) -> str:\n    return x\n")
            .check_always(vec![Diagnostic::error("bad return").with_code("bad-return")]);
        let server = server(&fixture, tool);

        let output = server
            .add_types_to_file(AddTypesArgs {
                file_path: PathBuf::from("app.py"),
                backup: Some(false),
                mode: Some(AnnotationMode::Aggressive),
                max_rounds: Some(2),
            })
            .await
            .unwrap();

        assert_eq!(output.status, TaskStatus::Deferred);
        assert_eq!(output.rounds, 2);
        assert!(output.backup_path.is_none());
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(server.tool().check_calls(), 2);
    }

    #[tokio::test]
    async fn test_add_types_rejects_out_of_range_rounds() {
        let fixture = TestFixture::new();
        fixture.write_file("app.py", "x = 1\n");
        let server = server(&fixture, MockTypeTool::new().annotate_changes("x: int = 1\n"));

        for rounds in [0, 50] {
            let err = server
                .call(
                    ADD_TYPES_TO_FILE,
                    json!({"file_path": "app.py", "max_rounds": rounds}),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, AutotypeError::InvalidArguments { .. }));
        }

        assert_eq!(server.tool().annotate_calls(), 0);
        assert!(!fixture.path().join("app.py.autotype.bak").exists());
        assert_eq!(fixture.read_file("app.py"), "x = 1\n");
    }

    #[tokio::test]
    async fn test_add_types_tool_failure_is_reported() {
        let fixture = TestFixture::new();
        fixture.write_file("app.py", "x = 1\n");
        let server = server(
            &fixture,
            MockTypeTool::new().annotate_fails(InvocationFailure::NotFound),
        );

        let result = server
            .call(ADD_TYPES_TO_FILE, json!({"file_path": "app.py"}))
            .await
            .unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["failure"]["reason"], "not_found");
        assert_eq!(result["rounds"], 0);
    }

    #[tokio::test]
    async fn test_add_types_argument_errors() {
        let fixture = TestFixture::new();
        let server = server(&fixture, MockTypeTool::new());

        let err = server
            .call(ADD_TYPES_TO_FILE, json!({"file_path": "a.py", "mode": "reckless"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AutotypeError::InvalidArguments { .. }));

        let err = server.call(ADD_TYPES_TO_FILE, Value::Null).await.unwrap_err();
        assert!(matches!(err, AutotypeError::InvalidArguments { .. }));

        let err = server
            .call(ADD_TYPES_TO_FILE, json!({"file_path": "missing.py"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AutotypeError::FileNotFound { .. }));
        assert_eq!(server.tool().annotate_calls(), 0);
    }

    #[tokio::test]
    async fn test_type_check_file() {
        let fixture = TestFixture::new();
        fixture.write_file("app.py", "x: int = 'a'\n");
        let tool = MockTypeTool::new().check_always(vec![Diagnostic::error("bad assignment")]);
        let server = server(&fixture, tool);

        let result = server
            .call(TYPE_CHECK_FILE, json!({"file_path": "app.py"}))
            .await
            .unwrap();
        assert_eq!(result["exit_status"], 1);
        assert_eq!(result["error_count"], 1);
        assert_eq!(result["diagnostics"][0]["message"], "bad assignment");
    }

    #[tokio::test]
    async fn test_analyze_summary_only() {
        let fixture = TestFixture::python_project();
        let server = server(&fixture, MockTypeTool::new());

        let output = server
            .analyze_python_file(AnalyzeArgs {
                file_path: PathBuf::from("main.py"),
                detailed: false,
            })
            .await
            .unwrap();

        assert_eq!(output.missing_annotations, 6);
        assert_eq!(output.functions_needing_types, vec!["add", "greet"]);
        assert_eq!(output.variables_needing_types, vec!["COUNT"]);
        assert!(output.detail.is_none());
        assert_eq!(server.tool().check_calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_detailed() {
        let fixture = TestFixture::python_project();
        let tool = MockTypeTool::new().check_always(vec![Diagnostic::warning("unused import")]);
        let server = server(&fixture, tool);

        let result = server
            .call(
                ANALYZE_PYTHON_FILE,
                json!({"file_path": "main.py", "detailed": true}),
            )
            .await
            .unwrap();

        let detail = &result["detail"];
        assert_eq!(detail["items"].as_array().unwrap().len(), 6);
        assert_eq!(detail["diagnostics"][0]["message"], "unused import");
        assert!(detail["check_error"].is_null());
    }

    #[tokio::test]
    async fn test_analyze_detailed_degrades_without_checker() {
        let fixture = TestFixture::python_project();
        let server = server(
            &fixture,
            MockTypeTool::new().check_fails(InvocationFailure::NotFound),
        );

        let output = server
            .analyze_python_file(AnalyzeArgs {
                file_path: PathBuf::from("main.py"),
                detailed: true,
            })
            .await
            .unwrap();
        let detail = output.detail.unwrap();
        assert!(detail.diagnostics.is_none());
        assert!(detail.check_error.is_some());
    }

    #[tokio::test]
    async fn test_project_context_lazy() {
        let fixture = TestFixture::python_project();
        let server = server(&fixture, MockTypeTool::new());

        let result = server
            .call(
                GET_PROJECT_CONTEXT,
                json!({"project_path": fixture.path().to_string_lossy()}),
            )
            .await
            .unwrap();

        assert_eq!(result["files"].as_array().unwrap().len(), 4);
        assert_eq!(result["summary"]["file_count"], 4);
        assert!(result["pyrefly_compatible"].is_null());
        assert_eq!(result["config"]["refine"]["max_rounds"], 3);
        assert_eq!(server.tool().check_calls(), 0);
    }

    #[tokio::test]
    async fn test_project_context_eager() {
        let fixture = TestFixture::python_project();
        let server = server(&fixture, MockTypeTool::new());

        let output = server
            .get_project_context(ProjectContextArgs {
                project_path: fixture.path().to_path_buf(),
                eager: true,
            })
            .await
            .unwrap();

        assert_eq!(output.pyrefly_compatible, Some(true));
        assert!(output.files.iter().all(|f| f.diagnostics.is_some()));
        assert_eq!(server.tool().check_calls(), 4);
        assert_eq!(server.tool().project_checks(), 1);
    }

    #[tokio::test]
    async fn test_project_context_eager_with_errors() {
        let fixture = TestFixture::python_project();
        let tool = MockTypeTool::new().check_always(vec![Diagnostic::error("bad")]);
        let server = server(&fixture, tool);

        let output = server
            .get_project_context(ProjectContextArgs {
                project_path: PathBuf::from("."),
                eager: true,
            })
            .await
            .unwrap();
        assert_eq!(output.pyrefly_compatible, Some(false));
        assert_eq!(output.summary.diagnostics.unwrap().errors, 4);
    }

    #[tokio::test]
    async fn test_project_context_missing_directory() {
        let fixture = TestFixture::new();
        let err = server(&fixture, MockTypeTool::new())
            .call(GET_PROJECT_CONTEXT, json!({"project_path": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AutotypeError::FileNotFound { .. }));
    }

    #[test]
    fn test_status_resource() {
        let fixture = TestFixture::new();
        let server = server(&fixture, MockTypeTool::new());

        let status = server.read_resource(STATUS_RESOURCE).unwrap();
        assert_eq!(status["status"], "active");
        assert_eq!(status["supported_tools"].as_array().unwrap().len(), 4);
        assert_eq!(status["checker"], "mock");

        assert!(server.read_resource("pyrefly://nothing").is_err());
        assert_eq!(list_resources()[0].uri, STATUS_RESOURCE);
    }

    #[tokio::test]
    async fn test_handle_line() {
        let fixture = TestFixture::new();
        fixture.write_file("app.py", "x = 1\n");
        let server = server(&fixture, MockTypeTool::new());

        let reply = server
            .handle_line(r#"{"tool": "type_check_file", "arguments": {"file_path": "app.py"}}"#)
            .await;
        assert_eq!(reply["ok"]["exit_status"], 0);

        let reply = server.handle_line(r#"{"list": "tools"}"#).await;
        assert_eq!(reply["ok"].as_array().unwrap().len(), 4);

        let reply = server
            .handle_line(&format!(r#"{{"resource": "{STATUS_RESOURCE}"}}"#))
            .await;
        assert_eq!(reply["ok"]["status"], "active");

        let reply = server.handle_line("not json").await;
        assert!(reply["error"].as_str().unwrap().contains("request"));

        let reply = server.handle_line("{}").await;
        assert!(reply.get("error").is_some());
    }
}
