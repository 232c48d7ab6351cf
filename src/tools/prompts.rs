//! Prompt templates for assistant-driven typing work.

use super::{AnalyzeArgs, ProjectContextArgs, ToolServer};
use crate::error::{AutotypeError, Result};
use crate::invoker::TypeTool;
use crate::project::prioritize;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

pub const ANALYZE_TYPING_NEEDS: &str = "analyze_typing_needs";
pub const TYPE_IMPROVEMENT_PLAN: &str = "type_improvement_plan";

/// Files listed by name in a plan before truncating.
const PLAN_FILE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: Vec<PromptArgument>,
}

/// A rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptResult {
    pub description: String,
    pub role: &'static str,
    pub text: String,
}

#[must_use]
pub fn list_prompts() -> Vec<PromptDescriptor> {
    vec![
        PromptDescriptor {
            name: ANALYZE_TYPING_NEEDS,
            description: "Analyze a Python file or project to determine typing needs",
            arguments: vec![
                PromptArgument {
                    name: "file_path",
                    description: "Path to the Python file to analyze",
                    required: true,
                },
                PromptArgument {
                    name: "include_suggestions",
                    description: "Include type suggestions in the analysis",
                    required: false,
                },
            ],
        },
        PromptDescriptor {
            name: TYPE_IMPROVEMENT_PLAN,
            description: "Create a plan for improving type coverage in a project",
            arguments: vec![
                PromptArgument {
                    name: "project_path",
                    description: "Path to the project directory",
                    required: true,
                },
                PromptArgument {
                    name: "priority",
                    description: "Priority level (high/medium/low)",
                    required: false,
                },
            ],
        },
    ]
}

/// Flatten JSON prompt arguments into strings.
#[must_use]
pub fn string_arguments(arguments: &Value) -> HashMap<String, String> {
    arguments
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn required<'a>(
    prompt: &str,
    arguments: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str> {
    arguments
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            AutotypeError::invalid_arguments(prompt, format!("{name} argument is required"))
        })
}

impl<T: TypeTool> ToolServer<T> {
    /// Render a prompt template.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Unknown`] for an unknown prompt,
    /// [`AutotypeError::InvalidArguments`] for a missing required argument,
    /// or the error of the analysis the prompt is built from.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptResult> {
        match name {
            ANALYZE_TYPING_NEEDS => self.analyze_typing_needs(arguments).await,
            TYPE_IMPROVEMENT_PLAN => self.type_improvement_plan(arguments).await,
            other => Err(AutotypeError::Unknown {
                kind: "prompt",
                name: other.to_string(),
            }),
        }
    }

    async fn analyze_typing_needs(
        &self,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptResult> {
        let file_path = required(ANALYZE_TYPING_NEEDS, arguments, "file_path")?;
        let include_suggestions = arguments
            .get("include_suggestions")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let analysis = self
            .analyze_python_file(AnalyzeArgs {
                file_path: PathBuf::from(file_path),
                detailed: true,
            })
            .await?;

        let checker_output = analysis
            .detail
            .as_ref()
            .and_then(|d| d.checker_output.as_deref())
            .filter(|out| !out.trim().is_empty())
            .unwrap_or("No output available");

        let mut text = String::new();
        let _ = writeln!(text, "Analyze this Python file for type annotation opportunities:");
        let _ = writeln!(text);
        let _ = writeln!(text, "File: {file_path}");
        let _ = writeln!(text, "Pyrefly Analysis Results:");
        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "Functions needing types: {}",
            analysis.functions_needing_types.len()
        );
        let _ = writeln!(
            text,
            "Variables needing types: {}",
            analysis.variables_needing_types.len()
        );
        let _ = writeln!(text);
        let _ = writeln!(text, "Pyrefly Output:");
        let _ = writeln!(text, "{checker_output}");
        let _ = writeln!(text);
        let _ = writeln!(text, "Details:");
        if let Some(detail) = &analysis.detail {
            for item in &detail.items {
                let _ = writeln!(text, "  - {item}");
            }
        }
        if include_suggestions {
            let _ = writeln!(text);
            let _ = write!(
                text,
                "Please provide specific type annotations for the identified functions and variables."
            );
        }

        Ok(PromptResult {
            description: format!("Type analysis for {file_path}"),
            role: "user",
            text: text.trim_end().to_string(),
        })
    }

    async fn type_improvement_plan(
        &self,
        arguments: &HashMap<String, String>,
    ) -> Result<PromptResult> {
        let project_path = required(TYPE_IMPROVEMENT_PLAN, arguments, "project_path")?;
        let priority = arguments
            .get("priority")
            .map_or("medium", String::as_str)
            .to_ascii_lowercase();
        if !matches!(priority.as_str(), "high" | "medium" | "low") {
            return Err(AutotypeError::invalid_arguments(
                TYPE_IMPROVEMENT_PLAN,
                format!("priority must be high, medium, or low, got {priority:?}"),
            ));
        }

        let context = self
            .get_project_context(ProjectContextArgs {
                project_path: PathBuf::from(project_path),
                eager: false,
            })
            .await?;
        let summary = &context.summary;

        let mut text = String::new();
        let _ = writeln!(text, "Create a type improvement plan for this Python project:");
        let _ = writeln!(text);
        let _ = writeln!(text, "Project: {project_path}");
        let _ = writeln!(text, "Priority: {priority}");
        let _ = writeln!(text, "Python files found: {}", summary.file_count);
        let _ = writeln!(text);
        let _ = writeln!(text, "Project context:");
        let _ = writeln!(
            text,
            "  {} lines, {} functions, {:.0}% fully annotated, {} missing annotations",
            summary.total_lines,
            summary.total_functions,
            summary.coverage * 100.0,
            summary.missing_annotations
        );

        let files = prioritize(&context.files);
        for file in files.iter().take(PLAN_FILE_LIMIT) {
            let _ = writeln!(
                text,
                "  - {} ({} missing, {:.0}% coverage)",
                file.relative.display(),
                file.missing_annotations,
                file.coverage() * 100.0
            );
        }
        if files.len() > PLAN_FILE_LIMIT {
            let _ = writeln!(text, "  ... and more");
        }

        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "Please suggest a prioritized plan for adding type annotations, considering:"
        );
        let _ = writeln!(text, "1. Files with the lowest type coverage");
        let _ = writeln!(text, "2. Critical functions and public APIs");
        let _ = writeln!(text, "3. Dependencies between modules");
        let _ = write!(text, "4. Incremental typing strategy");

        Ok(PromptResult {
            description: format!("Type improvement plan for {project_path}"),
            role: "user",
            text,
        })
    }
}
