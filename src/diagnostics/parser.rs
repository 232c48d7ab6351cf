//! Tolerant parsing of Pyrefly (and mypy-style) output.
//!
//! Three shapes are recognized:
//!
//! - **JSON report**: `{"errors": [{"path", "line", "column", "severity",
//!   "description", "name"}]}` as printed by `pyrefly check --output-format json`
//! - **Text blocks**: `ERROR message [code]` followed by ` --> path:line:col`
//! - **Colon lines**: `path:line[:col]: error|warning: message [code]`
//!
//! Anything else is skipped line by line. When nothing is recognized and the
//! tool exited unsuccessfully, a single synthetic error diagnostic carries the
//! raw text so the failure signal is never lost.
//!
//! # Example
//!
//! ```rust
//! use autotype::diagnostics::{parse, Severity};
//!
//! let out = "app.py:3:5: error: Missing return annotation [missing-return]";
//! let parsed = parse(out, Some(1));
//! assert_eq!(parsed.diagnostics()[0].severity, Severity::Error);
//! assert_eq!(parsed.diagnostics()[0].line, 3);
//! ```

use super::{Diagnostic, ParsedOutput, Severity};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Code attached to the synthetic diagnostic produced on a parse miss.
pub const UNPARSED_OUTPUT_CODE: &str = "unparsed-output";

/// Parse raw output without a default file attribution.
#[must_use]
pub fn parse(raw_output: &str, exit_code: Option<i32>) -> ParsedOutput {
    DiagnosticParser::default().parse(raw_output, exit_code)
}

/// Parser bound to the file an invocation targeted.
///
/// The file is used for the synthetic fallback diagnostic and for JSON
/// entries that omit a path.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticParser {
    default_file: PathBuf,
}

impl DiagnosticParser {
    /// Create a parser attributing unlocated output to `file`.
    #[must_use]
    pub fn for_file(file: impl AsRef<Path>) -> Self {
        Self {
            default_file: file.as_ref().to_path_buf(),
        }
    }

    /// Parse one invocation's output.
    ///
    /// `exit_code` is `None` when the process reported no code; that counts
    /// as failure.
    #[must_use]
    pub fn parse(&self, raw_output: &str, exit_code: Option<i32>) -> ParsedOutput {
        let diagnostics = match self.parse_json_report(raw_output) {
            Some(diagnostics) => diagnostics,
            None => self.parse_lines(raw_output),
        };

        let failed = exit_code != Some(0);
        if diagnostics.is_empty() && failed {
            let message = if raw_output.trim().is_empty() {
                format!(
                    "tool exited with {} and produced no output",
                    exit_code.map_or_else(|| "no exit code".to_string(), |c| format!("code {c}"))
                )
            } else {
                raw_output.to_string()
            };
            return ParsedOutput::RawFallback(
                Diagnostic::error(message)
                    .with_location(&self.default_file, 0)
                    .with_code(UNPARSED_OUTPUT_CODE),
            );
        }

        ParsedOutput::Parsed(diagnostics)
    }

    // =========================================================================
    // JSON report
    // =========================================================================

    /// Returns `None` when the output holds no JSON report at all.
    fn parse_json_report(&self, raw: &str) -> Option<Vec<Diagnostic>> {
        let value = extract_json_object(raw)?;
        let entries = value.get("errors")?.as_array()?;

        Some(
            entries
                .iter()
                .filter_map(|entry| self.parse_json_entry(entry))
                .collect(),
        )
    }

    fn parse_json_entry(&self, entry: &Value) -> Option<Diagnostic> {
        let message = entry
            .get("description")
            .or_else(|| entry.get("concise_description"))
            .or_else(|| entry.get("message"))?
            .as_str()?;
        let line = entry.get("line")?.as_u64()?;

        let severity_word = entry.get("severity").and_then(Value::as_str);
        if severity_word.is_some_and(Severity::is_informational) {
            return None;
        }
        let severity = severity_word.map_or(Severity::Error, Severity::from_word);

        let file = entry
            .get("path")
            .and_then(Value::as_str)
            .map_or_else(|| self.default_file.clone(), PathBuf::from);

        let mut diagnostic =
            Diagnostic::new(severity, message).with_location(file, u32::try_from(line).ok()?);

        if let Some(col) = entry
            .get("column")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
        {
            diagnostic = diagnostic.with_column(col);
        }

        // Pyrefly puts the kind in `name`; `code` is numeric there.
        let code = entry
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| entry.get("code").and_then(Value::as_str));
        if let Some(code) = code {
            diagnostic = diagnostic.with_code(code);
        }

        Some(diagnostic)
    }

    // =========================================================================
    // Line-oriented formats
    // =========================================================================

    fn parse_lines(&self, raw: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut pending: Option<(Severity, String, Option<String>)> = None;

        for line in raw.lines() {
            let trimmed = line.trim();

            if let Some(rest) = trimmed.strip_prefix("-->") {
                if let Some((severity, message, code)) = pending.take() {
                    if let Some((file, row, col)) = parse_location(rest.trim()) {
                        let mut diagnostic =
                            Diagnostic::new(severity, message).with_location(file, row);
                        if let Some(col) = col {
                            diagnostic = diagnostic.with_column(col);
                        }
                        if let Some(code) = code {
                            diagnostic = diagnostic.with_code(code);
                        }
                        diagnostics.push(diagnostic);
                    }
                }
                continue;
            }

            if let Some(header) = parse_block_header(trimmed) {
                pending = Some(header);
                continue;
            }

            if let Some(diagnostic) = parse_colon_line(trimmed) {
                pending = None;
                diagnostics.push(diagnostic);
            }
        }

        diagnostics
    }
}

/// Find a JSON object in the output, tolerating log noise around it.
fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Parse `ERROR message [code]` / `WARN message [code]`.
fn parse_block_header(line: &str) -> Option<(Severity, String, Option<String>)> {
    let (word, rest) = line.split_once(' ')?;
    let severity = match word {
        "ERROR" => Severity::Error,
        "WARN" | "WARNING" => Severity::Warning,
        _ => return None,
    };
    let (message, code) = extract_code(rest.trim());
    if message.is_empty() {
        return None;
    }
    Some((severity, message, code))
}

/// Parse `path:line[:col]`, splitting from the right so drive letters survive.
fn parse_location(location: &str) -> Option<(PathBuf, u32, Option<u32>)> {
    let parts: Vec<&str> = location.rsplitn(3, ':').collect();
    match parts.as_slice() {
        [col, row, file] if !file.is_empty() => match (row.parse(), col.parse()) {
            (Ok(row), Ok(col)) => Some((PathBuf::from(*file), row, Some(col))),
            _ => {
                // `C:\x.py:7` splits as ["7", "\x.py", "C"]
                let row = col.parse().ok()?;
                let file = location.rsplit_once(':')?.0;
                Some((PathBuf::from(file), row, None))
            }
        },
        [row, file] if !file.is_empty() => Some((PathBuf::from(*file), row.parse().ok()?, None)),
        _ => None,
    }
}

/// Parse `path:line[:col]: severity: message [code]`.
fn parse_colon_line(line: &str) -> Option<Diagnostic> {
    let parts: Vec<&str> = line.splitn(3, ':').collect();
    if parts.len() < 3 || parts[0].is_empty() {
        return None;
    }

    let file = parts[0];
    let row: u32 = parts[1].trim().parse().ok()?;

    let rest = parts[2].trim();
    let (col, message_part) = match rest.split_once(':') {
        Some((col_str, remaining)) => match col_str.trim().parse::<u32>() {
            Ok(col) => (Some(col), remaining.trim()),
            Err(_) => (None, rest),
        },
        None => (None, rest),
    };

    let (severity, body) = if let Some(body) = message_part.strip_prefix("error:") {
        (Severity::Error, body)
    } else if let Some(body) = message_part.strip_prefix("warning:") {
        (Severity::Warning, body)
    } else {
        return None;
    };

    let (message, code) = extract_code(body.trim());
    let mut diagnostic = Diagnostic::new(severity, message).with_location(file, row);
    if let Some(col) = col {
        diagnostic = diagnostic.with_column(col);
    }
    if let Some(code) = code {
        diagnostic = diagnostic.with_code(code);
    }
    Some(diagnostic)
}

/// Split a trailing `[code]` off a message.
fn extract_code(msg: &str) -> (String, Option<String>) {
    if msg.ends_with(']') {
        if let Some(start) = msg.rfind('[') {
            let code = &msg[start + 1..msg.len() - 1];
            let valid = !code.is_empty()
                && code
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if valid {
                return (msg[..start].trim().to_string(), Some(code.to_string()));
            }
        }
    }
    (msg.to_string(), None)
}
