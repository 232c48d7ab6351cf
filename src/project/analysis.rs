//! Static missing-annotation analysis of Python source.
//!
//! This is a lexical scan, not a parser: string literals and comments are
//! blanked out first, then function headers and module-level assignments are
//! matched line by line. It never executes or imports the code.

use crate::error::{AutotypeError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Soft keywords that look like `name:` at column 0.
const BLOCK_KEYWORDS: &[&str] = &[
    "else", "try", "finally", "except", "match", "case", "lambda", "if", "elif", "while", "for",
    "with", "class", "def",
];

/// What kind of annotation is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKind {
    ReturnType,
    Parameter,
    Variable,
}

impl fmt::Display for MissingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReturnType => write!(f, "return type"),
            Self::Parameter => write!(f, "parameter"),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// One missing annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingAnnotation {
    pub kind: MissingKind,
    /// Function or variable name.
    pub name: String,
    /// Parameter name for [`MissingKind::Parameter`].
    pub parameter: Option<String>,
    /// 1-based line.
    pub line: u32,
}

impl fmt::Display for MissingAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.parameter) {
            (MissingKind::Parameter, Some(param)) => {
                write!(f, "line {}: parameter '{}' of {}()", self.line, param, self.name)
            }
            (MissingKind::ReturnType, _) => {
                write!(f, "line {}: return type of {}()", self.line, self.name)
            }
            _ => write!(f, "line {}: {} '{}'", self.line, self.kind, self.name),
        }
    }
}

/// A parameter in a function header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub annotated: bool,
}

/// A function or method definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line: u32,
    /// Nested in a class or another function.
    pub nested: bool,
    pub params: Vec<ParamInfo>,
    pub has_return_annotation: bool,
}

impl FunctionInfo {
    /// `__init__` is conventionally left without a return annotation.
    fn needs_return_annotation(&self) -> bool {
        !self.has_return_annotation && self.name != "__init__"
    }

    /// Whether the header is fully annotated.
    #[must_use]
    pub fn is_fully_annotated(&self) -> bool {
        !self.needs_return_annotation() && self.params.iter().all(|p| p.annotated)
    }
}

/// Result of analysing one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub lines: usize,
    pub functions: Vec<FunctionInfo>,
    /// Module-level assignments, annotated or not.
    pub module_variables: usize,
    /// Missing annotations in source order.
    pub missing: Vec<MissingAnnotation>,
}

impl FileAnalysis {
    #[must_use]
    pub fn total_functions(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn annotated_functions(&self) -> usize {
        self.functions.iter().filter(|f| f.is_fully_annotated()).count()
    }

    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    /// Names of functions with at least one missing annotation.
    #[must_use]
    pub fn functions_needing_types(&self) -> Vec<&str> {
        self.functions
            .iter()
            .filter(|f| !f.is_fully_annotated())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Names of module-level variables without annotations.
    #[must_use]
    pub fn variables_needing_types(&self) -> Vec<&str> {
        self.missing
            .iter()
            .filter(|m| m.kind == MissingKind::Variable)
            .map(|m| m.name.as_str())
            .collect()
    }
}

/// Compiled patterns for the lexical scan.
#[derive(Debug, Clone)]
pub struct PythonAnalyzer {
    def_re: Regex,
    assign_re: Regex,
    annotated_re: Regex,
}

impl PythonAnalyzer {
    /// Compile the analyzer's patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AutotypeError::Other(anyhow::anyhow!(e)))
        };
        Ok(Self {
            def_re: compile(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(")?,
            assign_re: compile(r"^([A-Za-z_]\w*)\s*=[^=]")?,
            annotated_re: compile(r"^([A-Za-z_]\w*)\s*:\s*\S")?,
        })
    }

    /// Analyse a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::FileNotFound`] or an IO error.
    pub fn analyze_file(&self, path: &Path) -> Result<FileAnalysis> {
        if !path.is_file() {
            return Err(AutotypeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        Ok(self.analyze_source(&String::from_utf8_lossy(&bytes)))
    }

    /// Analyse Python source text.
    #[must_use]
    pub fn analyze_source(&self, source: &str) -> FileAnalysis {
        let masked = mask_strings_and_comments(source);
        let mut analysis = FileAnalysis {
            lines: source.lines().count(),
            ..FileAnalysis::default()
        };

        let mut offset = 0;
        let mut depth: i32 = 0;
        for (index, line) in masked.split('\n').enumerate() {
            let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let depth_before = depth;
            depth = (depth + bracket_delta(line)).max(0);

            if let Some(caps) = self.def_re.captures(line) {
                let indent = caps.get(1).map_or(0, |m| m.as_str().len());
                let name = caps.get(2).map_or("", |m| m.as_str()).to_string();
                // The match ends with the opening parenthesis.
                let open = offset + caps.get(0).map_or(1, |m| m.end()) - 1;
                if let Some(function) = parse_function(&masked, open, name, number, indent > 0) {
                    push_missing(&mut analysis.missing, &function);
                    analysis.functions.push(function);
                }
            } else if depth_before == 0 && !line.starts_with(char::is_whitespace) {
                self.scan_module_assignment(line, number, &mut analysis);
            }

            offset += line.len() + 1;
        }

        analysis
    }

    fn scan_module_assignment(&self, line: &str, number: u32, analysis: &mut FileAnalysis) {
        let line = line.trim_end();
        let first_group =
            |caps: regex::Captures<'_>| caps.get(1).map(|m| m.as_str().to_string());

        if let Some(name) = self.annotated_re.captures(line).and_then(first_group) {
            if !BLOCK_KEYWORDS.contains(&name.as_str()) {
                analysis.module_variables += 1;
            }
        } else if let Some(name) = self.assign_re.captures(line).and_then(first_group) {
            analysis.module_variables += 1;
            if !(name.starts_with("__") && name.ends_with("__")) {
                analysis.missing.push(MissingAnnotation {
                    kind: MissingKind::Variable,
                    name,
                    parameter: None,
                    line: number,
                });
            }
        }
    }
}

fn push_missing(missing: &mut Vec<MissingAnnotation>, function: &FunctionInfo) {
    for param in function.params.iter().filter(|p| !p.annotated) {
        missing.push(MissingAnnotation {
            kind: MissingKind::Parameter,
            name: function.name.clone(),
            parameter: Some(param.name.clone()),
            line: function.line,
        });
    }
    if function.needs_return_annotation() {
        missing.push(MissingAnnotation {
            kind: MissingKind::ReturnType,
            name: function.name.clone(),
            parameter: None,
            line: function.line,
        });
    }
}

fn parse_function(
    masked: &str,
    open: usize,
    name: String,
    line: u32,
    nested: bool,
) -> Option<FunctionInfo> {
    let close = matching_paren(masked, open)?;
    let params_text = masked.get(open + 1..close)?;
    let has_return_annotation = masked
        .get(close + 1..)
        .is_some_and(|rest| rest.trim_start().starts_with("->"));

    let params = split_top_level(params_text)
        .into_iter()
        .enumerate()
        .filter_map(|(i, raw)| parse_param(raw).filter(|p| !(i == 0 && is_receiver(&p.name))))
        .collect();

    Some(FunctionInfo {
        name,
        line,
        nested,
        params,
        has_return_annotation,
    })
}

fn is_receiver(name: &str) -> bool {
    name == "self" || name == "cls"
}

fn parse_param(raw: &str) -> Option<ParamInfo> {
    let param = raw.trim();
    if param.is_empty() || param == "*" || param == "/" {
        return None;
    }
    let param = param.trim_start_matches('*');
    let split = param.find([':', '=']).unwrap_or(param.len());
    let name = param[..split].trim();
    if name.is_empty() {
        return None;
    }
    Some(ParamInfo {
        name: name.to_string(),
        annotated: param[split..].starts_with(':'),
    })
}

fn bracket_delta(line: &str) -> i32 {
    line.chars().fold(0, |acc, c| match c {
        '(' | '[' | '{' => acc + 1,
        ')' | ']' | '}' => acc - 1,
        _ => acc,
    })
}

/// Byte index of the bracket closing the one at `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text.get(open..)?.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested in brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Replace comment text and string contents with spaces, keeping quotes and
/// newlines so that line numbers and brackets stay meaningful.
fn mask_strings_and_comments(source: &str) -> String {
    #[derive(Clone, Copy)]
    enum State {
        Code,
        Comment,
        Str { quote: char, triple: bool },
    }

    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut i = 0;

    let blank = |c: char| if c == '\n' { '\n' } else { ' ' };

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Code => match c {
                '#' => {
                    state = State::Comment;
                    out.push(' ');
                }
                '"' | '\'' => {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    if triple {
                        out.extend([c, c, c]);
                        i += 2;
                    } else {
                        out.push(c);
                    }
                    state = State::Str { quote: c, triple };
                }
                _ => out.push(c),
            },
            State::Comment => {
                if c == '\n' {
                    state = State::Code;
                }
                out.push(blank(c));
            }
            State::Str { quote, triple } => {
                if c == '\\' {
                    out.push(' ');
                    if let Some(&next) = chars.get(i + 1) {
                        out.push(blank(next));
                        i += 1;
                    }
                } else if c == quote
                    && (!triple
                        || (chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)))
                {
                    if triple {
                        out.extend([c, c, c]);
                        i += 2;
                    } else {
                        out.push(c);
                    }
                    state = State::Code;
                } else if c == '\n' && !triple {
                    // Unterminated single-line string.
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(blank(c));
                }
            }
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> FileAnalysis {
        PythonAnalyzer::new().unwrap().analyze_source(source)
    }

    #[test]
    fn test_unannotated_function() {
        let analysis = analyze("def add(a, b):\n    return a + b\n");
        assert_eq!(analysis.total_functions(), 1);
        assert_eq!(analysis.annotated_functions(), 0);
        assert_eq!(analysis.missing_count(), 3);
        assert_eq!(analysis.functions_needing_types(), vec!["add"]);
        assert_eq!(analysis.missing[2].kind, MissingKind::ReturnType);
        assert_eq!(
            analysis.missing[0].to_string(),
            "line 1: parameter 'a' of add()"
        );
    }

    #[test]
    fn test_fully_annotated_function() {
        let analysis = analyze(
            "async def fetch(url: str, *, retries: int = 3, **kw: object) -> bytes:\n    ...\n",
        );
        assert_eq!(analysis.annotated_functions(), 1);
        assert!(analysis.missing.is_empty());
        assert_eq!(analysis.functions[0].params.len(), 3);
    }

    #[test]
    fn test_methods_skip_receiver_and_init_return() {
        let source = "class A:\n    def __init__(self, x: int):\n        self.x = x\n\n    \
                      @classmethod\n    def make(cls):\n        return cls(1)\n";
        let analysis = analyze(source);

        assert_eq!(analysis.total_functions(), 2);
        assert!(analysis.functions.iter().all(|f| f.nested));
        assert!(analysis.functions[0].is_fully_annotated());
        assert_eq!(analysis.missing.len(), 1);
        assert_eq!(analysis.missing[0].name, "make");
        assert_eq!(analysis.missing[0].line, 6);
    }

    #[test]
    fn test_multiline_signature() {
        let source = "def f(\n    a: int,\n    b: Dict[str, int] = {},\n    c=(1, 2),\n) -> None:\n    pass\n";
        let analysis = analyze(source);
        let function = &analysis.functions[0];
        assert!(function.has_return_annotation);
        assert_eq!(function.params.len(), 3);
        assert_eq!(analysis.missing.len(), 1);
        assert_eq!(analysis.missing[0].parameter.as_deref(), Some("c"));
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let source = "\"\"\"\ndef fake(x):\n    pass\n\"\"\"\n# def commented(y):\nMSG = 'def nope(z): #'\n";
        let analysis = analyze(source);
        assert_eq!(analysis.total_functions(), 0);
        assert_eq!(analysis.variables_needing_types(), vec!["MSG"]);
        assert_eq!(analysis.missing[0].line, 6);
    }

    #[test]
    fn test_module_variables() {
        let source = "__all__ = ['x']\nLIMIT: int = 3\nname = 'x'\nif name == 'x':\n    inner = 1\n\
                      try:\n    pass\nelse: pass\nCONFIG = dict(\n    a=1,\n)\n";
        let analysis = analyze(source);
        assert_eq!(analysis.variables_needing_types(), vec!["name", "CONFIG"]);
        assert_eq!(analysis.module_variables, 4);
    }

    #[test]
    fn test_default_containing_comma_in_string() {
        let analysis = analyze("def f(sep=\",\", n: int = 1) -> str:\n    return sep\n");
        let params = &analysis.functions[0].params;
        assert_eq!(params.len(), 2);
        assert!(!params[0].annotated);
        assert!(params[1].annotated);
    }

    #[test]
    fn test_line_count() {
        let analysis = analyze("a = 1\nb = 2\n\n");
        assert_eq!(analysis.lines, 3);
    }

    #[test]
    fn test_analyze_missing_file() {
        let err = PythonAnalyzer::new()
            .unwrap()
            .analyze_file(Path::new("/no/such/file.py"))
            .unwrap_err();
        assert!(matches!(err, AutotypeError::FileNotFound { .. }));
    }
}
