//! Compiler diagnostics and the stable error-code table.
//!
//! Error codes follow compiler conventions: E00xx reference, E02xx type,
//! E03xx import, E04xx syntax, E05xx semantic, W0xxx warnings.

use std::fmt;

use crate::token::Span;

/// Stable DSL compiler error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Undefined reference to model, tool, agent, schema, or prompt.
    E0001,
    /// Variable used before definition.
    E0002,
    /// Duplicate definition in the same scope.
    E0003,
    /// Type mismatch in expression.
    E0004,
    /// Import file not found.
    E0005,
    /// Circular import detected.
    E0006,
    /// Invalid token or unexpected end of input.
    E0007,
    /// Mismatched indentation.
    E0008,
    /// Invalid guardrail action for the handler context.
    E0009,
    /// Missing required property.
    E0010,
    /// Circular agent reference detected.
    E0011,
    /// Prompt references undefined variable.
    E0015,
    /// Instruction prompt references runtime variable.
    E0016,
    /// Agent has both delegate and use properties (unusual pattern).
    W0002,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E0001 => "E0001",
            ErrorCode::E0002 => "E0002",
            ErrorCode::E0003 => "E0003",
            ErrorCode::E0004 => "E0004",
            ErrorCode::E0005 => "E0005",
            ErrorCode::E0006 => "E0006",
            ErrorCode::E0007 => "E0007",
            ErrorCode::E0008 => "E0008",
            ErrorCode::E0009 => "E0009",
            ErrorCode::E0010 => "E0010",
            ErrorCode::E0011 => "E0011",
            ErrorCode::E0015 => "E0015",
            ErrorCode::E0016 => "E0016",
            ErrorCode::W0002 => "W0002",
        }
    }

    /// Human-readable category of the code.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::E0001 | ErrorCode::E0002 | ErrorCode::E0003 => "reference",
            ErrorCode::E0004 => "type",
            ErrorCode::E0005 | ErrorCode::E0006 => "import",
            ErrorCode::E0007 | ErrorCode::E0008 => "syntax",
            _ => "semantic",
        }
    }

    /// The severity this code carries by default.
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCode::W0002 => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A single compiler diagnostic with source location and optional
/// did-you-mean suggestion.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub span: Span,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>, file: &str, span: Span) -> Self {
        Self {
            code,
            severity: code.default_severity(),
            message: message.into(),
            file: file.to_owned(),
            span,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {} {}: {}",
            self.file,
            self.span.line,
            self.span.col,
            self.severity.as_str(),
            self.code,
            self.message,
        )?;
        if let Some(s) = &self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// True when any diagnostic in the list blocks code generation.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

/// Render a diagnostic with the offending source line and a caret marker,
/// the way the CLI surfaces compile failures.
pub fn render_excerpt(diag: &Diagnostic, source: &str) -> String {
    let mut out = diag.to_string();
    let line_no = diag.span.line as usize;
    if line_no == 0 {
        return out;
    }
    if let Some(line) = source.lines().nth(line_no - 1) {
        out.push('\n');
        out.push_str(&format!("  {line_no:>4} | {line}\n"));
        let caret_pad = " ".repeat(diag.span.col as usize);
        out.push_str(&format!("       | {caret_pad}^"));
    }
    out
}
