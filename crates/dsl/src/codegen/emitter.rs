//! Line-aware code emitter.
//!
//! Tracks indentation and line numbers while building the generated
//! listing, and records a source mapping for every statement origin.
//! Each mapped line is preceded by a `# <source-file>:<line>` comment
//! unless no-comments mode is requested.

use crate::sourcemap::SourceMapping;

const DEFAULT_INDENT: &str = "    ";

pub struct CodeEmitter {
    lines: Vec<String>,
    indent_level: usize,
    indent_str: &'static str,
    source_file: String,
    mappings: Vec<SourceMapping>,
    emit_comments: bool,
}

impl CodeEmitter {
    pub fn new(source_file: &str) -> Self {
        Self::with_comments(source_file, true)
    }

    pub fn with_comments(source_file: &str, emit_comments: bool) -> Self {
        Self {
            lines: Vec::new(),
            indent_level: 0,
            indent_str: DEFAULT_INDENT,
            source_file: source_file.to_owned(),
            mappings: Vec::new(),
            emit_comments,
        }
    }

    /// Emit a line of code. When `source_line` is given, a source comment
    /// precedes it and a mapping is recorded for the emitted line.
    pub fn emit(&mut self, code: &str, source_line: Option<u32>) {
        if let Some(line) = source_line {
            if self.emit_comments {
                let indent = self.indent_str.repeat(self.indent_level);
                self.lines.push(format!("{indent}# {}:{line}", self.source_file));
            }
        }

        let indent = self.indent_str.repeat(self.indent_level);
        self.lines.push(format!("{indent}{code}"));

        if let Some(line) = source_line {
            let generated_line = self.lines.len() as u32;
            self.mappings.push(SourceMapping {
                generated_line,
                generated_column: (self.indent_str.len() * self.indent_level) as u32,
                source_file: self.source_file.clone(),
                source_line: line,
                source_column: 0,
                source_end_line: None,
                source_end_column: None,
            });
        }
    }

    pub fn emit_comment(&mut self, text: &str) {
        let indent = self.indent_str.repeat(self.indent_level);
        self.lines.push(format!("{indent}# {text}"));
    }

    pub fn emit_blank(&mut self) {
        self.lines.push(String::new());
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// The complete listing with a trailing newline.
    pub fn code(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn into_mappings(self) -> Vec<SourceMapping> {
        self.mappings
    }

    pub fn mappings(&self) -> &[SourceMapping] {
        &self.mappings
    }

    /// Number of lines emitted so far. The next emitted code line will be
    /// `line_count() + 1` (+2 when a source comment precedes it).
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn indent_level(&self) -> usize {
        self.indent_level
    }
}
