//! Source map registry.
//!
//! Bidirectional mappings between generated program lines and original DSL
//! file positions, used to translate runtime errors in generated code back
//! to the source file. Lookup by generated line returns the nearest mapping
//! at or below that line via binary search.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Single mapping entry from generated code to source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    /// Line number in the generated program listing (1-indexed).
    pub generated_line: u32,
    /// Column in the generated line (0-indexed).
    pub generated_column: u32,
    /// Path of the original DSL source file.
    pub source_file: String,
    /// Line in the source file (1-indexed).
    pub source_line: u32,
    /// Column in the source file (0-indexed).
    pub source_column: u32,
    /// End line for multi-line spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_end_line: Option<u32>,
    /// End column for multi-line spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_end_column: Option<u32>,
}

/// Mappings for one generated file, kept sorted by generated line.
#[derive(Debug, Default)]
struct FileMappings {
    mappings: Vec<SourceMapping>,
}

impl FileMappings {
    fn add(&mut self, mapping: SourceMapping) {
        let idx = self
            .mappings
            .partition_point(|m| m.generated_line < mapping.generated_line);
        self.mappings.insert(idx, mapping);
    }

    /// Rightmost mapping with `generated_line <= line`, if any.
    fn lookup(&self, line: u32) -> Option<&SourceMapping> {
        let idx = self.mappings.partition_point(|m| m.generated_line <= line);
        if idx == 0 {
            return None;
        }
        self.mappings.get(idx - 1)
    }
}

/// Registry of source mappings for all compiled files in the process.
///
/// Held by the compiler service and passed down explicitly; not a global.
#[derive(Debug, Default)]
pub struct SourceMapRegistry {
    files: HashMap<String, FileMappings>,
}

impl SourceMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping for a generated file.
    pub fn add_mapping(&mut self, generated_file: &str, mapping: SourceMapping) {
        tracing::trace!(
            generated_file,
            generated_line = mapping.generated_line,
            source_file = %mapping.source_file,
            source_line = mapping.source_line,
            "added source mapping"
        );
        self.files
            .entry(generated_file.to_owned())
            .or_default()
            .add(mapping);
    }

    /// Record all mappings from one compile.
    pub fn add_all(&mut self, generated_file: &str, mappings: &[SourceMapping]) {
        for m in mappings {
            self.add_mapping(generated_file, m.clone());
        }
    }

    /// Find the source location for a generated line.
    pub fn lookup(&self, generated_file: &str, generated_line: u32) -> Option<&SourceMapping> {
        self.files.get(generated_file)?.lookup(generated_line)
    }

    /// All mappings for a generated file, sorted by generated line.
    pub fn mappings(&self, generated_file: &str) -> Vec<SourceMapping> {
        self.files
            .get(generated_file)
            .map(|f| f.mappings.clone())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}
