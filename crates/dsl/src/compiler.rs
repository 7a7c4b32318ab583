//! The compile driver.
//!
//! Pipeline: hash source → cache lookup → on hit return the cached
//! program and mappings; on miss lex/parse/analyze (error diagnostics
//! abort compilation), generate, insert into the cache, and register the
//! mappings in the process source-map registry.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::BytecodeCache;
use crate::codegen::program::CompiledProgram;
use crate::codegen::CodeGenerator;
use crate::errors::{has_errors, Diagnostic};
use crate::parser;
use crate::semantic;
use crate::sourcemap::{SourceMapRegistry, SourceMapping};

/// Compilation failed; carries the full diagnostic list (errors and any
/// warnings gathered before the abort).
#[derive(Debug, thiserror::Error)]
#[error("compile failed with {} diagnostic(s)", .diagnostics.len())]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

#[derive(Debug)]
pub struct CompileOutput {
    pub program: Arc<CompiledProgram>,
    pub mappings: Arc<Vec<SourceMapping>>,
    /// Warnings from semantic analysis (empty on a cache hit).
    pub warnings: Vec<Diagnostic>,
    pub cache_hit: bool,
}

/// Compiler service owning the shared bytecode cache and source-map
/// registry. One instance per process root; passed down explicitly.
pub struct DslCompiler {
    cache: BytecodeCache,
    registry: RwLock<SourceMapRegistry>,
}

impl Default for DslCompiler {
    fn default() -> Self {
        Self::new(BytecodeCache::default())
    }
}

impl DslCompiler {
    pub fn new(cache: BytecodeCache) -> Self {
        Self { cache, registry: RwLock::new(SourceMapRegistry::new()) }
    }

    /// Compile DSL source, consulting the bytecode cache first.
    pub fn compile(&self, source: &str, file_name: &str) -> Result<CompileOutput, CompileError> {
        if let Some((program, mappings)) = self.cache.get(source) {
            tracing::debug!(file_name, "compile served from cache");
            return Ok(CompileOutput { program, mappings, warnings: Vec::new(), cache_hit: true });
        }

        let ast = parser::parse(source, file_name)
            .map_err(|d| CompileError { diagnostics: vec![d] })?;

        let diagnostics = semantic::analyze(&ast, file_name);
        if has_errors(&diagnostics) {
            for d in diagnostics.iter().filter(|d| d.is_error()) {
                tracing::warn!(diagnostic = %d, "compile error");
            }
            return Err(CompileError { diagnostics });
        }
        let warnings = diagnostics;

        let (program, mappings) = CodeGenerator::new().generate(&ast, file_name);
        let program = Arc::new(program);
        let mappings = Arc::new(mappings);

        self.cache.put(source, program.clone(), mappings.clone());
        self.registry.write().add_all(&program.class_name, &mappings);

        tracing::info!(
            file_name,
            class_name = %program.class_name,
            flows = program.flows.len(),
            agents = program.agents.len(),
            "compiled workflow"
        );
        Ok(CompileOutput { program, mappings, warnings, cache_hit: false })
    }

    /// Translate a generated-program line back to its source location.
    pub fn translate(&self, class_name: &str, generated_line: u32) -> Option<SourceMapping> {
        self.registry.read().lookup(class_name, generated_line).cloned()
    }

    pub fn cache(&self) -> &BytecodeCache {
        &self.cache
    }
}
