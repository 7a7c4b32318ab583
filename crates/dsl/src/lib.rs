//! StreetRace DSL compiler.
//!
//! The pipeline: [`lexer`] turns indentation-sensitive source into a token
//! stream, [`parser`] builds the AST, [`semantic`] checks scopes and
//! references and produces diagnostics, [`codegen`] lowers the AST to an
//! executable [`codegen::program::CompiledProgram`] with source mappings,
//! and [`compiler::DslCompiler`] drives the whole thing through the
//! content-addressed [`cache::BytecodeCache`].

pub mod ast;
pub mod cache;
pub mod codegen;
pub mod compiler;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod semantic;
pub mod sourcemap;
pub mod token;

pub use compiler::{CompileError, CompileOutput, DslCompiler};
pub use errors::{Diagnostic, ErrorCode, Severity};
