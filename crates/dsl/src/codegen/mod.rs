//! Code generation: lowering the validated AST into an executable
//! [`program::CompiledProgram`] plus a line-aware listing with source
//! mappings for error translation.

pub mod emitter;
pub mod generator;
pub mod program;

pub use generator::CodeGenerator;
pub use program::CompiledProgram;
