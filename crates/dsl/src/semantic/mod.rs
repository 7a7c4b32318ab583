//! Semantic analysis: scope tracking, reference resolution, and the
//! diagnostic-producing analyzer pass.

pub mod analyzer;
pub mod scope;

pub use analyzer::analyze;
pub use scope::{Scope, ScopeType, Symbol, SymbolKind};
