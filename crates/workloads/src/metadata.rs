//! Workload metadata.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which source format a definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Dsl,
    Declarative,
    Code,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Dsl => "dsl",
            SourceFormat::Declarative => "declarative",
            SourceFormat::Code => "code",
        }
    }
}

/// Immutable metadata carried by every workload definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadMetadata {
    /// Unique within a discovery scope.
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub format: SourceFormat,
}

/// The public identity an agent presents (round-trips through the
/// definition unchanged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
}
