//! Workload definitions: immutable compiled artifacts.
//!
//! A definition carries metadata plus a format-specific body. It can be
//! instantiated many times; the runtime layer builds a live workload from
//! it once per conversation turn.

use std::sync::Arc;

use sr_dsl::codegen::program::CompiledProgram;
use sr_dsl::sourcemap::SourceMapping;

use crate::code::CodeAgentFactory;
use crate::metadata::{AgentCard, WorkloadMetadata};
use crate::yaml::AgentSpec;

/// Format-specific payload of a definition.
#[derive(Clone)]
pub enum DefinitionBody {
    /// Compiled DSL program with its source mappings.
    Dsl {
        program: Arc<CompiledProgram>,
        mappings: Arc<Vec<SourceMapping>>,
    },
    /// Parsed declarative agent spec with all `$ref`s resolved.
    Declarative { spec: AgentSpec },
    /// Code-registered agent factory.
    Code { factory: Arc<dyn CodeAgentFactory> },
}

#[derive(Clone)]
pub struct WorkloadDefinition {
    pub metadata: WorkloadMetadata,
    pub body: DefinitionBody,
}

impl WorkloadDefinition {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The card this workload presents to callers; `name` and
    /// `description` round-trip from the source unchanged.
    pub fn card(&self) -> AgentCard {
        AgentCard {
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
        }
    }
}

impl std::fmt::Debug for WorkloadDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadDefinition")
            .field("name", &self.metadata.name)
            .field("format", &self.metadata.format)
            .finish()
    }
}
