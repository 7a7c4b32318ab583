//! Workload abstraction: unified discovery and loading of the three
//! agent source formats (compiled DSL, declarative YAML spec, and
//! code-registered agents).

pub mod code;
pub mod definition;
pub mod dsl;
pub mod manager;
pub mod metadata;
pub mod yaml;

pub use code::{CodeAgentFactory, CodeAgentRegistry};
pub use definition::{DefinitionBody, WorkloadDefinition};
pub use manager::WorkloadManager;
pub use metadata::{AgentCard, SourceFormat, WorkloadMetadata};
pub use yaml::AgentSpec;
