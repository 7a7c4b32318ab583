//! Code-defined agents.
//!
//! Code agents are native implementations registered in-process under a
//! logical name; discovery is a structural check against the registry
//! manifest rather than a runtime class graph. The built-in coding agent
//! registers here as `default`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use sr_tools::refs::ToolRef;

use crate::metadata::AgentCard;

/// Capability interface a code-defined agent implements: everything the
/// runtime needs to build an LLM agent out of it.
pub trait CodeAgentFactory: Send + Sync {
    fn card(&self) -> AgentCard;
    /// Tools this agent needs materialized.
    fn required_tools(&self) -> Vec<ToolRef>;
    /// Instruction text, given the project system message.
    fn instruction(&self, system_message: &str) -> String;
    /// Preferred model identifier, when the agent pins one.
    fn model(&self) -> Option<String> {
        None
    }
}

/// Process-level registry of code agents.
#[derive(Default)]
pub struct CodeAgentRegistry {
    factories: RwLock<HashMap<String, Arc<dyn CodeAgentFactory>>>,
}

impl CodeAgentRegistry {
    /// A registry pre-populated with the built-in coding agent.
    pub fn with_builtins() -> Self {
        let registry = Self::default();
        registry.register(Arc::new(CodingAgent));
        registry
    }

    pub fn register(&self, factory: Arc<dyn CodeAgentFactory>) {
        let name = factory.card().name;
        self.factories.write().insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CodeAgentFactory>> {
        self.factories.read().get(name).cloned()
    }

    pub fn cards(&self) -> Vec<AgentCard> {
        let mut cards: Vec<AgentCard> =
            self.factories.read().values().map(|f| f.card()).collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }
}

/// The built-in coding agent selected by `--agent default`.
pub struct CodingAgent;

impl CodeAgentFactory for CodingAgent {
    fn card(&self) -> AgentCard {
        AgentCard {
            name: "default".into(),
            description: "General-purpose coding agent with filesystem and CLI access".into(),
        }
    }

    fn required_tools(&self) -> Vec<ToolRef> {
        vec![
            ToolRef::builtin("streetrace.fs"),
            ToolRef::builtin("streetrace.cli"),
            ToolRef::builtin("streetrace.agents"),
        ]
    }

    fn instruction(&self, system_message: &str) -> String {
        if system_message.trim().is_empty() {
            DEFAULT_CODING_INSTRUCTION.to_owned()
        } else {
            system_message.to_owned()
        }
    }
}

const DEFAULT_CODING_INSTRUCTION: &str = "\
You are a software engineering agent working in the user's project \
directory. Read files before changing them, keep edits minimal and \
consistent with the surrounding code, and verify your work with the \
available tools. Use relative paths only.";
