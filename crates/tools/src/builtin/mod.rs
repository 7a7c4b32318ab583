//! Built-in tool registry.
//!
//! Each built-in declares its full parameter schema, including ambient
//! parameters such as `work_dir` that the provider curries away before
//! the model ever sees the tool.

pub mod agents;
pub mod cli;
pub mod fs;
pub mod patch;
pub mod search;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::provider::ToolContext;
use crate::result::ToolCallResult;

/// Parameters the provider fixes from ambient context and hides from the
/// exposed schema.
pub const AMBIENT_PARAMS: &[&str] = &["work_dir"];

#[async_trait]
pub trait BuiltinTool: Send + Sync {
    /// Module this tool belongs to (`fs`, `cli`, `search`, `agents`).
    fn module(&self) -> &'static str;
    fn name(&self) -> &'static str;
    /// Description including one `work_dir: …` line for the ambient
    /// parameter; the provider strips that line.
    fn description(&self) -> &'static str;
    /// Full JSON Schema including ambient parameters.
    fn parameters(&self) -> Value;
    /// Invoke with arguments that already include the injected ambient
    /// parameters.
    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult;
}

/// JSON Schema helper.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Fetch a required string argument or produce the standard failure.
pub(crate) fn require_str<'a>(
    args: &'a Value,
    key: &str,
    tool: &str,
) -> Result<&'a str, ToolCallResult> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolCallResult::failure(tool, format!("missing required argument '{key}'")))
}

/// Registry of all built-in tools, addressed as
/// `streetrace.<module>[.<name>]`.
pub struct BuiltinRegistry {
    tools: Vec<Arc<dyn BuiltinTool>>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl BuiltinRegistry {
    /// The standard tool set.
    pub fn standard() -> Self {
        Self {
            tools: vec![
                Arc::new(fs::ReadFile),
                Arc::new(fs::WriteFile),
                Arc::new(fs::WriteJson),
                Arc::new(fs::CreateDirectory),
                Arc::new(fs::AppendToFile),
                Arc::new(fs::ListDirectory),
                Arc::new(search::FindInFiles),
                Arc::new(cli::ExecuteCliCommand),
                Arc::new(patch::ApplyUnifiedPatch),
                Arc::new(agents::ListAgents),
                Arc::new(agents::ListTools),
                Arc::new(agents::RunAgent),
            ],
        }
    }

    /// Resolve a dotted builtin path: `streetrace.fs` → all fs tools,
    /// `streetrace.fs.read_file` → one tool.
    pub fn resolve(&self, path: &str) -> Vec<Arc<dyn BuiltinTool>> {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            ["streetrace", module] => self
                .tools
                .iter()
                .filter(|t| t.module() == *module)
                .cloned()
                .collect(),
            ["streetrace", module, name] => self
                .tools
                .iter()
                .filter(|t| t.module() == *module && t.name() == *name)
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn all(&self) -> &[Arc<dyn BuiltinTool>] {
        &self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_the_minimum_set() {
        let reg = BuiltinRegistry::standard();
        let names: Vec<&str> = reg.all().iter().map(|t| t.name()).collect();
        for required in [
            "read_file",
            "write_file",
            "write_json",
            "create_directory",
            "append_to_file",
            "list_directory",
            "find_in_files",
            "execute_cli_command",
            "apply_unified_patch",
            "list_agents",
            "list_tools",
            "run_agent",
        ] {
            assert!(names.contains(&required), "missing builtin {required}");
        }
    }

    #[test]
    fn resolve_module_and_single_tool() {
        let reg = BuiltinRegistry::standard();
        let fs_tools = reg.resolve("streetrace.fs");
        assert_eq!(fs_tools.len(), 8);

        let one = reg.resolve("streetrace.fs.read_file");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name(), "read_file");

        assert!(reg.resolve("streetrace.nope").is_empty());
        assert!(reg.resolve("other.fs").is_empty());
    }
}
