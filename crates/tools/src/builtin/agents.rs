//! Agent-facing built-ins: discovery and sub-workload spawning.
//!
//! These tools talk back into the workload layer through the
//! [`AgentHost`](crate::provider::AgentHost) handle on the tool context.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::{object_schema, require_str, BuiltinTool};
use crate::provider::ToolContext;
use crate::result::ToolCallResult;

pub struct ListAgents;

#[async_trait]
impl BuiltinTool for ListAgents {
    fn module(&self) -> &'static str {
        "agents"
    }
    fn name(&self) -> &'static str {
        "list_agents"
    }
    fn description(&self) -> &'static str {
        "List the agents available in this project.\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["work_dir"],
        )
    }

    async fn invoke(&self, _args: Value, ctx: &ToolContext) -> ToolCallResult {
        let Some(host) = &ctx.host else {
            return ToolCallResult::failure(self.name(), "no agent host available");
        };
        let agents: Vec<Value> = host
            .list_agents()
            .await
            .into_iter()
            .map(|(name, description)| json!({"name": name, "description": description}))
            .collect();
        ToolCallResult::success(self.name(), json!({"agents": agents}))
    }
}

pub struct ListTools;

#[async_trait]
impl BuiltinTool for ListTools {
    fn module(&self) -> &'static str {
        "agents"
    }
    fn name(&self) -> &'static str {
        "list_tools"
    }
    fn description(&self) -> &'static str {
        "List the tools available to this workload.\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["work_dir"],
        )
    }

    async fn invoke(&self, _args: Value, ctx: &ToolContext) -> ToolCallResult {
        let Some(host) = &ctx.host else {
            return ToolCallResult::failure(self.name(), "no agent host available");
        };
        let tools: Vec<Value> = host
            .list_tools()
            .await
            .into_iter()
            .map(|(name, description)| json!({"name": name, "description": description}))
            .collect();
        ToolCallResult::success(self.name(), json!({"tools": tools}))
    }
}

pub struct RunAgent;

#[async_trait]
impl BuiltinTool for RunAgent {
    fn module(&self) -> &'static str {
        "agents"
    }
    fn name(&self) -> &'static str {
        "run_agent"
    }
    fn description(&self) -> &'static str {
        "Run a named agent as a sub-workload and return its final answer.\n\
         agent: name of the agent to run\n\
         input: the task or message for the agent\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "agent": {"type": "string", "description": "Name of the agent to run"},
                "input": {"type": "string", "description": "The task or message for the agent"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["agent", "input", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let agent = match require_str(&args, "agent", self.name()) {
            Ok(a) => a,
            Err(fail) => return fail,
        };
        let input = match require_str(&args, "input", self.name()) {
            Ok(i) => i,
            Err(fail) => return fail,
        };
        let Some(host) = &ctx.host else {
            return ToolCallResult::failure(self.name(), "no agent host available");
        };
        match host.run_agent(agent, input).await {
            Ok(answer) => {
                ToolCallResult::success(self.name(), json!({"agent": agent, "result": answer}))
            }
            Err(e) => ToolCallResult::failure(self.name(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AgentHost, ToolContext};
    use sr_domain::error::Result;

    struct FakeHost;

    #[async_trait]
    impl AgentHost for FakeHost {
        async fn run_agent(&self, agent: &str, input: &str) -> Result<String> {
            Ok(format!("{agent} processed: {input}"))
        }
        async fn list_agents(&self) -> Vec<(String, String)> {
            vec![("coder".into(), "writes code".into())]
        }
        async fn list_tools(&self) -> Vec<(String, String)> {
            vec![("read_file".into(), "reads files".into())]
        }
    }

    fn ctx_with_host() -> ToolContext {
        let mut ctx = ToolContext::new(std::env::temp_dir());
        ctx.host = Some(std::sync::Arc::new(FakeHost));
        ctx
    }

    #[tokio::test]
    async fn run_agent_delegates_to_host() {
        let result = RunAgent
            .invoke(json!({"agent": "coder", "input": "fix it"}), &ctx_with_host())
            .await;
        assert!(result.is_success());
        assert_eq!(result.output.unwrap()["result"], "coder processed: fix it");
    }

    #[tokio::test]
    async fn list_agents_without_host_fails_cleanly() {
        let ctx = ToolContext::new(std::env::temp_dir());
        let result = ListAgents.invoke(json!({}), &ctx).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn list_agents_and_tools_report_from_host() {
        let agents = ListAgents.invoke(json!({}), &ctx_with_host()).await;
        assert_eq!(agents.output.unwrap()["agents"][0]["name"], "coder");

        let tools = ListTools.invoke(json!({}), &ctx_with_host()).await;
        assert_eq!(tools.output.unwrap()["tools"][0]["name"], "read_file");
    }
}
