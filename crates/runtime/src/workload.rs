//! Live workloads: the capability interface plus one backend per source
//! format. A workload is created from a definition once per conversation
//! turn and closed when the turn ends.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use sr_domain::config::CompactionStrategy;
use sr_domain::error::{Error, Result};
use sr_domain::message::Message;
use sr_dsl::ast::InstructionSource;
use sr_dsl::codegen::program::{AgentBlueprint, CompiledProgram};
use sr_providers::ModelFactory;
use sr_sessions::{Part, Session};
use sr_tools::{ToolProvider, ToolRef};
use sr_workloads::{AgentCard, AgentSpec, DefinitionBody, WorkloadDefinition};

use crate::agent::{AgentRunner, AgentRuntimeSpec};
use crate::bus::EventBus;
use crate::cancel::CancelToken;
use crate::context::{value_to_display, WorkflowContext};
use crate::flow::{FlowRunner, SubAgentRunner};

/// What one turn produced.
pub struct TurnOutput {
    pub final_text: String,
    pub structured: Option<Value>,
}

/// Capability interface every workload backend implements.
#[async_trait]
pub trait Workload: Send + Sync {
    fn card(&self) -> AgentCard;
    fn required_tools(&self) -> Vec<ToolRef>;
    /// Declared history policy: (max input tokens, strategy).
    fn compaction(&self) -> Option<(u64, CompactionStrategy)> {
        None
    }
    /// Run one turn against the prior conversation.
    async fn run(
        &self,
        history: &[Message],
        message: String,
        cancel: CancelToken,
    ) -> Result<TurnOutput>;
    /// Release per-instance resources (tool transports).
    async fn close(&self);
}

/// Dependency handles injected into every workload instance.
#[derive(Clone)]
pub struct WorkloadServices {
    pub models: Arc<ModelFactory>,
    pub tools: Arc<ToolProvider>,
    pub bus: Arc<EventBus>,
    pub system_message: String,
    pub project_context: String,
}

impl WorkloadServices {
    fn agent_runner(&self) -> AgentRunner {
        AgentRunner { models: self.models.clone(), tools: self.tools.clone(), bus: self.bus.clone() }
    }

    /// Instruction text with the project context appended.
    fn with_context(&self, instruction: &str) -> String {
        if self.project_context.trim().is_empty() {
            instruction.to_owned()
        } else {
            format!("{instruction}\n\n{}", self.project_context)
        }
    }
}

/// Build the right backend for a definition.
pub fn create_workload(
    definition: &WorkloadDefinition,
    services: WorkloadServices,
) -> Arc<dyn Workload> {
    match &definition.body {
        DefinitionBody::Dsl { program, .. } => Arc::new(DslWorkload {
            card: definition.card(),
            program: program.clone(),
            services,
        }),
        DefinitionBody::Declarative { spec } => Arc::new(SpecWorkload {
            card: definition.card(),
            spec: spec.clone(),
            services,
        }),
        DefinitionBody::Code { factory } => Arc::new(CodeWorkload {
            card: definition.card(),
            factory: factory.clone(),
            services,
        }),
    }
}

/// Convert a session log into provider messages (text parts only; tool
/// traffic is not replayed).
pub fn session_messages(session: &Session) -> Vec<Message> {
    session
        .events
        .iter()
        .filter_map(|event| {
            let content = event.content.as_ref()?;
            let text: String = content
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            if text.is_empty() {
                return None;
            }
            Some(match event.author.as_str() {
                "user" => Message::user(text),
                "system" => Message::system(text),
                _ => Message::assistant(text),
            })
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Code-registered workload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CodeWorkload {
    card: AgentCard,
    factory: Arc<dyn sr_workloads::CodeAgentFactory>,
    services: WorkloadServices,
}

#[async_trait]
impl Workload for CodeWorkload {
    fn card(&self) -> AgentCard {
        self.card.clone()
    }

    fn required_tools(&self) -> Vec<ToolRef> {
        self.factory.required_tools()
    }

    async fn run(
        &self,
        history: &[Message],
        message: String,
        cancel: CancelToken,
    ) -> Result<TurnOutput> {
        let spec = AgentRuntimeSpec {
            name: self.card.name.clone(),
            instruction: self
                .services
                .with_context(&self.factory.instruction(&self.services.system_message)),
            model: self.factory.model(),
            tools: self.factory.required_tools(),
            output_schema: None,
        };
        let guard_ctx = WorkflowContext::new(self.services.bus.clone(), cancel.clone());
        let result = self
            .services
            .agent_runner()
            .run_turn(&spec, history, &message, None, &guard_ctx, &cancel)
            .await?;
        Ok(TurnOutput { final_text: result.text, structured: result.structured })
    }

    async fn close(&self) {
        self.services.tools.close().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Declarative-spec workload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SpecWorkload {
    card: AgentCard,
    spec: AgentSpec,
    services: WorkloadServices,
}

#[async_trait]
impl Workload for SpecWorkload {
    fn card(&self) -> AgentCard {
        self.card.clone()
    }

    fn required_tools(&self) -> Vec<ToolRef> {
        self.spec.tool_refs()
    }

    async fn run(
        &self,
        history: &[Message],
        message: String,
        cancel: CancelToken,
    ) -> Result<TurnOutput> {
        let instruction = self
            .spec
            .effective_instruction()
            .ok_or_else(|| Error::LoadFailed(format!("agent '{}' has no instruction", self.card.name)))?;
        let runtime_spec = AgentRuntimeSpec {
            name: self.card.name.clone(),
            instruction: self.services.with_context(instruction),
            model: self.spec.model.clone(),
            tools: self.spec.tool_refs(),
            output_schema: None,
        };
        let guard_ctx = WorkflowContext::new(self.services.bus.clone(), cancel.clone());
        let result = self
            .services
            .agent_runner()
            .run_turn(&runtime_spec, history, &message, None, &guard_ctx, &cancel)
            .await?;
        Ok(TurnOutput { final_text: result.text, structured: result.structured })
    }

    async fn close(&self) {
        self.services.tools.close().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DSL workload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DslWorkload {
    card: AgentCard,
    program: Arc<CompiledProgram>,
    services: WorkloadServices,
}

impl DslWorkload {
    fn flow_runner(&self) -> Arc<FlowRunner> {
        Arc::new(FlowRunner {
            program: self.program.clone(),
            models: self.services.models.clone(),
            tools: self.services.tools.clone(),
            bus: self.services.bus.clone(),
            agents: Arc::new(BlueprintAgents {
                program: self.program.clone(),
                services: self.services.clone(),
            }),
        })
    }
}

#[async_trait]
impl Workload for DslWorkload {
    fn card(&self) -> AgentCard {
        self.card.clone()
    }

    fn required_tools(&self) -> Vec<ToolRef> {
        self.program
            .tools
            .values()
            .map(|decl| blueprint_tool_ref(decl))
            .collect()
    }

    fn compaction(&self) -> Option<(u64, CompactionStrategy)> {
        // The first agent that declares a history policy, paired with its
        // model's input budget.
        for agent in self.program.agents.values() {
            let strategy = agent
                .history
                .as_deref()
                .or_else(|| {
                    agent
                        .model
                        .as_ref()
                        .and_then(|m| self.program.models.get(m))
                        .and_then(|m| m.history.as_deref())
                })
                .and_then(parse_strategy);
            let budget = agent
                .model
                .as_ref()
                .and_then(|m| self.program.models.get(m))
                .and_then(|m| m.max_input_tokens);
            if let (Some(strategy), Some(budget)) = (strategy, budget) {
                return Some((budget, strategy));
            }
        }
        None
    }

    async fn run(
        &self,
        _history: &[Message],
        message: String,
        cancel: CancelToken,
    ) -> Result<TurnOutput> {
        let runner = self.flow_runner();
        let flow = self
            .program
            .entry_flow()
            .ok_or_else(|| Error::Other(format!("workflow '{}' has no entry flow", self.card.name)))?;

        let mut ctx = WorkflowContext::new(self.services.bus.clone(), cancel);
        ctx.message = message.clone();
        ctx.vars.insert("input".to_owned(), Value::String(message.clone()));
        if let Some(param) = flow.params.first() {
            ctx.vars.insert(param.clone(), Value::String(message));
        }

        let result = runner.run_flow(flow, &mut ctx).await?;
        let structured = result.clone().filter(|v| v.is_object() || v.is_array());
        let final_text = result.map(|v| value_to_display(&v)).unwrap_or_default();
        Ok(TurnOutput { final_text, structured })
    }

    async fn close(&self) {
        self.services.tools.close().await;
    }
}

/// Runs DSL agent blocks for `run <agent>` statements.
struct BlueprintAgents {
    program: Arc<CompiledProgram>,
    services: WorkloadServices,
}

#[async_trait]
impl SubAgentRunner for BlueprintAgents {
    async fn run_agent(&self, agent: &str, input: String, ctx: &WorkflowContext) -> Result<Value> {
        let blueprint = self
            .program
            .agents
            .get(agent)
            .ok_or_else(|| Error::WorkloadNotFound(agent.to_owned()))?;
        let spec = self.runtime_spec(blueprint)?;

        let result = self
            .services
            .agent_runner()
            .run_turn(&spec, &[], &input, Some(&self.program), ctx, &ctx.cancel)
            .await?;
        Ok(result
            .structured
            .unwrap_or(Value::String(result.text)))
    }
}

impl BlueprintAgents {
    fn runtime_spec(&self, blueprint: &AgentBlueprint) -> Result<AgentRuntimeSpec> {
        // Instructions are materialized at agent creation: only globals
        // are available, so prompt references resolve against an empty
        // variable table.
        let instruction = match &blueprint.instruction {
            InstructionSource::Inline(text) => text.clone(),
            InstructionSource::PromptRef(name) => self
                .program
                .prompts
                .get(name)
                .map(|p| {
                    let empty = WorkflowContext::new(
                        self.services.bus.clone(),
                        CancelToken::new(),
                    );
                    empty.render_template(&p.template)
                })
                .unwrap_or_default(),
        };

        let model = blueprint
            .model
            .as_ref()
            .and_then(|m| self.program.models.get(m))
            .map(|m| m.id.clone());

        let tools = blueprint
            .tools
            .iter()
            .filter_map(|name| self.program.tools.get(name))
            .map(blueprint_tool_ref)
            .collect();

        let output_schema = blueprint
            .output
            .as_ref()
            .and_then(|s| self.program.schemas.get(s))
            .cloned();

        Ok(AgentRuntimeSpec {
            name: blueprint.name.clone(),
            instruction: self.services.with_context(&instruction),
            model,
            tools,
            output_schema,
        })
    }
}

/// Declaration-level tool ref (whole module for builtins).
fn blueprint_tool_ref(decl: &sr_dsl::codegen::program::ToolDecl) -> ToolRef {
    use sr_dsl::ast::ToolBackend;
    use sr_tools::refs::McpServerRef;
    match &decl.backend {
        ToolBackend::Builtin { path } => ToolRef::Builtin { path: path.clone() },
        ToolBackend::Mcp { transport, target } => {
            let server = match transport.as_str() {
                "http" => McpServerRef::Http { url: target.clone(), headers: Default::default() },
                "sse" => McpServerRef::Sse { url: target.clone(), headers: Default::default() },
                _ => {
                    let mut parts = target.split_whitespace();
                    McpServerRef::Stdio {
                        command: parts.next().unwrap_or_default().to_owned(),
                        args: parts.map(str::to_owned).collect(),
                        env: Default::default(),
                        cwd: None,
                    }
                }
            };
            ToolRef::Mcp { server, tools: decl.allow.clone() }
        }
        ToolBackend::Callable { import_path } => {
            ToolRef::Callable { import_path: import_path.clone() }
        }
    }
}

fn parse_strategy(raw: &str) -> Option<CompactionStrategy> {
    match raw {
        "summarize" => Some(CompactionStrategy::Summarize),
        "truncate" => Some(CompactionStrategy::Truncate),
        _ => None,
    }
}
