//! The LLM agent loop.
//!
//! An agent is a model with a fixed instruction and a set of tools.
//! Each turn: run before-model guardrails on the input, call the model,
//! dispatch any tool calls (tool-call and tool-response events are always
//! adjacent), loop until the model answers with text, then run the
//! after-model guardrails. Structured-output agents get their final
//! answer deep-parsed and schema-validated.

use std::sync::Arc;

use serde_json::Value;

use sr_domain::error::{Error, Result};
use sr_domain::event::RuntimeEvent;
use sr_domain::message::{ContentPart, Message, MessageContent, Role};
use sr_dsl::ast::{HandlerEvent, HandlerTiming};
use sr_dsl::codegen::program::{CompiledProgram, SchemaDecl};
use sr_providers::{GenerateRequest, ModelFactory};
use sr_tools::{ToolProvider, ToolRef};

use crate::bus::EventBus;
use crate::cancel::CancelToken;
use crate::context::WorkflowContext;
use crate::guardrails::{apply_handlers, HandlerOutcome};
use crate::structured::{parse_model_json, validate_against};

/// Tool-call loops before the turn is force-stopped.
const MAX_TOOL_LOOPS: usize = 25;
/// Guardrail-initiated restarts before the turn fails.
const MAX_RETRIES: usize = 3;

/// Everything needed to run one agent: the materialized form of a DSL
/// agent block, a declarative spec, or a code-registered factory.
#[derive(Clone)]
pub struct AgentRuntimeSpec {
    pub name: String,
    pub instruction: String,
    /// `provider/model` identifier; `None` uses the session default.
    pub model: Option<String>,
    pub tools: Vec<ToolRef>,
    pub output_schema: Option<SchemaDecl>,
}

#[derive(Debug)]
pub struct AgentTurnResult {
    pub text: String,
    /// Validated structured output, for agents that declare a schema.
    pub structured: Option<Value>,
}

/// Shared services for running agent turns.
pub struct AgentRunner {
    pub models: Arc<ModelFactory>,
    pub tools: Arc<ToolProvider>,
    pub bus: Arc<EventBus>,
}

impl AgentRunner {
    /// Run one agent turn over `history` + `user_message`.
    ///
    /// `program` supplies guardrail handlers when the agent came from a
    /// DSL file; `guard_ctx` resolves their conditions.
    pub async fn run_turn(
        &self,
        spec: &AgentRuntimeSpec,
        history: &[Message],
        user_message: &str,
        program: Option<&CompiledProgram>,
        guard_ctx: &WorkflowContext,
        cancel: &CancelToken,
    ) -> Result<AgentTurnResult> {
        let resolved = self.models.get_model(spec.model.as_deref())?;
        let handles = self.tools.materialize(&spec.tools).await?;
        let tool_defs: Vec<_> = handles.iter().map(|h| h.definition.clone()).collect();

        let mut current_input = user_message.to_owned();
        let mut restarts = 0usize;

        'turn: loop {
            cancel.check()?;

            // Input guardrails.
            if let Some(program) = program {
                match apply_handlers(
                    program,
                    HandlerTiming::Before,
                    HandlerEvent::Model,
                    guard_ctx,
                    &current_input,
                ) {
                    HandlerOutcome::Continue => {}
                    HandlerOutcome::Masked(masked) => current_input = masked,
                    HandlerOutcome::Block(reason) => return Err(Error::BlockedInput(reason)),
                    HandlerOutcome::Retry(message) => {
                        restarts += 1;
                        if restarts > MAX_RETRIES {
                            return Err(Error::RetryInput(message));
                        }
                        current_input = message;
                        continue 'turn;
                    }
                }
            }

            let mut messages = Vec::with_capacity(history.len() + 2);
            if !spec.instruction.is_empty() {
                messages.push(Message::system(spec.instruction.clone()));
            }
            messages.extend_from_slice(history);
            messages.push(Message::user(current_input.clone()));

            for _ in 0..MAX_TOOL_LOOPS {
                cancel.check()?;

                let resp = resolved
                    .provider
                    .generate(GenerateRequest {
                        messages: messages.clone(),
                        tools: tool_defs.clone(),
                        model: resolved.model_name.clone(),
                        json_mode: spec.output_schema.is_some(),
                    })
                    .await?;

                if let Some(usage) = &resp.usage {
                    if usage.cost.is_none() {
                        self.bus.publish(RuntimeEvent::Warning {
                            message: format!("cost unknown for model {}", resp.model),
                        });
                    }
                    self.bus.publish_usage(usage);
                }

                if !resp.tool_calls.is_empty() {
                    let mut call_parts = Vec::new();
                    if !resp.content.is_empty() {
                        call_parts.push(ContentPart::Text { text: resp.content.clone() });
                    }
                    for call in &resp.tool_calls {
                        call_parts.push(ContentPart::ToolUse {
                            id: call.call_id.clone(),
                            name: call.tool_name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    messages.push(Message {
                        role: Role::Assistant,
                        content: MessageContent::Parts(call_parts),
                    });

                    for call in &resp.tool_calls {
                        cancel.check()?;
                        self.bus.publish(RuntimeEvent::ToolCallEvent {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            arguments: call.arguments.clone(),
                        });

                        let result = match handles
                            .iter()
                            .find(|h| h.definition.name == call.tool_name)
                        {
                            Some(handle) => {
                                self.tools.invoke(handle, call.arguments.clone()).await
                            }
                            None => sr_tools::ToolCallResult::failure(
                                &call.tool_name,
                                format!("unknown tool '{}'", call.tool_name),
                            ),
                        };

                        let payload = result.to_model_json();
                        self.bus.publish(RuntimeEvent::ToolResponse {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            content: payload.clone(),
                            is_error: !result.is_success(),
                        });
                        messages.push(Message::tool_result(call.call_id.clone(), payload));
                    }
                    continue;
                }

                // Final text: output guardrails, then done.
                let mut text = resp.content;
                if let Some(program) = program {
                    match apply_handlers(
                        program,
                        HandlerTiming::After,
                        HandlerEvent::Model,
                        guard_ctx,
                        &text,
                    ) {
                        HandlerOutcome::Continue => {}
                        HandlerOutcome::Masked(masked) => text = masked,
                        HandlerOutcome::Block(reason) => {
                            return Err(Error::BlockedInput(reason))
                        }
                        HandlerOutcome::Retry(message) => {
                            restarts += 1;
                            if restarts > MAX_RETRIES {
                                return Err(Error::RetryInput(message));
                            }
                            current_input = message;
                            continue 'turn;
                        }
                    }
                }

                self.bus.publish(RuntimeEvent::AgentText {
                    agent: spec.name.clone(),
                    text: text.clone(),
                });

                let structured = match &spec.output_schema {
                    Some(schema) => {
                        let value = parse_model_json(&text)?;
                        validate_against(schema, &value)?;
                        Some(value)
                    }
                    None => None,
                };

                return Ok(AgentTurnResult { text, structured });
            }

            return Err(Error::Other(format!(
                "agent '{}' exceeded {MAX_TOOL_LOOPS} tool-call loops",
                spec.name
            )));
        }
    }
}
