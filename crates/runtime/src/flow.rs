//! Flow interpreter.
//!
//! Executes compiled flow bodies: sequential statements in source order,
//! `parallel` fan-out/fan-in with isolated child contexts and
//! last-writer-wins merge, ordered or fanned `for` loops, `match`
//! dispatch, direct `call llm` invocations, and tool calls. Cancellation
//! is checked at every suspension point.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinSet;

use sr_domain::error::{Error, Result};
use sr_domain::event::RuntimeEvent;
use sr_domain::message::Message;
use sr_dsl::ast::{Pattern, ToolBackend};
use sr_dsl::codegen::program::{CompiledProgram, FlowProgram, Op, OpKind, ToolDecl};
use sr_providers::{GenerateRequest, ModelFactory};
use sr_tools::refs::{McpServerRef, ToolRef};
use sr_tools::{ToolHandle, ToolProvider};

use crate::bus::EventBus;
use crate::context::{literal_to_value, value_to_display, values_equal, WorkflowContext};

/// Concurrency cap for fanned-out `for` iterations.
const FOR_FAN_OUT_LIMIT: usize = 8;

/// Runs named agents on behalf of flow statements (`run agent`).
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    async fn run_agent(
        &self,
        agent: &str,
        input: String,
        ctx: &WorkflowContext,
    ) -> Result<Value>;
}

/// How one block of statements finished.
pub enum BlockOutcome {
    Normal,
    Continue,
    Return(Value),
}

pub struct FlowRunner {
    pub program: Arc<CompiledProgram>,
    pub models: Arc<ModelFactory>,
    pub tools: Arc<ToolProvider>,
    pub bus: Arc<EventBus>,
    pub agents: Arc<dyn SubAgentRunner>,
}

impl FlowRunner {
    /// Execute a flow to completion. Returns the flow's `return` value,
    /// `None` when it ran off the end.
    pub async fn run_flow(
        self: Arc<Self>,
        flow: &FlowProgram,
        ctx: &mut WorkflowContext,
    ) -> Result<Option<Value>> {
        match exec_block(&self, &flow.body, ctx).await? {
            BlockOutcome::Return(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }
}

fn exec_block<'a>(
    runner: &'a Arc<FlowRunner>,
    ops: &'a [Op],
    ctx: &'a mut WorkflowContext,
) -> Pin<Box<dyn std::future::Future<Output = Result<BlockOutcome>> + Send + 'a>> {
    Box::pin(async move {
        for op in ops {
            ctx.check_cancelled()?;
            match exec_op(runner, op, ctx).await {
                Ok(BlockOutcome::Normal) => {}
                Ok(other) => return Ok(other),
                Err(e) => {
                    // Translate the failure back to its source position.
                    if !matches!(e, Error::Cancelled) {
                        tracing::error!(
                            source_file = %runner.program.source_file,
                            source_line = op.source_line,
                            generated_line = op.generated_line,
                            error = %e,
                            "flow statement failed"
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(BlockOutcome::Normal)
    })
}

async fn exec_op(
    runner: &Arc<FlowRunner>,
    op: &Op,
    ctx: &mut WorkflowContext,
) -> Result<BlockOutcome> {
        tracing::trace!(line = op.generated_line, source_line = op.source_line, "executing op");
        match &op.kind {
            OpKind::Pass => Ok(BlockOutcome::Normal),

            OpKind::Assign { var, expr } => {
                let value = ctx.eval(expr)?;
                ctx.vars.insert(var.clone(), value);
                Ok(BlockOutcome::Normal)
            }

            OpKind::PropAssign { var, props, expr } => {
                let value = ctx.eval(expr)?;
                let mut base = ctx
                    .vars
                    .get(var)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                set_path(&mut base, props, value);
                ctx.vars.insert(var.clone(), base);
                Ok(BlockOutcome::Normal)
            }

            OpKind::RunAgent { agent, input, dest } => {
                let input_text = match input {
                    Some(e) => value_to_display(&ctx.eval(e)?),
                    None => ctx.message.clone(),
                };
                let result = runner.agents.run_agent(agent, input_text, ctx).await?;
                if let Some(d) = dest {
                    ctx.vars.insert(d.clone(), result);
                }
                Ok(BlockOutcome::Normal)
            }

            OpKind::CallLlm { prompt, input, dest } => {
                exec_call_llm(runner, prompt, input.as_ref(), dest.as_deref(), ctx).await?;
                Ok(BlockOutcome::Normal)
            }

            OpKind::CallTool { tool, function, input, dest } => {
                exec_call_tool(runner, tool, function, input.as_ref(), dest.as_deref(), ctx)
                    .await?;
                Ok(BlockOutcome::Normal)
            }

            OpKind::Log { template } => {
                let message = ctx.render_template(template);
                tracing::info!(flow_log = %message);
                ctx.bus.publish(RuntimeEvent::Info { message });
                Ok(BlockOutcome::Normal)
            }

            OpKind::Notify { template } => {
                let message = ctx.render_template(template);
                ctx.bus.publish(RuntimeEvent::Info { message: format!("notify: {message}") });
                Ok(BlockOutcome::Normal)
            }

            OpKind::Parallel { branches } => {
                exec_parallel(runner, branches, ctx).await?;
                Ok(BlockOutcome::Normal)
            }

            OpKind::For { var, seq, body, fan_out } => {
                exec_for(runner, var, seq, body, *fan_out, ctx).await
            }

            OpKind::Match { subject, arms } => {
                let value = ctx.eval(subject)?;
                for (pattern, body) in arms {
                    let hit = match pattern {
                        Pattern::Wildcard => true,
                        Pattern::Literal(lit) => values_equal(&literal_to_value(lit), &value),
                    };
                    if hit {
                        return exec_block(runner, body, ctx).await;
                    }
                }
                Ok(BlockOutcome::Normal)
            }

            OpKind::Return { value } => {
                let result = match value {
                    Some(e) => ctx.eval(e)?,
                    None => Value::Null,
                };
                ctx.bus.publish(RuntimeEvent::FlowResult { result: result.clone() });
                Ok(BlockOutcome::Return(result))
            }

            OpKind::Continue => Ok(BlockOutcome::Continue),
    }
}

// ── Parallel fan-out ─────────────────────────────────────────────

async fn exec_parallel(
    runner: &Arc<FlowRunner>,
    branches: &[Vec<Op>],
    ctx: &mut WorkflowContext,
) -> Result<()> {
        let snapshot = ctx.vars.clone();
        let mut set: JoinSet<Result<(usize, HashMap<String, Value>)>> = JoinSet::new();

        for (index, branch) in branches.iter().enumerate() {
            let branch_runner = runner.clone();
            let ops = branch.clone();
            let mut child = ctx.child();
            set.spawn(async move {
                exec_block(&branch_runner, &ops, &mut child).await?;
                Ok((index, child.vars))
            });
        }

        let mut branch_vars: Vec<Option<HashMap<String, Value>>> = vec![None; branches.len()];
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| Error::Other(format!("parallel branch panicked: {e}")))?;
            match result {
                Ok((index, vars)) => branch_vars[index] = Some(vars),
                Err(e) => {
                    // A failing branch cancels its peers; their results
                    // are discarded.
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        // Merge changed names back, last-writer-wins on distinct names;
        // the same name written by two branches is a conflict.
        let mut writers: HashMap<String, usize> = HashMap::new();
        for vars in branch_vars.into_iter().flatten() {
            for (name, value) in vars {
                let changed = snapshot.get(&name) != Some(&value);
                if changed {
                    *writers.entry(name.clone()).or_insert(0) += 1;
                    if writers[&name] > 1 {
                        return Err(Error::MergeConflict(name));
                    }
                    ctx.vars.insert(name, value);
                }
            }
        }
    Ok(())
}

// ── for loops ────────────────────────────────────────────────────

async fn exec_for(
    runner: &Arc<FlowRunner>,
    var: &str,
    seq: &sr_dsl::ast::Expr,
    body: &[Op],
    fan_out: bool,
    ctx: &mut WorkflowContext,
) -> Result<BlockOutcome> {
        let items = match ctx.eval(seq)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        if !fan_out {
            for item in items {
                ctx.check_cancelled()?;
                ctx.vars.insert(var.to_owned(), item);
                match exec_block(runner, body, ctx).await? {
                    BlockOutcome::Normal | BlockOutcome::Continue => {}
                    ret @ BlockOutcome::Return(_) => return Ok(ret),
                }
            }
            ctx.vars.remove(var);
            return Ok(BlockOutcome::Normal);
        }

        // Fanned iterations run concurrently up to the cap; each gets an
        // isolated child context and writes merge in iteration order.
        for chunk in items.chunks(FOR_FAN_OUT_LIMIT) {
            ctx.check_cancelled()?;
            let mut set: JoinSet<Result<(usize, HashMap<String, Value>)>> = JoinSet::new();
            for (offset, item) in chunk.iter().enumerate() {
                let iter_runner = runner.clone();
                let ops = body.to_vec();
                let mut child = ctx.child();
                child.vars.insert(var.to_owned(), item.clone());
                set.spawn(async move {
                    exec_block(&iter_runner, &ops, &mut child).await?;
                    Ok((offset, child.vars))
                });
            }

            let mut results: Vec<Option<HashMap<String, Value>>> = vec![None; chunk.len()];
            while let Some(joined) = set.join_next().await {
                match joined.map_err(|e| Error::Other(format!("for branch panicked: {e}")))? {
                    Ok((offset, vars)) => results[offset] = Some(vars),
                    Err(e) => {
                        set.abort_all();
                        return Err(e);
                    }
                }
            }
            for vars in results.into_iter().flatten() {
                for (name, value) in vars {
                    if name != var {
                        ctx.vars.insert(name, value);
                    }
                }
            }
        }
        Ok(BlockOutcome::Normal)
}

// ── call llm ─────────────────────────────────────────────────────

async fn exec_call_llm(
    runner: &Arc<FlowRunner>,
    prompt_name: &str,
    input: Option<&sr_dsl::ast::Expr>,
    dest: Option<&str>,
    ctx: &mut WorkflowContext,
) -> Result<()> {
        let template = runner
            .program
            .prompts
            .get(prompt_name)
            .ok_or_else(|| Error::Other(format!("unknown prompt '{prompt_name}'")))?;

        if let Some(e) = input {
            let value = ctx.eval(e)?;
            ctx.message = value_to_display(&value);
        }
        let prompt_text = ctx.render_template(&template.template);

        // `call llm` bypasses the agent loop: no tools, no handlers.
        let model_id = runner.program.models.values().next().map(|m| m.id.clone());
        runner.bus.publish(RuntimeEvent::LlmCall {
            prompt_name: prompt_name.to_owned(),
            model: model_id.clone().unwrap_or_else(|| "default".into()),
            prompt_text: prompt_text.clone(),
        });

        ctx.check_cancelled()?;
        let resolved = runner.models.get_model(model_id.as_deref())?;
        let resp = resolved
            .provider
            .generate(GenerateRequest {
                messages: vec![Message::user(prompt_text)],
                model: resolved.model_name.clone(),
                ..Default::default()
            })
            .await?;
        if let Some(usage) = &resp.usage {
            runner.bus.publish_usage(usage);
        }

        runner.bus.publish(RuntimeEvent::LlmResponse {
            prompt_name: prompt_name.to_owned(),
            content: resp.content.clone(),
        });
        if let Some(d) = dest {
            ctx.vars.insert(d.to_owned(), Value::String(resp.content));
        }
        Ok(())
}

// ── call tool ────────────────────────────────────────────────────

async fn exec_call_tool(
    runner: &Arc<FlowRunner>,
    tool: &str,
    function: &str,
    input: Option<&sr_dsl::ast::Expr>,
    dest: Option<&str>,
    ctx: &mut WorkflowContext,
) -> Result<()> {
        let decl = runner
            .program
            .tools
            .get(tool)
            .ok_or_else(|| Error::Other(format!("unknown tool '{tool}'")))?;

        let handles = runner.tools.materialize(&[tool_ref_for(decl, function)]).await?;
        let handle = handles
            .iter()
            .find(|h| h.definition.name == function)
            .or_else(|| handles.first())
            .ok_or_else(|| Error::Tool {
                tool: tool.to_owned(),
                message: format!("no tool named '{function}' materialized"),
            })?;

        let args = match input {
            Some(e) => shape_args(ctx.eval(e)?, handle),
            None => Value::Object(Default::default()),
        };

        let call_id = format!("flow-{}", uuid_like());
        runner.bus.publish(RuntimeEvent::ToolCallEvent {
            call_id: call_id.clone(),
            tool_name: function.to_owned(),
            arguments: args.clone(),
        });

        ctx.check_cancelled()?;
        let result = runner.tools.invoke(handle, args).await;

        runner.bus.publish(RuntimeEvent::ToolResponse {
            call_id,
            tool_name: function.to_owned(),
            content: result.to_model_json(),
            is_error: !result.is_success(),
        });

        if let Some(d) = dest {
            let bound = if result.is_success() {
                result.output.clone().unwrap_or(Value::Null)
            } else {
                serde_json::to_value(&result).unwrap_or(Value::Null)
            };
            ctx.vars.insert(d.to_owned(), bound);
        }
        Ok(())
}

/// Build the provider-facing reference for a DSL tool declaration.
fn tool_ref_for(decl: &ToolDecl, function: &str) -> ToolRef {
    match &decl.backend {
        ToolBackend::Builtin { path } => {
            // `streetrace.fs` + `read_file` → `streetrace.fs.read_file`.
            let full = if path.matches('.').count() >= 2 {
                path.clone()
            } else {
                format!("{path}.{function}")
            };
            ToolRef::Builtin { path: full }
        }
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

/// Shape a `with` argument into the tool's expected parameters: objects
/// pass through, a scalar binds to the single required parameter, and
/// anything else lands under `input`.
fn shape_args(value: Value, handle: &ToolHandle) -> Value {
    if value.is_object() {
        return value;
    }
    let required: Vec<String> = handle.definition.parameters["required"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();
    if required.len() == 1 {
        let mut map = serde_json::Map::new();
        map.insert(required[0].clone(), value);
        Value::Object(map)
    } else {
        let mut map = serde_json::Map::new();
        map.insert("input".to_owned(), value);
        Value::Object(map)
    }
}

/// Unique-enough id for flow-originated tool calls.
fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("{:08x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Set a nested property path, creating intermediate objects.
fn set_path(base: &mut Value, props: &[String], value: Value) {
    let mut current = base;
    for prop in &props[..props.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(prop.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    current
        .as_object_mut()
        .expect("just ensured object")
        .insert(props[props.len() - 1].clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sr_domain::config::ToolsConfig;
    use sr_providers::testing::ScriptedProvider;

    use crate::cancel::CancelToken;

    struct EchoAgents;

    #[async_trait]
    impl SubAgentRunner for EchoAgents {
        async fn run_agent(
            &self,
            agent: &str,
            input: String,
            _ctx: &WorkflowContext,
        ) -> Result<Value> {
            Ok(Value::String(format!("{agent}:{input}")))
        }
    }

    fn runner_for(src: &str, provider: ScriptedProvider) -> (Arc<FlowRunner>, WorkflowContext) {
        let compiler = sr_dsl::DslCompiler::default();
        let out = compiler.compile(src, "test.sr").unwrap();
        let models = Arc::new(ModelFactory::new(Some("scripted".into())));
        models.register("scripted", Arc::new(provider));
        let bus = Arc::new(EventBus::new());
        let runner = Arc::new(FlowRunner {
            program: out.program,
            models,
            tools: Arc::new(ToolProvider::new(std::env::temp_dir(), ToolsConfig::default())),
            bus: bus.clone(),
            agents: Arc::new(EchoAgents),
        });
        let ctx = WorkflowContext::new(bus, CancelToken::new());
        (runner, ctx)
    }

    async fn run_main(src: &str, provider: ScriptedProvider) -> (Option<Value>, WorkflowContext) {
        let (runner, mut ctx) = runner_for(src, provider);
        let program = runner.program.clone();
        let flow = program.entry_flow().unwrap();
        let result = runner.run_flow(flow, &mut ctx).await.unwrap();
        (result, ctx)
    }

    #[tokio::test]
    async fn assignment_and_return() {
        let (result, _) = run_main(
            "streetrace v1\nflow main:\n    $a = 1\n    $b = 2\n    return $a + $b\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(result.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn parallel_merges_distinct_names() {
        let (_, ctx) = run_main(
            "streetrace v1\nflow main:\n    parallel:\n        $a = 1\n        $b = 2\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(ctx.vars["a"], json!(1));
        assert_eq!(ctx.vars["b"], json!(2));
    }

    #[tokio::test]
    async fn parallel_same_name_write_is_conflict() {
        let (runner, mut ctx) = runner_for(
            "streetrace v1\nflow main:\n    parallel:\n        $x = 1\n        $x = 2\n",
            ScriptedProvider::new(),
        );
        let program = runner.program.clone();
        let flow = program.entry_flow().unwrap();
        let err = runner.run_flow(flow, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::MergeConflict(name) if name == "x"));
    }

    #[tokio::test]
    async fn single_branch_parallel_behaves_like_inline() {
        let (result, ctx) = run_main(
            "streetrace v1\nflow main:\n    parallel:\n        $a = 41\n    return $a + 1\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(result.unwrap(), json!(42));
        assert_eq!(ctx.vars["a"], json!(41));
    }

    #[tokio::test]
    async fn run_agent_binds_destination() {
        let (_, ctx) = run_main(
            "streetrace v1\nagent helper:\n    instruction \"h\"\nflow main:\n    run helper with \"task\" -> $out\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(ctx.vars["out"], json!("helper:task"));
    }

    #[tokio::test]
    async fn for_loop_runs_in_order() {
        let (_, ctx) = run_main(
            "streetrace v1\nflow main:\n    $acc = \"\"\n    $items = [\"a\", \"b\", \"c\"]\n    for item in $items:\n        $acc = $acc + $item\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(ctx.vars["acc"], json!("abc"));
    }

    #[tokio::test]
    async fn match_selects_arm_and_wildcard_falls_through() {
        let (result, _) = run_main(
            "streetrace v1\nflow main:\n    $status = \"ok\"\n    match $status:\n        \"ok\" -> return \"all good\"\n        _ -> return \"failed\"\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(result.unwrap(), json!("all good"));

        let (result, _) = run_main(
            "streetrace v1\nflow main:\n    $status = \"weird\"\n    match $status:\n        \"ok\" -> return \"all good\"\n        _ -> return \"failed\"\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(result.unwrap(), json!("failed"));
    }

    #[tokio::test]
    async fn call_llm_emits_lifecycle_events_and_binds() {
        let src = "streetrace v1\nmodel fast = scripted test\nprompt ask:\n    What about ${topic}?\nflow main:\n    $topic = \"rust\"\n    call llm ask -> $answer\n    return $answer\n";
        let (runner, mut ctx) = runner_for(src, ScriptedProvider::new().then_text("an answer"));
        let mut rx = runner.bus.subscribe();
        let program = runner.program.clone();
        let flow = program.entry_flow().unwrap();
        let result = runner.run_flow(flow, &mut ctx).await.unwrap();
        assert_eq!(result.unwrap(), json!("an answer"));

        let mut saw_call = false;
        let mut saw_response = false;
        while let Ok(ev) = rx.try_recv() {
            match &*ev {
                RuntimeEvent::LlmCall { prompt_name, prompt_text, .. } => {
                    assert_eq!(prompt_name, "ask");
                    assert_eq!(prompt_text, "What about rust?");
                    saw_call = true;
                }
                RuntimeEvent::LlmResponse { content, .. } => {
                    assert_eq!(content, "an answer");
                    saw_response = true;
                }
                _ => {}
            }
        }
        assert!(saw_call && saw_response);
    }

    #[tokio::test]
    async fn call_tool_scalar_arg_binds_to_single_required_param() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "tool body").unwrap();
        let src = "streetrace v1\ntool fs = builtin streetrace.fs\nflow main:\n    call tool fs.read_file with \"notes.txt\" -> $content\n    return $content.content\n";

        let compiler = sr_dsl::DslCompiler::default();
        let out = compiler.compile(src, "test.sr").unwrap();
        let models = Arc::new(ModelFactory::new(Some("scripted".into())));
        models.register("scripted", Arc::new(ScriptedProvider::new()));
        let bus = Arc::new(EventBus::new());
        let runner = Arc::new(FlowRunner {
            program: out.program,
            models,
            tools: Arc::new(ToolProvider::new(dir.path().to_path_buf(), ToolsConfig::default())),
            bus: bus.clone(),
            agents: Arc::new(EchoAgents),
        });
        let mut ctx = WorkflowContext::new(bus, CancelToken::new());
        let program = runner.program.clone();
        let flow = program.entry_flow().unwrap();
        let result = runner.run_flow(flow, &mut ctx).await.unwrap();
        assert_eq!(result.unwrap(), json!("tool body"));
    }

    #[tokio::test]
    async fn property_assignment_builds_nested_objects() {
        let (_, ctx) = run_main(
            "streetrace v1\nflow main:\n    $r = \"\"\n    $r.summary.title = \"done\"\n",
            ScriptedProvider::new(),
        )
        .await;
        assert_eq!(ctx.vars["r"]["summary"]["title"], json!("done"));
    }

    #[tokio::test]
    async fn cancellation_stops_between_statements() {
        let (runner, mut ctx) = runner_for(
            "streetrace v1\nflow main:\n    $a = 1\n    $b = 2\n",
            ScriptedProvider::new(),
        );
        ctx.cancel.cancel();
        let program = runner.program.clone();
        let flow = program.entry_flow().unwrap();
        let err = runner.run_flow(flow, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn flow_result_event_published_on_return() {
        let (runner, mut ctx) =
            runner_for("streetrace v1\nflow main:\n    return \"finished\"\n", ScriptedProvider::new());
        let mut rx = runner.bus.subscribe();
        let program = runner.program.clone();
        let flow = program.entry_flow().unwrap();
        runner.run_flow(flow, &mut ctx).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert!(matches!(&*ev, RuntimeEvent::FlowResult { result } if result == &json!("finished")));
    }
}
