//! Tool provider: turns declarative [`ToolRef`]s into invocable handles.
//!
//! Built-ins come from the in-process registry with ambient parameters
//! curried away; MCP references get a pooled, lazily-opened connection
//! per workload instance; direct callables resolve against the callable
//! registry by import path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use sr_domain::config::ToolsConfig;
use sr_domain::error::{Error, Result};
use sr_domain::message::ToolDefinition;
use sr_mcp_client::{McpConnection, TransportSpec};

use crate::builtin::{BuiltinRegistry, BuiltinTool, AMBIENT_PARAMS};
use crate::refs::{McpServerRef, ToolRef};
use crate::result::ToolCallResult;

/// Handle back into the workload layer for the agent-facing built-ins.
#[async_trait]
pub trait AgentHost: Send + Sync {
    /// Run a named agent as a sub-workload, returning its final answer.
    async fn run_agent(&self, agent: &str, input: &str) -> Result<String>;
    /// `(name, description)` of every discoverable agent.
    async fn list_agents(&self) -> Vec<(String, String)>;
    /// `(name, description)` of every materializable tool.
    async fn list_tools(&self) -> Vec<(String, String)>;
}

/// A directly-callable tool registered under an import path.
#[async_trait]
pub trait DirectCallable: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn call(&self, args: Value, ctx: &ToolContext) -> ToolCallResult;
}

/// Ambient state threaded into every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub work_dir: PathBuf,
    pub config: ToolsConfig,
    pub host: Option<Arc<dyn AgentHost>>,
}

impl ToolContext {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir, config: ToolsConfig::default(), host: None }
    }
}

enum HandleKind {
    Builtin(Arc<dyn BuiltinTool>),
    Mcp { conn: Arc<McpConnection>, remote_name: String },
    Callable(Arc<dyn DirectCallable>),
}

/// One invocable tool with the definition the model sees.
pub struct ToolHandle {
    pub definition: ToolDefinition,
    kind: HandleKind,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Materializes tool references for one workload instance.
///
/// Connections in the pool belong to this instance and close with it.
pub struct ToolProvider {
    ctx: ToolContext,
    registry: Arc<BuiltinRegistry>,
    callables: Mutex<HashMap<String, Arc<dyn DirectCallable>>>,
    connections: Mutex<HashMap<String, Arc<McpConnection>>>,
}

impl ToolProvider {
    pub fn new(work_dir: PathBuf, config: ToolsConfig) -> Self {
        let mut ctx = ToolContext::new(work_dir);
        ctx.config = config;
        Self {
            ctx,
            registry: Arc::new(BuiltinRegistry::standard()),
            callables: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_host(&mut self, host: Arc<dyn AgentHost>) {
        self.ctx.host = Some(host);
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.ctx.work_dir
    }

    /// Register a direct callable under its `module.path:function` import
    /// path.
    pub fn register_callable(&self, import_path: &str, callable: Arc<dyn DirectCallable>) {
        self.callables.lock().insert(import_path.to_owned(), callable);
    }

    /// Materialize a set of references into handles the agent runtime can
    /// invoke.
    pub async fn materialize(&self, refs: &[ToolRef]) -> Result<Vec<ToolHandle>> {
        let mut handles = Vec::new();
        for r in refs {
            match r {
                ToolRef::Builtin { path } => {
                    let tools = self.registry.resolve(path);
                    if tools.is_empty() {
                        return Err(Error::LoadFailed(format!("unknown builtin tool '{path}'")));
                    }
                    for tool in tools {
                        handles.push(ToolHandle {
                            definition: curried_definition(tool.as_ref()),
                            kind: HandleKind::Builtin(tool),
                        });
                    }
                }
                ToolRef::Mcp { server, tools } => {
                    let conn = self.connection_for(server);
                    let remote_tools = conn.list_tools().await?;
                    for remote in remote_tools {
                        if !ToolRef::allowed(tools, &remote.name) {
                            continue;
                        }
                        handles.push(ToolHandle {
                            definition: ToolDefinition {
                                name: remote.name.clone(),
                                description: remote.description.clone().unwrap_or_default(),
                                parameters: remote
                                    .input_schema
                                    .clone()
                                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                            },
                            kind: HandleKind::Mcp { conn: conn.clone(), remote_name: remote.name },
                        });
                    }
                }
                ToolRef::Callable { import_path } => {
                    let callable = self
                        .callables
                        .lock()
                        .get(import_path)
                        .cloned()
                        .ok_or_else(|| {
                            Error::LoadFailed(format!("unknown callable '{import_path}'"))
                        })?;
                    handles.push(ToolHandle {
                        definition: callable.definition(),
                        kind: HandleKind::Callable(callable),
                    });
                }
            }
        }
        tracing::debug!(count = handles.len(), "materialized tool handles");
        Ok(handles)
    }

    /// Invoke one handle. Failures come back inside the result envelope,
    /// never as workflow-fatal errors.
    pub async fn invoke(&self, handle: &ToolHandle, mut args: Value) -> ToolCallResult {
        match &handle.kind {
            HandleKind::Builtin(tool) => {
                // Curry the ambient parameters back into the call.
                if let Some(obj) = args.as_object_mut() {
                    obj.insert(
                        "work_dir".to_owned(),
                        Value::String(self.ctx.work_dir.display().to_string()),
                    );
                }
                tool.invoke(args, &self.ctx).await
            }
            HandleKind::Mcp { conn, remote_name } => {
                match conn.call_tool(remote_name, args).await {
                    Ok(result) => {
                        let text = result.joined_text();
                        if result.is_error {
                            ToolCallResult::failure(remote_name, text)
                        } else {
                            ToolCallResult::success(remote_name, Value::String(text))
                        }
                    }
                    Err(e) => ToolCallResult::failure(remote_name, e.to_string()),
                }
            }
            HandleKind::Callable(callable) => callable.call(args, &self.ctx).await,
        }
    }

    /// Close every pooled connection (workload close).
    pub async fn close(&self) {
        let conns: Vec<Arc<McpConnection>> = self.connections.lock().values().cloned().collect();
        for conn in conns {
            conn.close().await;
        }
        self.connections.lock().clear();
    }

    fn connection_for(&self, server: &McpServerRef) -> Arc<McpConnection> {
        let key = format!("{server:?}");
        self.connections
            .lock()
            .entry(key)
            .or_insert_with(|| {
                let spec = self.transport_spec(server);
                Arc::new(McpConnection::new(
                    spec,
                    Duration::from_millis(self.ctx.config.transport_timeout_ms),
                ))
            })
            .clone()
    }

    fn transport_spec(&self, server: &McpServerRef) -> TransportSpec {
        match server {
            McpServerRef::Stdio { command, args, env, cwd } => TransportSpec::Stdio {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
                cwd: Some(cwd.clone().unwrap_or_else(|| self.ctx.work_dir.clone())),
            },
            McpServerRef::Http { url, headers } => {
                TransportSpec::Http { url: url.clone(), headers: headers.clone() }
            }
            McpServerRef::Sse { url, headers } => {
                TransportSpec::Sse { url: url.clone(), headers: headers.clone() }
            }
        }
    }
}

/// Build the model-facing definition for a builtin: ambient parameters
/// are stripped from the schema and their lines removed from the
/// description.
fn curried_definition(tool: &dyn BuiltinTool) -> ToolDefinition {
    let mut parameters = tool.parameters();
    if let Some(props) = parameters
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        for hidden in AMBIENT_PARAMS {
            props.remove(*hidden);
        }
    }
    if let Some(required) = parameters.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|v| {
            v.as_str()
                .map(|s| !AMBIENT_PARAMS.contains(&s))
                .unwrap_or(true)
        });
    }

    let description = tool
        .description()
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !AMBIENT_PARAMS
                .iter()
                .any(|p| trimmed.starts_with(&format!("{p}:")))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_owned();

    ToolDefinition { name: tool.name().to_owned(), description, parameters }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(dir: &std::path::Path) -> ToolProvider {
        ToolProvider::new(dir.to_path_buf(), ToolsConfig::default())
    }

    #[tokio::test]
    async fn builtin_module_ref_materializes_all_fs_tools() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let handles = p.materialize(&[ToolRef::builtin("streetrace.fs")]).await.unwrap();
        assert!(handles.len() >= 6);
        assert!(handles.iter().any(|h| h.definition.name == "read_file"));
    }

    #[tokio::test]
    async fn curried_schema_hides_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let handles = p
            .materialize(&[ToolRef::builtin("streetrace.fs.read_file")])
            .await
            .unwrap();
        let def = &handles[0].definition;
        assert!(def.parameters["properties"].get("work_dir").is_none());
        let required: Vec<&str> = def.parameters["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["path"]);
        assert!(!def.description.contains("work_dir:"));
        assert!(def.description.contains("path:"));
    }

    #[tokio::test]
    async fn invoke_injects_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "content").unwrap();
        let p = provider(dir.path());
        let handles = p
            .materialize(&[ToolRef::builtin("streetrace.fs.read_file")])
            .await
            .unwrap();
        // The model only supplies domain arguments.
        let result = p.invoke(&handles[0], json!({"path": "f.txt"})).await;
        assert!(result.is_success());
        assert_eq!(result.output.unwrap()["content"], "content");
    }

    #[tokio::test]
    async fn unknown_builtin_path_fails_materialization() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let err = p
            .materialize(&[ToolRef::builtin("streetrace.widgets")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoadFailed(_)));
    }

    #[tokio::test]
    async fn callable_registry_round_trip() {
        struct Doubler;
        #[async_trait]
        impl DirectCallable for Doubler {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "double".into(),
                    description: "Double a number".into(),
                    parameters: json!({"type": "object", "properties": {"n": {"type": "number"}}}),
                }
            }
            async fn call(&self, args: Value, _ctx: &ToolContext) -> ToolCallResult {
                let n = args["n"].as_i64().unwrap_or(0);
                ToolCallResult::success("double", json!({"result": n * 2}))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        p.register_callable("scoring.rank:double", Arc::new(Doubler));

        let handles = p
            .materialize(&[ToolRef::Callable { import_path: "scoring.rank:double".into() }])
            .await
            .unwrap();
        let result = p.invoke(&handles[0], json!({"n": 21})).await;
        assert_eq!(result.output.unwrap()["result"], 42);
    }

    #[tokio::test]
    async fn unknown_callable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        assert!(p
            .materialize(&[ToolRef::Callable { import_path: "no.such:fn".into() }])
            .await
            .is_err());
    }
}
