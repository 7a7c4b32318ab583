//! MCP connection: lazy handshake, tool discovery, tool invocation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OnceCell;

use sr_domain::error::{Error, Result};

use crate::protocol::{self, McpTool, ToolsCallResult, ToolsListResult};
use crate::transport::{HttpTransport, McpTransport, SseTransport, StdioTransport, TransportError};

/// Declarative description of how to reach an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    /// Parse a `stdio` target of the form `"cmd arg1 arg2 …"`.
    pub fn stdio_from_command_line(line: &str, cwd: Option<PathBuf>) -> Self {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default().to_owned();
        let args = parts.map(str::to_owned).collect();
        Self::Stdio { command, args, env: HashMap::new(), cwd }
    }
}

/// One pooled connection to an MCP server.
///
/// The transport opens lazily on first use; within a connection, the
/// transport serializes request/response cycles (one in-flight call).
pub struct McpConnection {
    spec: TransportSpec,
    timeout: Duration,
    transport: OnceCell<Box<dyn McpTransport>>,
}

impl McpConnection {
    pub fn new(spec: TransportSpec, timeout: Duration) -> Self {
        Self { spec, timeout, transport: OnceCell::new() }
    }

    async fn transport(&self) -> Result<&dyn McpTransport> {
        let t = self
            .transport
            .get_or_try_init(|| async {
                let transport = self.open().await?;
                Ok::<_, Error>(transport)
            })
            .await?;
        Ok(t.as_ref())
    }

    /// Open the transport and run the MCP handshake.
    async fn open(&self) -> Result<Box<dyn McpTransport>> {
        let transport: Box<dyn McpTransport> = match &self.spec {
            TransportSpec::Stdio { command, args, env, cwd } => Box::new(
                StdioTransport::spawn(command, args, env, cwd.as_deref(), self.timeout)
                    .map_err(to_domain)?,
            ),
            TransportSpec::Http { url, headers } => {
                Box::new(HttpTransport::new(url, headers, self.timeout).map_err(to_domain)?)
            }
            TransportSpec::Sse { url, headers } => {
                Box::new(SseTransport::new(url, headers, self.timeout).map_err(to_domain)?)
            }
        };

        let resp = transport
            .send_request("initialize", Some(protocol::initialize_params()))
            .await
            .map_err(to_domain)?;
        if let Err(e) = resp.into_result() {
            return Err(Error::Transport(format!("initialize failed: {e}")));
        }
        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(to_domain)?;

        tracing::info!(spec = ?self.spec, "MCP connection established");
        Ok(transport)
    }

    /// Discover the tools this server advertises.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let transport = self.transport().await?;
        let resp = transport
            .send_request("tools/list", None)
            .await
            .map_err(to_domain)?;
        let value = resp
            .into_result()
            .map_err(|e| Error::Transport(format!("tools/list failed: {e}")))?;
        let parsed: ToolsListResult = serde_json::from_value(value)?;
        Ok(parsed.tools)
    }

    /// Invoke one tool. Transport errors are retried once before being
    /// surfaced; a per-call timeout surfaces as a tool failure.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolsCallResult> {
        let mut last_err = None;
        for attempt in 0..2 {
            match self.try_call(tool_name, arguments.clone()).await {
                Ok(result) => return Ok(result),
                Err(Error::Transport(msg)) if attempt == 0 => {
                    tracing::warn!(tool_name, error = %msg, "transport error, retrying once");
                    last_err = Some(Error::Transport(msg));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Transport("tool call failed".into())))
    }

    async fn try_call(&self, tool_name: &str, arguments: Value) -> Result<ToolsCallResult> {
        let transport = self.transport().await?;
        let resp = transport
            .send_request("tools/call", Some(protocol::call_params(tool_name, arguments)))
            .await
            .map_err(to_domain)?;
        let value = resp
            .into_result()
            .map_err(|e| Error::Tool { tool: tool_name.to_owned(), message: e.to_string() })?;
        let parsed: ToolsCallResult = serde_json::from_value(value)?;
        Ok(parsed)
    }

    pub fn is_open(&self) -> bool {
        self.transport.get().map(|t| t.is_alive()).unwrap_or(false)
    }

    /// Close the underlying transport if it was ever opened.
    pub async fn close(&self) {
        if let Some(t) = self.transport.get() {
            t.shutdown().await;
        }
    }
}

fn to_domain(e: TransportError) -> Error {
    match e {
        TransportError::Timeout => Error::Timeout("MCP call timed out".into()),
        other => Error::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_spec_parses_command_line() {
        let spec = TransportSpec::stdio_from_command_line(
            "npx -y @modelcontextprotocol/server-filesystem .",
            Some(PathBuf::from("/tmp/project")),
        );
        let TransportSpec::Stdio { command, args, cwd, .. } = spec else {
            panic!("expected stdio spec");
        };
        assert_eq!(command, "npx");
        assert_eq!(args.len(), 3);
        assert_eq!(cwd.unwrap(), PathBuf::from("/tmp/project"));
    }

    #[tokio::test]
    async fn lazy_connection_not_opened_until_used() {
        let conn = McpConnection::new(
            TransportSpec::stdio_from_command_line("definitely-not-a-real-binary", None),
            Duration::from_secs(1),
        );
        // No spawn attempted yet.
        assert!(!conn.is_open());
        // First use fails because the binary does not exist.
        assert!(conn.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn full_handshake_and_tool_call_against_shell_server() {
        // Scripted server: answers initialize, swallows the notification,
        // then answers tools/call with a text content block.
        let script = r#"
while read line; do
  case "$line" in
    *'"initialize"'*) printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05"}}' ;;
    *'"notifications/initialized"'*) ;;
    *'"tools/call"'*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"hello from server"}]}}' ;;
  esac
done
"#;
        let spec = TransportSpec::Stdio {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            cwd: None,
        };
        let conn = McpConnection::new(spec, Duration::from_secs(5));
        let result = conn
            .call_tool("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "hello from server");
        conn.close().await;
    }
}
