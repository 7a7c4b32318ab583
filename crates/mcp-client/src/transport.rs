//! MCP transports: stdio child process, HTTP POST, and SSE.
//!
//! The stdio transport frames JSON-RPC as newline-delimited JSON on the
//! child's stdin/stdout. A request lock serializes whole request/response
//! cycles so concurrent callers cannot read each other's responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,
}

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the transport is still usable.
    fn is_alive(&self) -> bool;

    /// Shut down gracefully.
    async fn shutdown(&self);
}

/// Substitute `${VAR}` and `${env:VAR}` references in header values from
/// the process environment. Unknown variables resolve to empty strings.
pub fn substitute_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), substitute_env(v)))
        .collect()
}

fn substitute_env(value: &str) -> String {
    let mut out = String::new();
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                let inner: String = chars[i + 2..i + 2 + close].iter().collect();
                let var = inner.strip_prefix("env:").unwrap_or(&inner);
                out.push_str(&std::env::var(var).unwrap_or_default());
                i += 2 + close + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Non-JSON stdout lines tolerated before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    /// Serializes full request/response cycles.
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn the server process with `cwd` set to the working directory.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&std::path::Path>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (k, v) in env {
            cmd.env(k, substitute_env(v));
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            timeout,
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read the next JSON line, skipping blank/non-JSON lines (some
    /// servers leak logging onto stdout). Gives up after
    /// [`MAX_SKIP_LINES`].
    async fn read_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_owned());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "MCP server produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from MCP server stdout");
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let _guard = self.request_lock.lock().await;

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(id, method, "sending MCP request");
        self.write_line(&json).await?;

        // Servers may interleave notifications; skip anything that is not
        // the response to our id.
        let result = tokio::time::timeout(self.timeout, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                    tracing::debug!(expected_id = id, got_id = resp.id, "response for another request, continuing");
                }
                tracing::debug!(line = %line, "skipping non-matching MCP message");
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        self.write_line(&serde_json::to_string(&notif)?).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server stdin");
            }
        }
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(?status, "MCP server process exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "error waiting for MCP server process"),
            Err(_) => {
                tracing::warn!("MCP server did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON POST transport: one HTTP request per JSON-RPC message.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_owned(),
            headers: substitute_headers(headers),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    fn request_builder(&self, body: &impl serde::Serialize) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(&self.url).json(body);
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        builder
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self
            .request_builder(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", resp.status())));
        }
        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        self.request_builder(&notif)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streamable-HTTP style SSE transport: POST the request, read the
/// event-stream response until a frame carries our response id.
pub struct SseTransport {
    inner: HttpTransport,
}

impl SseTransport {
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self { inner: HttpTransport::new(url, headers, timeout)? })
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self
            .inner
            .request_builder(&req)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", resp.status())));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        for frame in parse_sse_data(&body) {
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&frame) {
                if response.id == id {
                    return Ok(response);
                }
            }
        }
        Err(TransportError::Http("no matching response in SSE stream".into()))
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        self.inner.send_notification(method).await
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

/// Extract the `data:` payloads from an SSE body, joining multi-line
/// data fields per the SSE spec.
fn parse_sse_data(body: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current = String::new();
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(data.trim_start());
        } else if line.is_empty() && !current.is_empty() {
            frames.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        frames.push(current);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_substitution_both_forms() {
        std::env::set_var("SR_TEST_TOKEN", "sekrit");
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_owned(), "Bearer ${SR_TEST_TOKEN}".to_owned());
        headers.insert("X-Alt".to_owned(), "${env:SR_TEST_TOKEN}".to_owned());
        headers.insert("X-Plain".to_owned(), "as-is".to_owned());

        let out = substitute_headers(&headers);
        assert_eq!(out["Authorization"], "Bearer sekrit");
        assert_eq!(out["X-Alt"], "sekrit");
        assert_eq!(out["X-Plain"], "as-is");
    }

    #[test]
    fn unknown_env_var_becomes_empty() {
        let mut headers = HashMap::new();
        headers.insert("X".to_owned(), "v=${SR_DOES_NOT_EXIST_42}!".to_owned());
        let out = substitute_headers(&headers);
        assert_eq!(out["X"], "v=!");
    }

    #[test]
    fn sse_frames_parse() {
        let body = "event: message\ndata: {\"a\":1}\n\ndata: line1\ndata: line2\n\n";
        let frames = parse_sse_data(body);
        assert_eq!(frames, vec!["{\"a\":1}".to_owned(), "line1\nline2".to_owned()]);
    }

    #[tokio::test]
    async fn stdio_round_trip_with_cat_like_server() {
        // A tiny shell "server" that answers any line with a canned
        // initialize-style response for id 1.
        let script = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#;
        let transport = StdioTransport::spawn(
            "sh",
            &["-c".to_owned(), script.to_owned()],
            &HashMap::new(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let resp = transport.send_request("initialize", None).await.unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.into_result().unwrap()["ok"].as_bool().unwrap());
        transport.shutdown().await;
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn stdio_skips_noise_lines() {
        let script = r#"read line; echo "starting up..."; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'"#;
        let transport = StdioTransport::spawn(
            "sh",
            &["-c".to_owned(), script.to_owned()],
            &HashMap::new(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let resp = transport.send_request("tools/list", None).await.unwrap();
        assert!(!resp.is_error());
        transport.shutdown().await;
    }
}
