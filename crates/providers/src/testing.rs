//! Deterministic scripted provider for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use sr_domain::error::{Error, Result};
use sr_domain::message::ToolCall;
use sr_domain::usage::UsageRecord;

use crate::traits::{
    estimate_tokens, BoxStream, GenerateRequest, GenerateResponse, LlmProvider, StreamEvent,
};

type TokenCounter = dyn Fn(&str) -> u64 + Send + Sync;

/// Replays a scripted sequence of responses/errors, recording the
/// requests it receives.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<GenerateResponse>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    calls: AtomicUsize,
    token_counter: Arc<TokenCounter>,
    id: String,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            token_counter: Arc::new(estimate_tokens),
            id: "scripted".into(),
        }
    }

    pub fn then_text(self, text: &str) -> Self {
        self.then_response(GenerateResponse {
            content: text.to_owned(),
            model: "scripted/test".into(),
            finish_reason: Some("stop".into()),
            usage: Some(UsageRecord {
                prompt_tokens: 10,
                completion_tokens: 5,
                cost: Some(0.001),
            }),
            ..Default::default()
        })
    }

    pub fn then_tool_call(self, call_id: &str, tool_name: &str, args: serde_json::Value) -> Self {
        self.then_response(GenerateResponse {
            tool_calls: vec![ToolCall {
                call_id: call_id.to_owned(),
                tool_name: tool_name.to_owned(),
                arguments: args,
            }],
            model: "scripted/test".into(),
            finish_reason: Some("tool_calls".into()),
            usage: Some(UsageRecord { prompt_tokens: 10, completion_tokens: 5, cost: None }),
            ..Default::default()
        })
    }

    pub fn then_response(self, resp: GenerateResponse) -> Self {
        self.script.lock().push_back(Ok(resp));
        self
    }

    pub fn then_error(self, err: Error) -> Self {
        self.script.lock().push_back(Err(err));
        self
    }

    /// Replace the token estimator (e.g. a fixed count for compaction
    /// tests).
    pub fn with_token_counter(mut self, f: impl Fn(&str) -> u64 + Send + Sync + 'static) -> Self {
        self.token_counter = Arc::new(f);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests observed so far (cloned).
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req);
        self.script.lock().pop_front().unwrap_or_else(|| {
            Ok(GenerateResponse {
                content: "(script exhausted)".into(),
                model: "scripted/test".into(),
                finish_reason: Some("stop".into()),
                ..Default::default()
            })
        })
    }

    async fn generate_stream(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.generate(req).await?;
        let events = vec![
            Ok(StreamEvent::Token { text: resp.content }),
            Ok(StreamEvent::Done { usage: resp.usage, finish_reason: resp.finish_reason }),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn estimate_token_count(&self, text: &str) -> u64 {
        (self.token_counter)(text)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn script_replays_in_order() {
        let p = ScriptedProvider::new().then_text("one").then_text("two");
        assert_eq!(p.generate(GenerateRequest::default()).await.unwrap().content, "one");
        assert_eq!(p.generate(GenerateRequest::default()).await.unwrap().content, "two");
        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn custom_token_counter() {
        let p = ScriptedProvider::new().with_token_counter(|_| 150);
        assert_eq!(p.estimate_token_count("anything"), 150);
    }

    #[tokio::test]
    async fn streaming_yields_token_then_done() {
        let p = ScriptedProvider::new().then_text("chunk");
        let mut stream = p.generate_stream(GenerateRequest::default()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Token { ref text } if text == "chunk"));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, StreamEvent::Done { .. }));
    }
}
