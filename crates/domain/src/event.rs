//! Runtime event taxonomy.
//!
//! Workloads publish these on the event bus as a turn progresses; the UI
//! layer and observers subscribe without the producers knowing about them.

use serde::Serialize;

use crate::usage::{UsageRecord, UsageTotals};

/// Events emitted while a workload runs a turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RuntimeEvent {
    /// Model-authored text content.
    #[serde(rename = "agent_text")]
    AgentText { agent: String, text: String },

    /// The model is invoking a tool.
    #[serde(rename = "tool_call")]
    ToolCallEvent {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution result.
    #[serde(rename = "tool_response")]
    ToolResponse {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A direct `call llm` statement started (bypasses the agent loop).
    #[serde(rename = "llm_call")]
    LlmCall {
        prompt_name: String,
        model: String,
        prompt_text: String,
    },

    /// A direct `call llm` statement completed.
    #[serde(rename = "llm_response")]
    LlmResponse { prompt_name: String, content: String },

    /// Explicit `return` of a DSL flow.
    #[serde(rename = "flow_result")]
    FlowResult { result: serde_json::Value },

    /// An agent signalled escalation to its parent.
    #[serde(rename = "escalation")]
    Escalation {
        agent_name: String,
        result: String,
        condition_op: String,
        condition_value: String,
    },

    /// Conversation history was compacted to fit the context window.
    #[serde(rename = "history_compaction")]
    HistoryCompaction {
        strategy: String,
        original_tokens: u64,
        compacted_tokens: u64,
        messages_removed: usize,
    },

    /// Published after every completion: that call's usage plus the
    /// aggregate for the run so far.
    #[serde(rename = "usage")]
    Usage { usage: UsageRecord, totals: UsageTotals },

    #[serde(rename = "warning")]
    Warning { message: String },

    #[serde(rename = "info")]
    Info { message: String },

    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_by_type() {
        let ev = RuntimeEvent::HistoryCompaction {
            strategy: "truncate".into(),
            original_tokens: 150,
            compacted_tokens: 72,
            messages_removed: 3,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "history_compaction");
        assert_eq!(json["strategy"], "truncate");
    }

    #[test]
    fn tool_response_hides_false_error_flag() {
        let ev = RuntimeEvent::ToolResponse {
            call_id: "c1".into(),
            tool_name: "read_file".into(),
            content: "ok".into(),
            is_error: false,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("is_error").is_none());
    }
}
