//! The envelope every tool call returns to the model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpResultCode {
    Success,
    Failure,
}

/// Result of one tool invocation. Failures are delivered back to the
/// model inside this envelope so it can recover; they are not fatal to
/// the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub result: OpResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn success(tool_name: &str, output: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.to_owned(),
            result: OpResultCode::Success,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(tool_name: &str, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_owned(),
            result: OpResultCode::Failure,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == OpResultCode::Success
    }

    /// Serialized form sent back to the model.
    pub fn to_model_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"tool_name\":\"{}\",\"result\":\"failure\"}}", self.tool_name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope() {
        let r = ToolCallResult::success("read_file", serde_json::json!({"content": "x"}));
        assert!(r.is_success());
        let json: serde_json::Value = serde_json::from_str(&r.to_model_json()).unwrap();
        assert_eq!(json["result"], "success");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_envelope() {
        let r = ToolCallResult::failure("read_file", "no such file");
        assert!(!r.is_success());
        let json: serde_json::Value = serde_json::from_str(&r.to_model_json()).unwrap();
        assert_eq!(json["result"], "failure");
        assert_eq!(json["error"], "no such file");
    }
}
