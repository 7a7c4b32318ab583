use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-level runtime configuration assembled by the CLI layer and
/// passed into the supervisor. Loading from disk is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root directory for per-session JSON files.
    #[serde(default = "d_session_root")]
    pub root: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { root: d_session_root() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Result cap for find-in-files.
    #[serde(default = "d_100")]
    pub max_search_results: usize,
    /// Snippet length cap for find-in-files (chars).
    #[serde(default = "d_200")]
    pub max_snippet_chars: usize,
    /// Per-call timeout for remote tool transports (ms).
    #[serde(default = "d_30000")]
    pub transport_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_search_results: 100,
            max_snippet_chars: 200,
            transport_timeout_ms: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Strategy for shrinking a session that exceeds the model's input budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Summarize,
    Truncate,
}

impl CompactionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStrategy::Summarize => "summarize",
            CompactionStrategy::Truncate => "truncate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default)]
    pub strategy: CompactionStrategy,
    /// Fraction of the model's input budget to compact down to.
    #[serde(default = "d_target_ratio")]
    pub target_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::Summarize,
            target_ratio: 0.8,
        }
    }
}

fn d_session_root() -> PathBuf {
    PathBuf::from(".streetrace/sessions")
}
fn d_100() -> usize {
    100
}
fn d_200() -> usize {
    200
}
fn d_30000() -> u64 {
    30_000
}
fn d_target_ratio() -> f64 {
    0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.tools.max_search_results, 100);
        assert_eq!(cfg.compaction.target_ratio, 0.8);
    }

    #[test]
    fn compaction_strategy_deserializes_lowercase() {
        let s: CompactionStrategy = serde_json::from_str("\"truncate\"").unwrap();
        assert_eq!(s, CompactionStrategy::Truncate);
        assert_eq!(s.as_str(), "truncate");
    }
}
