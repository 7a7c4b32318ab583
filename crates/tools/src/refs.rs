//! Declarative tool references.
//!
//! References describe where a tool lives; the provider materializes them
//! on demand. Three kinds: remote MCP servers, in-process built-ins, and
//! direct callables.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Transport descriptor for a remote MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpServerRef {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// A declarative pointer the tool provider can materialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolRef {
    /// Remote MCP server with a tool-name allow-list (wildcards allowed,
    /// empty means everything).
    Mcp {
        server: McpServerRef,
        #[serde(default)]
        tools: Vec<String>,
    },
    /// In-process builtin: `streetrace.<module>` exposes a whole module,
    /// `streetrace.<module>.<function>` a single tool.
    Builtin { path: String },
    /// Direct callable addressed as `module.path:function`.
    Callable { import_path: String },
}

impl ToolRef {
    pub fn builtin(path: &str) -> Self {
        ToolRef::Builtin { path: path.to_owned() }
    }

    /// Whether `tool_name` passes an allow-list. Entries may be exact
    /// names, `prefix*` wildcards, or `*` for everything; an empty list
    /// allows everything.
    pub fn allowed(allow: &[String], tool_name: &str) -> bool {
        if allow.is_empty() {
            return true;
        }
        allow.iter().any(|entry| match entry.as_str() {
            "*" | "all" => true,
            pat => {
                if let Some(prefix) = pat.strip_suffix('*') {
                    tool_name.starts_with(prefix)
                } else {
                    pat == tool_name
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_semantics() {
        let empty: Vec<String> = vec![];
        assert!(ToolRef::allowed(&empty, "anything"));

        let exact = vec!["read_file".to_owned()];
        assert!(ToolRef::allowed(&exact, "read_file"));
        assert!(!ToolRef::allowed(&exact, "write_file"));

        let wild = vec!["list_*".to_owned()];
        assert!(ToolRef::allowed(&wild, "list_directory"));
        assert!(!ToolRef::allowed(&wild, "read_file"));

        let star = vec!["*".to_owned()];
        assert!(ToolRef::allowed(&star, "whatever"));
    }

    #[test]
    fn mcp_ref_round_trips_through_serde() {
        let r = ToolRef::Mcp {
            server: McpServerRef::Http {
                url: "https://tools.example/mcp".into(),
                headers: HashMap::from([(
                    "Authorization".to_owned(),
                    "Bearer ${TOKEN}".to_owned(),
                )]),
            },
            tools: vec!["search".into()],
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: ToolRef = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn builtin_ref_from_dsl_path() {
        let r = ToolRef::builtin("streetrace.fs");
        assert_eq!(r, ToolRef::Builtin { path: "streetrace.fs".into() });
    }
}
