//! Declarative agent specs.
//!
//! YAML documents with `name`, `description`, `instruction` | `prompt`,
//! `tools`, and `sub_agents`. Sub-agents may be inline specs or `$ref`
//! pointers to another file or an HTTP URL (optionally authorized with a
//! bearer token). Reference resolution is recursive with a visited set
//! for cycle detection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sr_domain::error::{Error, Result};
use sr_tools::refs::ToolRef;

/// One tool entry in a spec: a bare builtin path or a structured ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecToolRef {
    /// `- streetrace.fs`
    Path(String),
    /// Structured MCP/builtin/callable reference.
    Full(ToolRef),
}

impl SpecToolRef {
    pub fn to_tool_ref(&self) -> ToolRef {
        match self {
            SpecToolRef::Path(p) => ToolRef::Builtin { path: p.clone() },
            SpecToolRef::Full(r) => r.clone(),
        }
    }
}

/// A sub-agent: inline or by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubAgentRef {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Inline(Box<AgentSpec>),
}

/// Parsed declarative agent specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<SpecToolRef>,
    #[serde(default)]
    pub sub_agents: Vec<SubAgentRef>,
}

impl AgentSpec {
    /// The effective instruction text (`instruction` wins over `prompt`).
    pub fn effective_instruction(&self) -> Option<&str> {
        self.instruction.as_deref().or(self.prompt.as_deref())
    }

    pub fn tool_refs(&self) -> Vec<ToolRef> {
        self.tools.iter().map(SpecToolRef::to_tool_ref).collect()
    }

    /// Inline sub-agent specs (valid after resolution).
    pub fn resolved_sub_agents(&self) -> Vec<&AgentSpec> {
        self.sub_agents
            .iter()
            .filter_map(|s| match s {
                SubAgentRef::Inline(spec) => Some(spec.as_ref()),
                SubAgentRef::Ref { .. } => None,
            })
            .collect()
    }
}

/// Parse a spec document, requiring a mapping at the top level.
pub fn parse_spec(content: &str, source: &str) -> Result<AgentSpec> {
    let spec: AgentSpec = serde_yaml::from_str(content)
        .map_err(|e| Error::LoadFailed(format!("invalid agent spec in {source}: {e}")))?;
    if spec.name.trim().is_empty() {
        return Err(Error::LoadFailed(format!("agent spec in {source} has an empty name")));
    }
    if spec.instruction.is_none() && spec.prompt.is_none() {
        return Err(Error::LoadFailed(format!(
            "agent spec '{}' needs either 'instruction' or 'prompt'",
            spec.name
        )));
    }
    Ok(spec)
}

/// Loader that resolves `$ref` sub-agents recursively.
pub struct SpecLoader {
    http_auth: Option<String>,
}

impl SpecLoader {
    pub fn new(http_auth: Option<String>) -> Self {
        Self { http_auth }
    }

    /// Load a spec from a file and resolve all references.
    pub async fn load_file(&self, path: &Path) -> Result<AgentSpec> {
        let content = tokio::fs::read_to_string(path).await.map_err(Error::Io)?;
        let spec = parse_spec(&content, &path.display().to_string())?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut visited = HashSet::new();
        visited.insert(path.display().to_string());
        self.resolve_refs(spec, &base, &mut visited, 0).await
    }

    /// `Box::pin` for recursion through async.
    fn resolve_refs<'a>(
        &'a self,
        mut spec: AgentSpec,
        base: &'a Path,
        visited: &'a mut HashSet<String>,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AgentSpec>> + Send + 'a>> {
        Box::pin(async move {
            const MAX_DEPTH: usize = 16;
            if depth > MAX_DEPTH {
                return Err(Error::CircularReference(
                    "agent reference nesting exceeds the maximum depth".into(),
                ));
            }

            let mut resolved = Vec::with_capacity(spec.sub_agents.len());
            for sub in std::mem::take(&mut spec.sub_agents) {
                match sub {
                    SubAgentRef::Inline(inner) => {
                        let inner = self.resolve_refs(*inner, base, visited, depth + 1).await?;
                        resolved.push(SubAgentRef::Inline(Box::new(inner)));
                    }
                    SubAgentRef::Ref { reference } => {
                        let (content, next_base, key) = self.fetch(&reference, base).await?;
                        if !visited.insert(key.clone()) {
                            return Err(Error::CircularReference(format!(
                                "circular agent reference through {key}"
                            )));
                        }
                        let inner = parse_spec(&content, &key)?;
                        let inner =
                            self.resolve_refs(inner, &next_base, visited, depth + 1).await?;
                        resolved.push(SubAgentRef::Inline(Box::new(inner)));
                    }
                }
            }
            spec.sub_agents = resolved;
            Ok(spec)
        })
    }

    /// Fetch a reference target: HTTP URL (with optional bearer auth) or
    /// a path relative to the referring file.
    async fn fetch(&self, reference: &str, base: &Path) -> Result<(String, PathBuf, String)> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            let client = reqwest::Client::new();
            let mut req = client.get(reference);
            if let Some(token) = &self.http_auth {
                req = req.header("Authorization", format!("Bearer {token}"));
            }
            let resp = req
                .send()
                .await
                .map_err(|e| Error::LoadFailed(format!("fetching {reference}: {e}")))?;
            if !resp.status().is_success() {
                return Err(Error::LoadFailed(format!(
                    "fetching {reference}: HTTP {}",
                    resp.status()
                )));
            }
            let content = resp
                .text()
                .await
                .map_err(|e| Error::LoadFailed(format!("reading {reference}: {e}")))?;
            Ok((content, PathBuf::from("."), reference.to_owned()))
        } else {
            let path = base.join(reference);
            let content = tokio::fs::read_to_string(&path).await.map_err(Error::Io)?;
            let next_base = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((content, next_base, path.display().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_tools::refs::McpServerRef;

    #[test]
    fn parses_minimal_spec() {
        let spec = parse_spec(
            "name: reviewer\ndescription: reviews code\ninstruction: You review.\n",
            "test",
        )
        .unwrap();
        assert_eq!(spec.name, "reviewer");
        assert_eq!(spec.effective_instruction(), Some("You review."));
    }

    #[test]
    fn prompt_substitutes_for_instruction() {
        let spec = parse_spec(
            "name: a\ndescription: d\nprompt: Ask nicely.\n",
            "test",
        )
        .unwrap();
        assert_eq!(spec.effective_instruction(), Some("Ask nicely."));
    }

    #[test]
    fn missing_instruction_and_prompt_is_rejected() {
        let err = parse_spec("name: a\ndescription: d\n", "test").unwrap_err();
        assert!(err.to_string().contains("instruction"));
    }

    #[test]
    fn tools_parse_as_paths_and_structured_refs() {
        let spec = parse_spec(
            "name: a\ndescription: d\ninstruction: i\ntools:\n  - streetrace.fs\n  - kind: callable\n    import_path: \"m.x:f\"\n",
            "test",
        )
        .unwrap();
        let refs = spec.tool_refs();
        assert_eq!(refs[0], ToolRef::Builtin { path: "streetrace.fs".into() });
        assert_eq!(refs[1], ToolRef::Callable { import_path: "m.x:f".into() });
    }

    #[test]
    fn mcp_tool_entry_parses() {
        let spec = parse_spec(
            "name: a\ndescription: d\ninstruction: i\ntools:\n  - kind: mcp\n    server:\n      transport: stdio\n      command: npx\n      args: [\"-y\", \"server\"]\n    tools: [\"read_*\"]\n",
            "test",
        )
        .unwrap();
        match spec.tool_refs().remove(0) {
            ToolRef::Mcp { server: McpServerRef::Stdio { command, .. }, tools } => {
                assert_eq!(command, "npx");
                assert_eq!(tools, vec!["read_*".to_owned()]);
            }
            other => panic!("expected mcp ref, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_refs_resolve_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.yaml"),
            "name: main\ndescription: root\ninstruction: top\nsub_agents:\n  - $ref: helper.yaml\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("helper.yaml"),
            "name: helper\ndescription: helps\ninstruction: assist\n",
        )
        .unwrap();

        let loader = SpecLoader::new(None);
        let spec = loader.load_file(&dir.path().join("main.yaml")).await.unwrap();
        let subs = spec.resolved_sub_agents();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].name, "helper");
    }

    #[tokio::test]
    async fn circular_refs_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "name: a\ndescription: d\ninstruction: i\nsub_agents:\n  - $ref: b.yaml\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: b\ndescription: d\ninstruction: i\nsub_agents:\n  - $ref: a.yaml\n",
        )
        .unwrap();

        let loader = SpecLoader::new(None);
        let err = loader.load_file(&dir.path().join("a.yaml")).await.unwrap_err();
        assert!(matches!(err, Error::CircularReference(_)));
    }
}
