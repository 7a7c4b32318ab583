//! Workload manager: discovery across search paths and name resolution.
//!
//! Discovery scans the configured search paths (working directory first,
//! then user and system config) for `.sr` and `.yaml`/`.yml` sources and
//! merges them with the code registry. Resolution tries loaders in
//! preference order; when a name is ambiguous, the most-specific
//! discovery path wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sr_domain::error::{Error, Result};
use sr_dsl::DslCompiler;

use crate::code::CodeAgentRegistry;
use crate::definition::{DefinitionBody, WorkloadDefinition};
use crate::dsl::load_dsl_file;
use crate::metadata::{SourceFormat, WorkloadMetadata};
use crate::yaml::SpecLoader;

pub struct WorkloadManager {
    search_paths: Vec<PathBuf>,
    compiler: Arc<DslCompiler>,
    spec_loader: SpecLoader,
    code_registry: Arc<CodeAgentRegistry>,
}

impl WorkloadManager {
    pub fn new(
        search_paths: Vec<PathBuf>,
        compiler: Arc<DslCompiler>,
        code_registry: Arc<CodeAgentRegistry>,
        http_auth: Option<String>,
    ) -> Self {
        Self {
            search_paths,
            compiler,
            spec_loader: SpecLoader::new(http_auth),
            code_registry,
        }
    }

    /// The default agent search paths for a working directory:
    /// `./agents/`, `./`, `~/.streetrace/agents/`, `/etc/streetrace/agents/`.
    pub fn default_search_paths(work_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![work_dir.join("agents"), work_dir.to_path_buf()];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".streetrace").join("agents"));
        }
        paths.push(PathBuf::from("/etc/streetrace/agents"));
        paths
    }

    pub fn code_registry(&self) -> &Arc<CodeAgentRegistry> {
        &self.code_registry
    }

    /// Resolve a logical name to a definition. Search paths are tried in
    /// order; within a path, DSL is preferred over declarative. The code
    /// registry is consulted last.
    pub async fn resolve(&self, name: &str) -> Result<Arc<WorkloadDefinition>> {
        for dir in &self.search_paths {
            for candidate in [
                dir.join(format!("{name}.sr")),
                dir.join(name).join("agent.sr"),
            ] {
                if candidate.is_file() {
                    let source =
                        tokio::fs::read_to_string(&candidate).await.map_err(Error::Io)?;
                    return Ok(Arc::new(load_dsl_file(&self.compiler, &candidate, &source)?));
                }
            }
            for candidate in [
                dir.join(format!("{name}.yaml")),
                dir.join(format!("{name}.yml")),
                dir.join(name).join("agent.yaml"),
                dir.join(name).join("agent.yml"),
            ] {
                if candidate.is_file() {
                    return Ok(Arc::new(self.load_yaml(&candidate).await?));
                }
            }
        }

        if let Some(factory) = self.code_registry.get(name) {
            let card = factory.card();
            return Ok(Arc::new(WorkloadDefinition {
                metadata: WorkloadMetadata {
                    name: card.name,
                    description: card.description,
                    source_path: None,
                    format: SourceFormat::Code,
                },
                body: DefinitionBody::Code { factory },
            }));
        }

        Err(Error::WorkloadNotFound(name.to_owned()))
    }

    /// Discover every loadable definition across the search paths,
    /// merged with the code registry. The first occurrence of a name
    /// (most-specific path) wins; broken sources are logged and skipped.
    pub async fn discover(&self) -> Vec<Arc<WorkloadDefinition>> {
        let mut seen = std::collections::HashSet::new();
        let mut found = Vec::new();

        for dir in &self.search_paths {
            let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                let loaded = match ext {
                    "sr" => match tokio::fs::read_to_string(&path).await {
                        Ok(source) => load_dsl_file(&self.compiler, &path, &source),
                        Err(e) => Err(Error::Io(e)),
                    },
                    "yaml" | "yml" => self.load_yaml(&path).await,
                    _ => continue,
                };
                match loaded {
                    Ok(def) if seen.insert(def.metadata.name.clone()) => {
                        found.push(Arc::new(def));
                    }
                    Ok(def) => {
                        tracing::debug!(
                            name = %def.metadata.name,
                            path = %path.display(),
                            "shadowed by a more specific discovery path"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unloadable agent source");
                    }
                }
            }
        }

        for card in self.code_registry.cards() {
            if !seen.insert(card.name.clone()) {
                continue;
            }
            if let Some(factory) = self.code_registry.get(&card.name) {
                found.push(Arc::new(WorkloadDefinition {
                    metadata: WorkloadMetadata {
                        name: card.name,
                        description: card.description,
                        source_path: None,
                        format: SourceFormat::Code,
                    },
                    body: DefinitionBody::Code { factory },
                }));
            }
        }

        found
    }

    async fn load_yaml(&self, path: &Path) -> Result<WorkloadDefinition> {
        let spec = self.spec_loader.load_file(path).await?;
        Ok(WorkloadDefinition {
            metadata: WorkloadMetadata {
                name: spec.name.clone(),
                description: spec.description.clone(),
                source_path: Some(path.to_path_buf()),
                format: SourceFormat::Declarative,
            },
            body: DefinitionBody::Declarative { spec },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(paths: Vec<PathBuf>) -> WorkloadManager {
        WorkloadManager::new(
            paths,
            Arc::new(DslCompiler::default()),
            Arc::new(CodeAgentRegistry::with_builtins()),
            None,
        )
    }

    #[tokio::test]
    async fn resolves_dsl_before_yaml_and_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("review.sr"),
            "streetrace v1\nflow main:\n    log \"hi\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("review.yaml"),
            "name: review\ndescription: yaml one\ninstruction: x\n",
        )
        .unwrap();

        let m = manager(vec![dir.path().to_path_buf()]);
        let def = m.resolve("review").await.unwrap();
        assert_eq!(def.metadata.format, SourceFormat::Dsl);
    }

    #[tokio::test]
    async fn falls_back_to_code_registry() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(vec![dir.path().to_path_buf()]);
        let def = m.resolve("default").await.unwrap();
        assert_eq!(def.metadata.format, SourceFormat::Code);
    }

    #[tokio::test]
    async fn unknown_name_is_workload_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            m.resolve("ghost").await.unwrap_err(),
            Error::WorkloadNotFound(_)
        ));
    }

    #[tokio::test]
    async fn most_specific_path_wins_on_ambiguity() {
        let specific = tempfile::tempdir().unwrap();
        let general = tempfile::tempdir().unwrap();
        std::fs::write(
            specific.path().join("helper.yaml"),
            "name: helper\ndescription: specific\ninstruction: x\n",
        )
        .unwrap();
        std::fs::write(
            general.path().join("helper.yaml"),
            "name: helper\ndescription: general\ninstruction: x\n",
        )
        .unwrap();

        let m = manager(vec![specific.path().to_path_buf(), general.path().to_path_buf()]);
        let def = m.resolve("helper").await.unwrap();
        assert_eq!(def.metadata.description, "specific");

        let discovered = m.discover().await;
        let helper = discovered.iter().find(|d| d.metadata.name == "helper").unwrap();
        assert_eq!(helper.metadata.description, "specific");
    }

    #[tokio::test]
    async fn discover_skips_broken_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "not: [valid").unwrap();
        std::fs::write(
            dir.path().join("good.yaml"),
            "name: good\ndescription: ok\ninstruction: x\n",
        )
        .unwrap();

        let m = manager(vec![dir.path().to_path_buf()]);
        let discovered = m.discover().await;
        assert!(discovered.iter().any(|d| d.metadata.name == "good"));
        assert!(!discovered.iter().any(|d| d.metadata.name == "bad"));
        // Code registry still contributes `default`.
        assert!(discovered.iter().any(|d| d.metadata.name == "default"));
    }

    #[tokio::test]
    async fn card_round_trips_name_and_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("summarizer.yaml"),
            "name: summarizer\ndescription: Summarizes documents\ninstruction: Summarize.\n",
        )
        .unwrap();
        let m = manager(vec![dir.path().to_path_buf()]);
        let def = m.resolve("summarizer").await.unwrap();
        let card = def.card();
        assert_eq!(card.name, "summarizer");
        assert_eq!(card.description, "Summarizes documents");
    }
}
