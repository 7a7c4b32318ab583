//! Project system message and context loading.
//!
//! `./.streetrace/system.md` supplies the system message; every other
//! file under `./.streetrace/` concatenates into the project context.

use std::path::{Path, PathBuf};

pub struct SystemContext {
    config_dir: PathBuf,
}

const DEFAULT_SYSTEM_MESSAGE: &str = "\
You are a careful software engineering assistant working inside the \
user's project. Prefer small, verifiable steps and use the available \
tools to inspect the project before answering.";

impl SystemContext {
    pub fn new(work_dir: &Path) -> Self {
        Self { config_dir: work_dir.join(".streetrace") }
    }

    /// The system message: `system.md` when present, a default otherwise.
    pub fn system_message(&self) -> String {
        let path = self.config_dir.join("system.md");
        match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                DEFAULT_SYSTEM_MESSAGE.to_owned()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read system message");
                DEFAULT_SYSTEM_MESSAGE.to_owned()
            }
        }
    }

    /// All context files except `system.md`, concatenated with headers,
    /// sorted by file name for a stable order.
    pub fn project_context(&self) -> String {
        let Ok(entries) = std::fs::read_dir(&self.config_dir) else {
            return String::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.file_name().is_some_and(|n| n != "system.md"))
            .collect();
        files.sort();

        let mut combined = String::new();
        for path in files {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    combined.push_str(&format!("---\n# {name}\n\n{content}\n"));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable context file");
                }
            }
        }
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_system_message_without_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SystemContext::new(dir.path());
        assert!(ctx.system_message().contains("software engineering"));
        assert_eq!(ctx.project_context(), "");
    }

    #[test]
    fn system_md_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join(".streetrace");
        std::fs::create_dir_all(&cfg).unwrap();
        std::fs::write(cfg.join("system.md"), "Be terse.").unwrap();

        let ctx = SystemContext::new(dir.path());
        assert_eq!(ctx.system_message(), "Be terse.");
    }

    #[test]
    fn context_concatenates_everything_but_system_md() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join(".streetrace");
        std::fs::create_dir_all(&cfg).unwrap();
        std::fs::write(cfg.join("system.md"), "system").unwrap();
        std::fs::write(cfg.join("conventions.md"), "use tabs").unwrap();
        std::fs::write(cfg.join("architecture.md"), "hexagonal").unwrap();

        let ctx = SystemContext::new(dir.path());
        let combined = ctx.project_context();
        assert!(combined.contains("use tabs"));
        assert!(combined.contains("hexagonal"));
        assert!(!combined.contains("# system.md"));
        // Sorted by name: architecture before conventions.
        assert!(combined.find("architecture").unwrap() < combined.find("conventions").unwrap());
    }
}
