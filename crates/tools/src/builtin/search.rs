//! find_in_files: glob + substring search with result and snippet caps.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::fs::glob_to_regex;
use crate::builtin::{object_schema, require_str, BuiltinTool};
use crate::provider::ToolContext;
use crate::result::ToolCallResult;

pub struct FindInFiles;

#[async_trait]
impl BuiltinTool for FindInFiles {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "find_in_files"
    }
    fn description(&self) -> &'static str {
        "Search for a substring in files matching a glob pattern.\n\
         pattern: glob over relative paths, e.g. 'src/**/*.rs'\n\
         search_string: substring to look for\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "pattern": {"type": "string", "description": "Glob over relative paths"},
                "search_string": {"type": "string"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["pattern", "search_string", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let pattern = match require_str(&args, "pattern", self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };
        let needle = match require_str(&args, "search_string", self.name()) {
            Ok(s) => s,
            Err(fail) => return fail,
        };
        let Some(matcher) = glob_to_regex(pattern) else {
            return ToolCallResult::failure(self.name(), format!("invalid glob pattern '{pattern}'"));
        };

        let max_results = ctx.config.max_search_results;
        let max_snippet = ctx.config.max_snippet_chars;

        let mut matches = Vec::new();
        let mut stack = vec![ctx.work_dir.clone()];
        'walk: while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    if name != ".git" {
                        stack.push(path);
                    }
                    continue;
                }
                let rel = path
                    .strip_prefix(&ctx.work_dir)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| name.clone());
                if !matcher.is_match(&rel) {
                    continue;
                }
                let Ok(content) = tokio::fs::read_to_string(&path).await else {
                    continue; // skip binary/unreadable files
                };
                for (line_no, line) in content.lines().enumerate() {
                    if line.contains(needle) {
                        let snippet: String = line.trim().chars().take(max_snippet).collect();
                        matches.push(json!({
                            "file": rel,
                            "line": line_no + 1,
                            "snippet": snippet,
                        }));
                        if matches.len() >= max_results {
                            break 'walk;
                        }
                    }
                }
            }
        }

        let truncated = matches.len() >= max_results;
        ToolCallResult::success(
            self.name(),
            json!({"matches": matches, "truncated": truncated}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolContext;
    use sr_domain::config::ToolsConfig;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir.to_path_buf())
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "fn main() {\n    needle();\n}\n").unwrap();
        std::fs::write(dir.path().join("src/b.txt"), "needle here\n").unwrap();

        let result = FindInFiles
            .invoke(
                json!({"pattern": "src/**/*.rs", "search_string": "needle"}),
                &ctx(dir.path()),
            )
            .await;
        let out = result.output.unwrap();
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["file"], "src/a.rs");
        assert_eq!(matches[0]["line"], 2);
    }

    #[tokio::test]
    async fn result_count_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::new();
        for _ in 0..50 {
            body.push_str("needle\n");
        }
        std::fs::write(dir.path().join("big.txt"), body).unwrap();

        let mut c = ctx(dir.path());
        c.config = ToolsConfig { max_search_results: 10, ..Default::default() };

        let result = FindInFiles
            .invoke(json!({"pattern": "*.txt", "search_string": "needle"}), &c)
            .await;
        let out = result.output.unwrap();
        assert_eq!(out["matches"].as_array().unwrap().len(), 10);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn snippet_length_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let long_line = format!("needle {}", "x".repeat(500));
        std::fs::write(dir.path().join("a.txt"), long_line).unwrap();

        let mut c = ctx(dir.path());
        c.config = ToolsConfig { max_snippet_chars: 20, ..Default::default() };

        let result = FindInFiles
            .invoke(json!({"pattern": "*.txt", "search_string": "needle"}), &c)
            .await;
        let out = result.output.unwrap();
        let snippet = out["matches"][0]["snippet"].as_str().unwrap();
        assert_eq!(snippet.chars().count(), 20);
    }
}
