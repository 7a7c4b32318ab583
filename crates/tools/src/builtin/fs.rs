//! Filesystem built-ins. Every path argument passes through
//! [`path_safety`](crate::path_safety) before any I/O.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::{object_schema, require_str, BuiltinTool};
use crate::path_safety::normalize_and_validate;
use crate::provider::ToolContext;
use crate::result::ToolCallResult;

fn validate(args: &Value, ctx: &ToolContext, tool: &str) -> Result<std::path::PathBuf, ToolCallResult> {
    let path = require_str(args, "path", tool)?;
    normalize_and_validate(path, &ctx.work_dir)
        .map_err(|e| ToolCallResult::failure(tool, e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReadFile;

#[async_trait]
impl BuiltinTool for ReadFile {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "read_file"
    }
    fn description(&self) -> &'static str {
        "Read a UTF-8 text file.\n\
         path: file path relative to the working directory\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": {"type": "string", "description": "File path relative to the working directory"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["path", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let path = match validate(&args, ctx, self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolCallResult::success(
                self.name(),
                json!({"path": path.display().to_string(), "content": content}),
            ),
            Err(e) => ToolCallResult::failure(self.name(), format!("reading {}: {e}", path.display())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteFile;

#[async_trait]
impl BuiltinTool for WriteFile {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "write_file"
    }
    fn description(&self) -> &'static str {
        "Write UTF-8 text to a file, creating parent directories as needed.\n\
         path: file path relative to the working directory\n\
         content: text to write\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": {"type": "string"},
                "content": {"type": "string"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["path", "content", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let path = match validate(&args, ctx, self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };
        let content = match require_str(&args, "content", self.name()) {
            Ok(c) => c,
            Err(fail) => return fail,
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolCallResult::failure(self.name(), format!("creating {}: {e}", parent.display()));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolCallResult::success(
                self.name(),
                json!({"path": path.display().to_string(), "bytes_written": content.len()}),
            ),
            Err(e) => ToolCallResult::failure(self.name(), format!("writing {}: {e}", path.display())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_json
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteJson;

#[async_trait]
impl BuiltinTool for WriteJson {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "write_json"
    }
    fn description(&self) -> &'static str {
        "Validate a JSON document and write it pretty-printed.\n\
         path: file path relative to the working directory\n\
         content: JSON text to validate and write\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": {"type": "string"},
                "content": {"type": "string", "description": "JSON text to validate and write"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["path", "content", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let path = match validate(&args, ctx, self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };
        let content = match require_str(&args, "content", self.name()) {
            Ok(c) => c,
            Err(fail) => return fail,
        };
        let parsed: Value = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(e) => return ToolCallResult::failure(self.name(), format!("invalid JSON: {e}")),
        };
        let pretty = match serde_json::to_string_pretty(&parsed) {
            Ok(p) => p,
            Err(e) => return ToolCallResult::failure(self.name(), e.to_string()),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolCallResult::failure(self.name(), e.to_string());
            }
        }
        match tokio::fs::write(&path, pretty).await {
            Ok(()) => ToolCallResult::success(self.name(), json!({"path": path.display().to_string()})),
            Err(e) => ToolCallResult::failure(self.name(), e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// create_directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CreateDirectory;

#[async_trait]
impl BuiltinTool for CreateDirectory {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "create_directory"
    }
    fn description(&self) -> &'static str {
        "Create a directory (and any missing parents).\n\
         path: directory path relative to the working directory\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": {"type": "string"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["path", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let path = match validate(&args, ctx, self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };
        match tokio::fs::create_dir_all(&path).await {
            Ok(()) => ToolCallResult::success(self.name(), json!({"path": path.display().to_string()})),
            Err(e) => ToolCallResult::failure(self.name(), e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// append_to_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AppendToFile;

#[async_trait]
impl BuiltinTool for AppendToFile {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "append_to_file"
    }
    fn description(&self) -> &'static str {
        "Append UTF-8 text to a file, creating it if absent.\n\
         path: file path relative to the working directory\n\
         content: text to append\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": {"type": "string"},
                "content": {"type": "string"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["path", "content", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let path = match validate(&args, ctx, self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };
        let content = match require_str(&args, "content", self.name()) {
            Ok(c) => c,
            Err(fail) => return fail,
        };
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, content.as_bytes()).await
        }
        .await;
        match result {
            Ok(()) => ToolCallResult::success(
                self.name(),
                json!({"path": path.display().to_string(), "bytes_appended": content.len()}),
            ),
            Err(e) => ToolCallResult::failure(self.name(), e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ListDirectory;

#[async_trait]
impl BuiltinTool for ListDirectory {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "list_directory"
    }
    fn description(&self) -> &'static str {
        "List directory contents, honoring .gitignore rules.\n\
         path: directory to list, default '.'\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": {"type": "string", "description": "Directory to list, default '.'"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let rel = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = match normalize_and_validate(rel, &ctx.work_dir) {
            Ok(p) => p,
            Err(e) => return ToolCallResult::failure(self.name(), e.to_string()),
        };
        let ignore = GitIgnore::load(&ctx.work_dir).await;

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(e) => e,
            Err(e) => {
                return ToolCallResult::failure(self.name(), format!("listing {}: {e}", path.display()))
            }
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    if ignore.is_ignored(&name, is_dir) {
                        continue;
                    }
                    if is_dir {
                        dirs.push(name);
                    } else {
                        files.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => return ToolCallResult::failure(self.name(), e.to_string()),
            }
        }
        dirs.sort();
        files.sort();
        ToolCallResult::success(
            self.name(),
            json!({"path": path.display().to_string(), "dirs": dirs, "files": files}),
        )
    }
}

/// Parsed .gitignore rules (plus the implicit `.git` entry).
pub(crate) struct GitIgnore {
    patterns: Vec<(regex::Regex, bool)>, // (matcher, dir_only)
}

impl GitIgnore {
    pub(crate) async fn load(work_dir: &std::path::Path) -> Self {
        let mut patterns = vec![(regex::Regex::new("^\\.git$").unwrap(), true)];
        if let Ok(raw) = tokio::fs::read_to_string(work_dir.join(".gitignore")).await {
            for line in raw.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                    continue;
                }
                let (pat, dir_only) = match line.strip_suffix('/') {
                    Some(stripped) => (stripped, true),
                    None => (line, false),
                };
                let pat = pat.trim_start_matches('/');
                if let Some(re) = glob_to_regex(pat) {
                    patterns.push((re, dir_only));
                }
            }
        }
        Self { patterns }
    }

    pub(crate) fn is_ignored(&self, name: &str, is_dir: bool) -> bool {
        self.patterns
            .iter()
            .any(|(re, dir_only)| re.is_match(name) && (!dir_only || is_dir))
    }
}

/// Translate a gitignore-style glob into an anchored regex.
pub(crate) fn glob_to_regex(glob: &str) -> Option<regex::Regex> {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    out.push_str(".*");
                    i += 2;
                    // Swallow a following separator: `**/x` matches `x`.
                    if chars.get(i) == Some(&'/') {
                        out.push_str("/?");
                        i += 1;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    regex::Regex::new(&out).ok()
}
