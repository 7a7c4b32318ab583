//! apply_unified_patch: apply a unified diff to files in the working
//! directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::{object_schema, require_str, BuiltinTool};
use crate::path_safety::normalize_and_validate;
use crate::provider::ToolContext;
use crate::result::ToolCallResult;

pub struct ApplyUnifiedPatch;

#[async_trait]
impl BuiltinTool for ApplyUnifiedPatch {
    fn module(&self) -> &'static str {
        "fs"
    }
    fn name(&self) -> &'static str {
        "apply_unified_patch"
    }
    fn description(&self) -> &'static str {
        "Apply a unified diff to files under the working directory.\n\
         patch: unified diff text ('--- a/…', '+++ b/…', '@@' hunks)\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "patch": {"type": "string", "description": "Unified diff text"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["patch", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let patch = match require_str(&args, "patch", self.name()) {
            Ok(p) => p,
            Err(fail) => return fail,
        };

        let files = match parse_patch(patch) {
            Ok(files) => files,
            Err(e) => return ToolCallResult::failure(self.name(), e),
        };
        if files.is_empty() {
            return ToolCallResult::failure(self.name(), "patch contains no file sections");
        }

        let mut patched = Vec::new();
        for file in files {
            match self.apply_file(&file, ctx).await {
                Ok(path) => patched.push(path),
                Err(e) => return ToolCallResult::failure(self.name(), e),
            }
        }
        ToolCallResult::success(self.name(), json!({"patched": patched}))
    }
}

impl ApplyUnifiedPatch {
    async fn apply_file(&self, file: &FilePatch, ctx: &ToolContext) -> Result<String, String> {
        // Deletion: old exists, new target is /dev/null.
        if file.new_path.is_none() {
            let Some(old) = &file.old_path else {
                return Err("patch section with neither old nor new path".into());
            };
            let path = self.resolve(old, ctx)?;
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| format!("deleting {old}: {e}"))?;
            return Ok(old.clone());
        }

        let target = file.new_path.as_ref().unwrap();
        let path = self.resolve(target, ctx)?;

        let original = if file.old_path.is_none() {
            String::new() // new file
        } else {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("reading {target}: {e}"))?
        };

        let patched = apply_hunks(&original, &file.hunks)
            .map_err(|e| format!("applying patch to {target}: {e}"))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        tokio::fs::write(&path, patched)
            .await
            .map_err(|e| format!("writing {target}: {e}"))?;
        Ok(target.clone())
    }

    fn resolve(&self, rel: &str, ctx: &ToolContext) -> Result<PathBuf, String> {
        normalize_and_validate(rel, &ctx.work_dir).map_err(|e| e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unified diff parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct FilePatch {
    /// `None` for newly created files (`--- /dev/null`).
    old_path: Option<String>,
    /// `None` for deleted files (`+++ /dev/null`).
    new_path: Option<String>,
    hunks: Vec<Hunk>,
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

#[derive(Debug)]
enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

fn strip_prefix_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(stripped.to_owned())
}

fn parse_patch(text: &str) -> Result<Vec<FilePatch>, String> {
    let mut files = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("--- ") {
            continue;
        }
        let old_path = strip_prefix_path(&line[4..]);
        let new_line = lines
            .next()
            .ok_or_else(|| "'---' header without '+++' line".to_owned())?;
        if !new_line.starts_with("+++ ") {
            return Err("'---' header without '+++' line".into());
        }
        let new_path = strip_prefix_path(&new_line[4..]);

        let mut hunks = Vec::new();
        while let Some(peeked) = lines.peek() {
            if !peeked.starts_with("@@") {
                break;
            }
            let header = lines.next().unwrap();
            let old_start = parse_hunk_header(header)?;
            let mut hunk = Hunk { old_start, lines: Vec::new() };
            while let Some(peeked) = lines.peek() {
                if peeked.starts_with("@@") || peeked.starts_with("--- ") {
                    break;
                }
                let body = lines.next().unwrap();
                match body.chars().next() {
                    Some('+') => hunk.lines.push(HunkLine::Add(body[1..].to_owned())),
                    Some('-') => hunk.lines.push(HunkLine::Remove(body[1..].to_owned())),
                    Some(' ') => hunk.lines.push(HunkLine::Context(body[1..].to_owned())),
                    Some('\\') => {} // "\ No newline at end of file"
                    None => hunk.lines.push(HunkLine::Context(String::new())),
                    _ => break,
                }
            }
            hunks.push(hunk);
        }

        files.push(FilePatch { old_path, new_path, hunks });
    }
    Ok(files)
}

/// Parse `@@ -old_start,old_len +new_start,new_len @@`, returning the
/// 1-indexed old start line.
fn parse_hunk_header(header: &str) -> Result<usize, String> {
    let inner = header
        .trim_start_matches('@')
        .trim_end_matches('@')
        .trim();
    let old = inner
        .split_whitespace()
        .find(|p| p.starts_with('-'))
        .ok_or_else(|| format!("malformed hunk header '{header}'"))?;
    let start = old[1..]
        .split(',')
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| format!("malformed hunk header '{header}'"))?;
    Ok(start)
}

fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, String> {
    let original_lines: Vec<&str> = if original.is_empty() {
        Vec::new()
    } else {
        original.lines().collect()
    };
    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize; // index into original_lines

    for hunk in hunks {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor {
            return Err("overlapping hunks".into());
        }
        if start > original_lines.len() {
            return Err(format!("hunk start {} beyond end of file", hunk.old_start));
        }
        out.extend(original_lines[cursor..start].iter().map(|s| (*s).to_owned()));
        cursor = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) => {
                    let actual = original_lines.get(cursor).copied().unwrap_or_default();
                    if actual != text {
                        return Err(format!(
                            "context mismatch at line {}: expected '{text}', found '{actual}'",
                            cursor + 1
                        ));
                    }
                    out.push(text.clone());
                    cursor += 1;
                }
                HunkLine::Remove(text) => {
                    let actual = original_lines.get(cursor).copied().unwrap_or_default();
                    if actual != text {
                        return Err(format!(
                            "removal mismatch at line {}: expected '{text}', found '{actual}'",
                            cursor + 1
                        ));
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push(text.clone()),
            }
        }
    }

    out.extend(original_lines[cursor..].iter().map(|s| (*s).to_owned()));
    let mut joined = out.join("\n");
    if original.ends_with('\n') || original.is_empty() {
        joined.push('\n');
    }
    Ok(joined)
}
