//! execute_cli_command: non-shell command execution behind the safety
//! classifier.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::{object_schema, require_str, BuiltinTool};
use crate::cli_safety::{cli_safe_category, parse_command, SafetyCategory};
use crate::provider::ToolContext;
use crate::result::ToolCallResult;

const RISKY_COMMAND_ERROR: &str =
    "Command execution blocked: the command was flagged as potentially risky. \
     Use relative paths and avoid commands that may affect system state outside \
     the current directory.";

pub struct ExecuteCliCommand;

#[async_trait]
impl BuiltinTool for ExecuteCliCommand {
    fn module(&self) -> &'static str {
        "cli"
    }
    fn name(&self) -> &'static str {
        "execute_cli_command"
    }
    fn description(&self) -> &'static str {
        "Execute a CLI command in the working directory. No shell is\n\
         involved; pipelines and chaining are not supported.\n\
         command: the command line to run\n\
         work_dir: the working directory root"
    }
    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "command": {"type": "string", "description": "The command line to run"},
                "work_dir": {"type": "string", "description": "The working directory root"},
            }),
            &["command", "work_dir"],
        )
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> ToolCallResult {
        let command = match require_str(&args, "command", self.name()) {
            Ok(c) => c,
            Err(fail) => return fail,
        };

        match cli_safe_category(command) {
            SafetyCategory::Risky => {
                tracing::warn!(command, "refused risky command");
                return ToolCallResult::failure(self.name(), RISKY_COMMAND_ERROR);
            }
            SafetyCategory::Ambiguous => {
                tracing::info!(command, "executing ambiguous command");
            }
            SafetyCategory::Safe => {}
        }

        let parsed = parse_command(command);
        if parsed.len() != 1 {
            return ToolCallResult::failure(
                self.name(),
                "pipelines and command chaining are not supported; run commands separately",
            );
        }
        let (program, cli_args) = &parsed[0];

        let output = tokio::process::Command::new(program)
            .args(cli_args)
            .current_dir(&ctx.work_dir)
            .output()
            .await;

        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                let exit_code = out.status.code();
                let payload = json!({
                    "stdout": stdout,
                    "stderr": stderr,
                    "exit_code": exit_code,
                });
                if out.status.success() {
                    ToolCallResult::success(self.name(), payload)
                } else {
                    // Non-zero exit is a tool-call failure, not fatal.
                    let mut result =
                        ToolCallResult::failure(self.name(), format!("exit code {exit_code:?}"));
                    result.output = Some(payload);
                    result
                }
            }
            Err(e) => ToolCallResult::failure(self.name(), format!("spawning '{program}': {e}")),
        }
    }
}
