//! Command-line argument surface.

use std::path::{Path, PathBuf};

use clap::Parser;

/// Default environment variable holding the bearer token for HTTP agent
/// spec fetches.
pub const DEFAULT_AGENT_URI_AUTH_VAR: &str = "STREETRACE_AGENT_URI_AUTH";

#[derive(Debug, Parser)]
#[command(name = "streetrace", version, about = "AI-agent workflow runtime")]
pub struct Args {
    /// Working directory (default: current).
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Model identifier in provider/model form.
    #[arg(long)]
    pub model: Option<String>,

    /// Workload name; `default` selects the built-in coding agent.
    #[arg(long, default_value = "default")]
    pub agent: String,

    /// Environment variable holding auth for HTTP agent URIs.
    #[arg(long)]
    pub agent_uri_auth_var: Option<String>,

    /// Non-interactive one-shot prompt.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Trailing arguments are joined as a prompt.
    #[arg(trailing_var_arg = true)]
    pub arbitrary_prompt: Vec<String>,

    /// Application name for the session (default: working dir name).
    #[arg(long)]
    pub app_name: Option<String>,

    /// User ID for the session (default: OS login name).
    #[arg(long)]
    pub user_id: Option<String>,

    /// Session ID to use or create.
    #[arg(long)]
    pub session_id: Option<String>,

    /// List available sessions and exit.
    #[arg(long)]
    pub list_sessions: bool,

    /// List available agents and exit.
    #[arg(long)]
    pub list_agents: bool,

    /// Enable verbose (DEBUG) logging.
    #[arg(long)]
    pub verbose: bool,

    /// Write the final assistant message to a file on completion.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl Args {
    /// The non-interactive prompt: `--prompt` wins, otherwise positional
    /// arguments joined with spaces.
    pub fn non_interactive_prompt(&self) -> Option<String> {
        if let Some(p) = &self.prompt {
            return Some(p.clone());
        }
        if !self.arbitrary_prompt.is_empty() {
            return Some(self.arbitrary_prompt.join(" "));
        }
        None
    }

    /// Resolved absolute working directory.
    pub fn working_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = match &self.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => std::env::current_dir()?.join(p),
            None => std::env::current_dir()?,
        };
        if !dir.is_dir() {
            anyhow::bail!("'{}' is not a valid directory", dir.display());
        }
        Ok(dir)
    }

    pub fn effective_app_name(&self, work_dir: &Path) -> String {
        self.app_name.clone().unwrap_or_else(|| {
            work_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "streetrace".to_owned())
        })
    }

    pub fn effective_user_id(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| {
            std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "user".to_owned())
        })
    }

    /// Bearer token for HTTP agent-spec fetches, from the configured (or
    /// default) environment variable.
    pub fn agent_uri_auth(&self) -> Option<String> {
        let var = self
            .agent_uri_auth_var
            .as_deref()
            .unwrap_or(DEFAULT_AGENT_URI_AUTH_VAR);
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_flag_wins_over_positional() {
        let args = Args::parse_from(["streetrace", "--prompt", "explicit", "extra", "words"]);
        assert_eq!(args.non_interactive_prompt().as_deref(), Some("explicit"));
    }

    #[test]
    fn positional_arguments_join_as_prompt() {
        let args = Args::parse_from(["streetrace", "fix", "the", "bug"]);
        assert_eq!(args.non_interactive_prompt().as_deref(), Some("fix the bug"));
    }

    #[test]
    fn no_prompt_means_none() {
        let args = Args::parse_from(["streetrace"]);
        assert!(args.non_interactive_prompt().is_none());
        assert_eq!(args.agent, "default");
    }

    #[test]
    fn app_name_defaults_to_work_dir_name() {
        let args = Args::parse_from(["streetrace"]);
        assert_eq!(
            args.effective_app_name(Path::new("/tmp/myproject")),
            "myproject"
        );

        let args = Args::parse_from(["streetrace", "--app-name", "custom"]);
        assert_eq!(args.effective_app_name(Path::new("/tmp/myproject")), "custom");
    }
}
