//! Tool layer: references, safety, built-in tools, and the provider that
//! materializes references into invocable handles for the agent runtime.

pub mod builtin;
pub mod cli_safety;
pub mod path_safety;
pub mod provider;
pub mod refs;
pub mod result;

pub use provider::{AgentHost, ToolContext, ToolHandle, ToolProvider};
pub use refs::ToolRef;
pub use result::{OpResultCode, ToolCallResult};
