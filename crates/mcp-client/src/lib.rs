//! Model Context Protocol client.
//!
//! Remote tools speak MCP over one of three transports: stdio (child
//! process, newline-delimited JSON-RPC), HTTP (JSON POST), or SSE.
//! Connections open lazily on the first tool call and are pooled per
//! workload instance; within a connection, request/response cycles are
//! serialized.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{McpConnection, TransportSpec};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpTool};
pub use transport::{substitute_headers, TransportError};
