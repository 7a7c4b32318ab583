//! Workflow runtime: the supervisor, the flow interpreter, the LLM agent
//! loop, history compaction, guardrails, cancellation, and the event bus
//! that decouples all of it from the UI layer.

pub mod agent;
pub mod bus;
pub mod cancel;
pub mod compaction;
pub mod context;
pub mod flow;
pub mod guardrails;
pub mod structured;
pub mod supervisor;
pub mod workload;

pub use bus::EventBus;
pub use cancel::{CancelMap, CancelToken};
pub use context::WorkflowContext;
pub use supervisor::{Supervisor, TurnRequest, TurnResult};
pub use workload::{TurnOutput, Workload};
