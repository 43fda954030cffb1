//! Agent orchestration: plan walking, argument derivation, and the task
//! queue main loop.

pub mod args;
pub mod orchestrator;

pub use args::determine_tool_args;
pub use orchestrator::{Agent, AgentEvent, AgentStatus, EventCallback};
