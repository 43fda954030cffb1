//! # memagent
//!
//! An AI-driven automation agent for multi-step memory analysis. The agent
//! plans a task, executes analysis-engine tools over a local JSON-RPC
//! bridge, reasons about each result, and synthesizes a final report.
//!
//! ## Architecture
//!
//! - **Bridge**: length-prefixed JSON-RPC over a local socket (or
//!   newline-delimited over a child process's stdio), behind a connection
//!   pool with health checks
//! - **Tools**: a registry of engine tools with validation, a permission
//!   policy for destructive operations, and per-call deadlines
//! - **Reasoning**: rule-based analysis and decisions, optionally upgraded
//!   by an LLM with automatic fallback
//! - **Agent**: the control loop tying planner, executor, reasoner, and
//!   synthesizer together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memagent::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load(None).unwrap();
//!     let connector = BridgeConnector::new(config.bridge_transport(), 3);
//!     let pool = memagent::bridge::connect_pool(connector, config.pool_config()).await;
//!
//!     let registry = engine_registry();
//!     let executor = ToolExecutor::new(Arc::new(registry.clone()), pool, config.executor_config());
//!
//!     let agent = Agent::new(
//!         Arc::new(RulePlanner::new(registry)),
//!         Arc::new(ReportSynthesizer),
//!         ReasoningEngine::new(None),
//!         executor,
//!     );
//!
//!     let report = agent.execute("find the player health value").await;
//!     println!("{}", report.summary);
//! }
//! ```

pub mod agent;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod planner;
pub mod reasoning;
pub mod synthesizer;
pub mod tool;

// Re-exports for convenient usage
pub use agent::{Agent, AgentEvent, AgentStatus};
pub use bridge::{BridgeClient, BridgeConnector, BridgePool, BridgeTransport, PoolConfig};
pub use config::Config;
pub use context::{AnalysisReport, ExecutionContext, ExecutionPlan, Subtask, TaskState};
pub use error::AgentError;
pub use planner::{Planner, RulePlanner};
pub use reasoning::{Decision, DecisionAction, ReasoningEngine};
pub use synthesizer::{ReportSynthesizer, Synthesizer};
pub use tool::{engine_registry, ToolCall, ToolExecutor, ToolRegistry, ToolResult};

/// Prelude module with commonly used types.
pub mod prelude {
    pub use crate::agent::{Agent, AgentEvent, AgentStatus};
    pub use crate::bridge::{BridgeConnector, BridgeTransport, PoolConfig};
    pub use crate::config::Config;
    pub use crate::context::{AnalysisReport, ExecutionPlan, TaskState};
    pub use crate::error::AgentError;
    pub use crate::planner::{Planner, RulePlanner};
    pub use crate::reasoning::ReasoningEngine;
    pub use crate::synthesizer::{ReportSynthesizer, Synthesizer};
    pub use crate::tool::{engine_registry, ToolExecutor, ToolRegistry};
}
