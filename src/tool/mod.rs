//! Tool layer: metadata, registry, executor, and the built-in engine catalog.

pub mod catalog;
pub mod executor;
pub mod registry;
pub mod types;

pub use catalog::engine_registry;
pub use executor::{ExecutorConfig, ToolExecutor};
pub use registry::{RegisteredTool, ToolHandler, ToolRegistry};
pub use types::{ParamType, Parameter, ToolCall, ToolCategory, ToolMetadata, ToolResult};
