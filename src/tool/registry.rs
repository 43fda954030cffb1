//! Explicit tool registry.
//!
//! Every tool is a metadata record plus a handler closure with one uniform
//! signature: bridge handle in, JSON arguments in, JSON value out. The
//! registry is a plain object that gets passed where it is needed; there is
//! no global table.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::bridge::BridgeExecutor;
use crate::error::AgentError;
use crate::tool::types::{ToolCategory, ToolMetadata};

/// Boxed future returned by every tool handler.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, AgentError>> + Send>>;

/// The uniform handler signature shared by all tools.
pub type ToolHandler = Arc<dyn Fn(Arc<dyn BridgeExecutor>, Value) -> ToolFuture + Send + Sync>;

/// A registered tool: metadata plus its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub metadata: ToolMetadata,
    pub handler: ToolHandler,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.metadata.name)
            .field("category", &self.metadata.category)
            .field("destructive", &self.metadata.destructive)
            .finish()
    }
}

/// Registry of the tools available to the agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers a tool, replacing any previous tool of the same name.
    pub fn register<H, Fut>(&mut self, metadata: ToolMetadata, handler: H)
    where
        H: Fn(Arc<dyn BridgeExecutor>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        let name = metadata.name.clone();
        let handler: ToolHandler = Arc::new(move |bridge, args| Box::pin(handler(bridge, args)));
        self.tools.insert(name, RegisteredTool { metadata, handler });
    }

    pub fn unregister(&mut self, name: &str) -> Option<RegisteredTool> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool metadata, sorted by name for stable listings.
    pub fn list(&self) -> Vec<&ToolMetadata> {
        let mut all: Vec<_> = self.tools.values().map(|t| &t.metadata).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Tool names in one category, sorted.
    pub fn names_in_category(&self, category: ToolCategory) -> Vec<String> {
        let mut names: Vec<_> = self
            .tools
            .values()
            .filter(|t| t.metadata.category == category)
            .map(|t| t.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools_count", &self.tools.len())
            .finish()
    }
}
