//! Task planning: turning a free-form request into an execution plan.

use async_trait::async_trait;
use tracing::debug;

use crate::context::{ExecutionPlan, Subtask};
use crate::error::AgentError;
use crate::tool::{ToolCategory, ToolRegistry};

/// Produces an execution plan for a request.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &str) -> Result<ExecutionPlan, AgentError>;
}

/// Keyword-driven planner over the registry's tool categories.
///
/// Every plan starts with a reconnaissance subtask so later steps have
/// process and module information to draw arguments from.
pub struct RulePlanner {
    registry: ToolRegistry,
}

impl RulePlanner {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    fn subtask_for(
        &self,
        id: &str,
        description: &str,
        category: ToolCategory,
        depends_on_recon: bool,
    ) -> Subtask {
        let subtask = Subtask::new(id, description, self.registry.names_in_category(category));
        if depends_on_recon {
            subtask.with_dependencies(vec!["recon".to_string()])
        } else {
            subtask
        }
    }
}

#[async_trait]
impl Planner for RulePlanner {
    async fn plan(&self, request: &str) -> Result<ExecutionPlan, AgentError> {
        let lower = request.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        let mut subtasks = vec![Subtask::new(
            "recon",
            "Gather process and module information",
            vec!["get_process_info".to_string(), "enum_modules".to_string()],
        )];

        if mentions(&["scan", "find", "search", "value"]) {
            subtasks.push(self.subtask_for(
                "scan",
                "Scan memory for the requested value",
                ToolCategory::Scan,
                true,
            ));
        }
        if mentions(&["pointer", "chain", "offset"]) {
            subtasks.push(self.subtask_for(
                "pointer",
                "Resolve pointer chains to stable addresses",
                ToolCategory::Pointer,
                true,
            ));
        }
        if mentions(&["read", "string", "dump"]) {
            subtasks.push(self.subtask_for(
                "read",
                "Read the located memory",
                ToolCategory::Memory,
                true,
            ));
        }
        if mentions(&["disassemble", "function", "code", "instruction"]) {
            subtasks.push(self.subtask_for(
                "code",
                "Disassemble and analyze the surrounding code",
                ToolCategory::Debug,
                true,
            ));
        }
        if mentions(&["breakpoint", "watch", "access", "writes to"]) {
            subtasks.push(self.subtask_for(
                "watch",
                "Watch accesses to the located memory",
                ToolCategory::Debug,
                true,
            ));
        }

        // A request matching nothing still gets a scan pass after recon, the
        // most generally useful follow-up.
        if subtasks.len() == 1 {
            subtasks.push(self.subtask_for(
                "scan",
                "Scan memory related to the request",
                ToolCategory::Scan,
                true,
            ));
        }

        let estimated_steps = subtasks.iter().map(|s| s.tools.len() as u64).sum::<u64>().max(1);
        // The first non-recon subtask names the dominant kind of work.
        let task_type = subtasks[1].id.clone();
        let plan = ExecutionPlan {
            task_type,
            subtasks,
            estimated_steps,
        };
        plan.validate()?;

        debug!(
            subtasks = plan.subtasks.len(),
            estimated_steps = plan.estimated_steps,
            "plan created"
        );
        Ok(plan)
    }
}
