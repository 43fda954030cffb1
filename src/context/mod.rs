//! Execution state shared between the planner, executor, and reasoner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AgentError;
use crate::tool::ToolResult;

/// Lifecycle of a task. Completed and Failed are absorbing: once a task
/// reaches either, later transitions are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// One entry of the append-only execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 1-based, strictly increasing.
    pub step_id: u64,
    pub subtask_id: String,
    pub result: ToolResult,
    pub timestamp: DateTime<Utc>,
}

/// A unit of the plan: a description plus the tools expected to advance it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub tools: Vec<String>,
    /// Ids of subtasks that must have produced a successful step first.
    pub dependencies: Vec<String>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>, tools: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tools,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// An ordered plan for one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Coarse classification of the request ("scan", "pointer", ...).
    pub task_type: String,
    pub subtasks: Vec<Subtask>,
    /// Denominator for progress computation; must be positive.
    pub estimated_steps: u64,
}

impl ExecutionPlan {
    /// Checks structural soundness: positive step estimate, unique subtask
    /// ids, and dependencies that only point at earlier subtasks.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.estimated_steps == 0 {
            return Err(AgentError::Validation(
                "plan must estimate at least one step".to_string(),
            ));
        }
        if self.subtasks.is_empty() {
            return Err(AgentError::Validation("plan has no subtasks".to_string()));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.subtasks.len());
        for subtask in &self.subtasks {
            if seen.contains(&subtask.id.as_str()) {
                return Err(AgentError::Validation(format!(
                    "duplicate subtask id '{}'",
                    subtask.id
                )));
            }
            for dep in &subtask.dependencies {
                if dep == &subtask.id {
                    return Err(AgentError::Validation(format!(
                        "subtask '{}' depends on itself",
                        subtask.id
                    )));
                }
                if !seen.contains(&dep.as_str()) {
                    return Err(AgentError::Validation(format!(
                        "subtask '{}' depends on '{}' which is not an earlier subtask",
                        subtask.id, dep
                    )));
                }
            }
            seen.push(&subtask.id);
        }
        Ok(())
    }
}

/// Mutable state of one running task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub request: String,
    pub state: TaskState,
    pub history: Vec<ExecutionStep>,
    /// Keyed `{tool}_{step_id}`, so repeated tools never collide.
    pub intermediate_results: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            request: request.into(),
            state: TaskState::Pending,
            history: Vec::new(),
            intermediate_results: HashMap::new(),
            started_at: Utc::now(),
        }
    }

    /// Appends a step, assigning the next 1-based id, and stores the result
    /// under its `{tool}_{step_id}` key when successful.
    pub fn add_step(&mut self, subtask_id: &str, result: ToolResult) -> u64 {
        let step_id = self.history.len() as u64 + 1;
        if result.success {
            if let Some(value) = &result.result {
                self.intermediate_results
                    .insert(format!("{}_{}", result.tool_name, step_id), value.clone());
            }
        }
        self.history.push(ExecutionStep {
            step_id,
            subtask_id: subtask_id.to_string(),
            result,
            timestamp: Utc::now(),
        });
        step_id
    }

    /// Applies a state transition. Terminal states absorb: a finished task
    /// never becomes Running again.
    pub fn update_state(&mut self, next: TaskState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = next;
    }

    pub fn successful_steps(&self) -> usize {
        self.history.iter().filter(|s| s.result.success).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.history.len() - self.successful_steps()
    }
}

/// Final product of a task: a summary plus the evidence behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub task_id: Uuid,
    pub request: String,
    pub success: bool,
    pub summary: String,
    /// Intermediate results gathered along the way, keyed `{tool}_{step_id}`.
    pub details: HashMap<String, Value>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl AnalysisReport {
    /// A failed report derived from whatever the context managed to do.
    pub fn failure(context: &ExecutionContext, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            task_id: context.task_id,
            request: context.request.clone(),
            success: false,
            summary: reason.clone(),
            details: context.intermediate_results.clone(),
            insights: Vec::new(),
            recommendations: Vec::new(),
            steps_executed: context.history.len(),
            steps_failed: context.failed_steps(),
            duration_secs: (Utc::now() - context.started_at).as_seconds_f64(),
            error: Some(reason),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn ok_result(tool: &str) -> ToolResult {
        ToolResult::ok(tool, Map::new(), json!({"ok": true}), 0.01)
    }

    fn err_result(tool: &str) -> ToolResult {
        ToolResult::err(tool, Map::new(), "boom", 0.01)
    }

    fn plan(subtasks: Vec<Subtask>) -> ExecutionPlan {
        ExecutionPlan {
            task_type: "test".to_string(),
            subtasks,
            estimated_steps: 3,
        }
    }

    #[test]
    fn step_ids_are_one_based_and_monotonic() {
        let mut ctx = ExecutionContext::new("find player health");
        assert_eq!(ctx.add_step("s1", ok_result("scan_all")), 1);
        assert_eq!(ctx.add_step("s1", err_result("read_memory")), 2);
        assert_eq!(ctx.add_step("s2", ok_result("scan_all")), 3);

        let ids: Vec<_> = ctx.history.iter().map(|s| s.step_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn repeated_tool_results_never_collide() {
        let mut ctx = ExecutionContext::new("req");
        ctx.add_step("s1", ok_result("scan_all"));
        ctx.add_step("s1", ok_result("scan_all"));

        assert!(ctx.intermediate_results.contains_key("scan_all_1"));
        assert!(ctx.intermediate_results.contains_key("scan_all_2"));
    }

    #[test]
    fn failed_steps_store_no_intermediate_result() {
        let mut ctx = ExecutionContext::new("req");
        ctx.add_step("s1", err_result("read_memory"));
        assert!(ctx.intermediate_results.is_empty());
    }

    #[test]
    fn terminal_states_absorb() {
        let mut ctx = ExecutionContext::new("req");
        ctx.update_state(TaskState::Running);
        ctx.update_state(TaskState::Completed);
        ctx.update_state(TaskState::Running);
        assert_eq!(ctx.state, TaskState::Completed);

        let mut failed = ExecutionContext::new("req");
        failed.update_state(TaskState::Failed);
        failed.update_state(TaskState::Completed);
        assert_eq!(failed.state, TaskState::Failed);
    }

    #[test]
    fn plan_rejects_forward_dependency() {
        let p = plan(vec![
            Subtask::new("a", "first", vec![]).with_dependencies(vec!["b".to_string()]),
            Subtask::new("b", "second", vec![]),
        ]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn plan_rejects_self_dependency() {
        let p = plan(vec![
            Subtask::new("a", "first", vec![]).with_dependencies(vec!["a".to_string()]),
        ]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn plan_rejects_zero_estimate() {
        let mut p = plan(vec![Subtask::new("a", "first", vec![])]);
        p.estimated_steps = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn plan_accepts_backward_dependencies() {
        let p = plan(vec![
            Subtask::new("a", "first", vec![]),
            Subtask::new("b", "second", vec![]).with_dependencies(vec!["a".to_string()]),
        ]);
        assert!(p.validate().is_ok());
    }
}
