//! Final report assembly from the execution history.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::context::{AnalysisReport, ExecutionContext, TaskState};

/// Builds the final report for a finished (or abandoned) task.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, context: &ExecutionContext) -> AnalysisReport;
}

/// Deterministic synthesizer over history statistics and stored results.
#[derive(Debug, Clone, Default)]
pub struct ReportSynthesizer;

#[async_trait]
impl Synthesizer for ReportSynthesizer {
    async fn synthesize(&self, context: &ExecutionContext) -> AnalysisReport {
        let executed = context.history.len();
        let failed = context.failed_steps();
        let succeeded = executed - failed;

        let success = match context.state {
            TaskState::Completed => true,
            TaskState::Failed => false,
            // A task that ran out of plan without a terminal transition
            // counts as successful when anything useful happened.
            _ => succeeded > 0,
        };

        let summary = if success {
            format!(
                "Completed '{}': {succeeded} of {executed} steps succeeded",
                context.request
            )
        } else {
            format!(
                "Could not complete '{}': {failed} of {executed} steps failed",
                context.request
            )
        };

        let mut keys: Vec<_> = context.intermediate_results.keys().collect();
        keys.sort();
        let insights = keys
            .into_iter()
            .map(|key| format!("{key}: {}", context.intermediate_results[key]))
            .collect();

        let recommendations = if failed > 0 {
            vec!["Re-run the failed steps with adjusted arguments".to_string()]
        } else {
            Vec::new()
        };

        let error = (!success)
            .then(|| {
                context
                    .history
                    .iter()
                    .rev()
                    .find_map(|s| s.result.error.clone())
            })
            .flatten();

        debug!(task_id = %context.task_id, success, executed, failed, "report synthesized");

        AnalysisReport {
            task_id: context.task_id,
            request: context.request.clone(),
            success,
            summary,
            details: context.intermediate_results.clone(),
            insights,
            recommendations,
            steps_executed: executed,
            steps_failed: failed,
            duration_secs: (Utc::now() - context.started_at).as_seconds_f64(),
            error,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolResult;
    use serde_json::json;
    use std::collections::HashMap;

    fn context(results: Vec<ToolResult>, state: TaskState) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("find health");
        ctx.update_state(TaskState::Running);
        for r in results {
            ctx.add_step("s1", r);
        }
        ctx.update_state(state);
        ctx
    }

    #[tokio::test]
    async fn completed_task_reports_success() {
        let ctx = context(
            vec![ToolResult::ok("scan_all", HashMap::new(), json!({"hits": 3}), 0.1)],
            TaskState::Completed,
        );
        let report = ReportSynthesizer.synthesize(&ctx).await;

        assert!(report.success);
        assert_eq!(report.steps_executed, 1);
        assert_eq!(report.steps_failed, 0);
        assert_eq!(report.details["scan_all_1"], json!({"hits": 3}));
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn failed_task_reports_failure_with_counts() {
        let ctx = context(
            vec![
                ToolResult::ok("scan_all", HashMap::new(), json!({}), 0.1),
                ToolResult::err("read_memory", HashMap::new(), "bad address", 0.1),
            ],
            TaskState::Failed,
        );
        let report = ReportSynthesizer.synthesize(&ctx).await;

        assert!(!report.success);
        assert_eq!(report.steps_executed, 2);
        assert_eq!(report.steps_failed, 1);
        assert_eq!(report.error.as_deref(), Some("bad address"));
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn running_task_with_progress_counts_as_success() {
        let ctx = context(
            vec![ToolResult::ok("ping", HashMap::new(), json!("pong"), 0.01)],
            TaskState::Running,
        );
        assert!(ReportSynthesizer.synthesize(&ctx).await.success);
    }

    #[tokio::test]
    async fn insights_are_sorted_by_source_key() {
        let ctx = context(
            vec![
                ToolResult::ok("scan_all", HashMap::new(), json!(1), 0.1),
                ToolResult::ok("aob_scan", HashMap::new(), json!(2), 0.1),
            ],
            TaskState::Completed,
        );
        let report = ReportSynthesizer.synthesize(&ctx).await;
        assert!(report.insights[0].starts_with("aob_scan_2:"));
        assert!(report.insights[1].starts_with("scan_all_1:"));
    }
}
