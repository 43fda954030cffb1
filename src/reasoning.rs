//! Reasoning engine: result analysis, state evaluation, and decisions.
//!
//! Every entry point works without an LLM. When a client is configured the
//! engine asks it first and falls back to the deterministic rules on any
//! failure, so a dead backend degrades quality but never availability.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{ExecutionContext, ExecutionPlan, Subtask, TaskState};
use crate::error::AgentError;
use crate::llm::{extract_json, ChatMessage, LlmClient};
use crate::tool::ToolResult;

/// A single observation extracted from a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Interpretation of one tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub success: bool,
    pub findings: Vec<Finding>,
    pub conclusions: Vec<String>,
    pub next_steps: Vec<String>,
    pub confidence: f64,
}

/// Snapshot judgment of where the task stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvaluation {
    pub current_state: TaskState,
    /// Successful steps over estimated steps, clamped to 1.0.
    pub progress: f64,
    /// True when the last five steps all failed.
    pub stuck: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// What the agent should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Continue,
    Adjust,
    Recover,
    Finalize,
    Abort,
}

impl DecisionAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "continue" => Some(Self::Continue),
            "adjust" => Some(Self::Adjust),
            "recover" => Some(Self::Recover),
            "finalize" => Some(Self::Finalize),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub reason: String,
    pub confidence: f64,
    pub next_steps: Vec<String>,
}

/// Classified response to a raised error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    Retry,
    Reconnect,
    SwitchApproach,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: RecoveryKind,
    pub reason: String,
    /// Tools worth trying instead, drawn from the failing subtask.
    pub alternative_tools: Vec<String>,
    pub retry: bool,
}

/// The reasoning engine. Cheap to clone; holds only the optional LLM handle.
#[derive(Clone, Default)]
pub struct ReasoningEngine {
    llm: Option<Arc<dyn LlmClient>>,
}

impl ReasoningEngine {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// Asks the LLM and parses its answer; `None` on any failure, which
    /// callers treat as "use the rules instead". This is the only LLM entry
    /// point in the engine.
    async fn ask_llm<T>(
        &self,
        label: &str,
        messages: Vec<ChatMessage>,
        parse: impl Fn(Value) -> Option<T>,
    ) -> Option<T> {
        let llm = self.llm.as_ref()?;
        match llm.chat(messages).await {
            Ok(response) => match extract_json(&response.content).ok().and_then(parse) {
                Some(value) => {
                    debug!(label, "using LLM result");
                    Some(value)
                }
                None => {
                    warn!(label, "LLM answer unparseable, falling back to rules");
                    None
                }
            },
            Err(e) => {
                warn!(label, error = %e, "LLM request failed, falling back to rules");
                None
            }
        }
    }

    /// Interprets one tool result in the context of its subtask.
    pub async fn analyze_result(
        &self,
        result: &ToolResult,
        subtask: &Subtask,
        context: &ExecutionContext,
    ) -> Analysis {
        let messages = vec![
            ChatMessage::system(
                "You analyze memory-analysis tool results. Reply with a JSON object: \
                 {\"findings\": [string], \"conclusions\": [string], \
                 \"next_steps\": [string], \"confidence\": number}",
            ),
            ChatMessage::user(format!(
                "Request: {}\nSubtask: {}\nTool: {}\nSuccess: {}\nOutput: {}\nError: {}",
                context.request,
                subtask.description,
                result.tool_name,
                result.success,
                result.result.as_ref().map(Value::to_string).unwrap_or_default(),
                result.error.as_deref().unwrap_or("none"),
            )),
        ];

        let success = result.success;
        if let Some(analysis) = self
            .ask_llm("analyze_result", messages, |value| {
                parse_analysis(value, success)
            })
            .await
        {
            return analysis;
        }

        self.analyze_with_rules(result, subtask, context)
    }

    fn analyze_with_rules(
        &self,
        result: &ToolResult,
        subtask: &Subtask,
        context: &ExecutionContext,
    ) -> Analysis {
        if result.success {
            let next_step = if subtask_complete(subtask, context) {
                format!("Subtask '{}' complete, move on", subtask.id)
            } else {
                format!("Continue subtask '{}'", subtask.id)
            };
            Analysis {
                success: true,
                findings: vec![Finding {
                    kind: "success".to_string(),
                    message: format!("Tool '{}' executed successfully", result.tool_name),
                    data: result.result.clone(),
                }],
                conclusions: vec![format!("Subtask '{}' partially complete", subtask.id)],
                next_steps: vec![next_step],
                confidence: 0.8,
            }
        } else {
            Analysis {
                success: false,
                findings: vec![Finding {
                    kind: "error".to_string(),
                    message: format!(
                        "Tool '{}' failed: {}",
                        result.tool_name,
                        result.error.as_deref().unwrap_or("unknown error")
                    ),
                    data: None,
                }],
                conclusions: vec!["Tool execution failed, approach needs adjustment".to_string()],
                next_steps: vec!["Attempt recovery or an alternative approach".to_string()],
                confidence: 0.3,
            }
        }
    }

    /// Judges progress and health from the execution history. Deterministic.
    pub fn evaluate_state(
        &self,
        context: &ExecutionContext,
        plan: &ExecutionPlan,
    ) -> StateEvaluation {
        let successes = context.successful_steps() as f64;
        let progress = (successes / plan.estimated_steps.max(1) as f64).min(1.0);

        let mut issues: Vec<String> = context
            .history
            .iter()
            .filter(|s| !s.result.success)
            .rev()
            .take(3)
            .map(|s| {
                format!(
                    "Recent error in step {}: {}",
                    s.step_id,
                    s.result.error.as_deref().unwrap_or("unknown")
                )
            })
            .collect();
        issues.reverse();

        let last_five = context.history.iter().rev().take(5);
        let stuck =
            context.history.len() >= 5 && last_five.clone().all(|s| !s.result.success);
        if stuck {
            issues.push("Stuck in an error loop".to_string());
        }

        let recommendations = if progress >= 1.0 {
            vec!["Task appears complete, finalize results".to_string()]
        } else if !issues.is_empty() {
            vec!["Address identified issues before proceeding".to_string()]
        } else {
            vec!["Continue with planned execution".to_string()]
        };

        StateEvaluation {
            current_state: context.state,
            progress,
            stuck,
            issues,
            recommendations,
        }
    }

    /// Chooses the next action. Terminal states dominate, then the error
    /// loop, then lesser issues, then progress.
    pub async fn make_decision(
        &self,
        evaluation: &StateEvaluation,
        context: &ExecutionContext,
    ) -> Decision {
        let messages = vec![
            ChatMessage::system(
                "You steer a memory-analysis agent. Reply with a JSON object: \
                 {\"action\": \"continue|adjust|recover|finalize|abort\", \
                 \"reason\": string, \"confidence\": number, \"next_steps\": [string]}",
            ),
            ChatMessage::user(format!(
                "Request: {}\nState: {:?}\nProgress: {:.2}\nStuck: {}\nIssues: {:?}",
                context.request,
                evaluation.current_state,
                evaluation.progress,
                evaluation.stuck,
                evaluation.issues,
            )),
        ];

        if let Some(decision) = self.ask_llm("make_decision", messages, parse_decision).await {
            info!(action = ?decision.action, confidence = decision.confidence, "LLM decision");
            return decision;
        }

        let decision = self.decide_with_rules(evaluation);
        info!(action = ?decision.action, confidence = decision.confidence, "rule decision");
        decision
    }

    fn decide_with_rules(&self, evaluation: &StateEvaluation) -> Decision {
        let has_issues = !evaluation.issues.is_empty();

        let (action, reason, confidence, next_steps) = match evaluation.current_state {
            TaskState::Completed => (
                DecisionAction::Finalize,
                "Task has been marked as completed".to_string(),
                evaluation.progress,
                vec!["Generate final report".to_string()],
            ),
            TaskState::Failed => (
                DecisionAction::Abort,
                "Task has been marked as failed".to_string(),
                evaluation.progress,
                vec!["Abort execution and report the error".to_string()],
            ),
            _ if evaluation.stuck => (
                DecisionAction::Recover,
                "Detected an error loop, attempting recovery".to_string(),
                // Fixed value: recovery confidence does not track progress.
                0.5,
                vec!["Try alternative tools or approaches".to_string()],
            ),
            _ if has_issues => (
                DecisionAction::Adjust,
                "Issues detected, the plan needs adjustment".to_string(),
                0.7,
                evaluation.recommendations.clone(),
            ),
            _ if evaluation.progress >= 1.0 => (
                DecisionAction::Finalize,
                "Estimated steps completed".to_string(),
                evaluation.progress,
                vec!["Generate final report".to_string()],
            ),
            _ => (
                DecisionAction::Continue,
                "No major issues detected, continue with the plan".to_string(),
                evaluation.progress,
                vec!["Execute the next planned step".to_string()],
            ),
        };

        // Issues dampen confidence; only the fixed recover value is exempt.
        let confidence = if has_issues && !matches!(action, DecisionAction::Recover) {
            confidence * 0.7
        } else {
            confidence
        };

        Decision {
            action,
            reason,
            confidence,
            next_steps,
        }
    }

    /// Applies a decision to the context. Finalize and abort transition the
    /// task; adjust and recover only advise the orchestrator.
    pub fn adjust_plan(&self, decision: &Decision, context: &mut ExecutionContext) {
        match decision.action {
            DecisionAction::Finalize => context.update_state(TaskState::Completed),
            DecisionAction::Abort => context.update_state(TaskState::Failed),
            DecisionAction::Recover => {
                info!("recovery advised, orchestrator will vary tools");
            }
            DecisionAction::Adjust => {
                info!(reason = %decision.reason, "plan adjustment advised");
            }
            DecisionAction::Continue => {}
        }
    }

    /// Classifies an error into a recovery action by its message.
    pub fn recover_from_error(
        &self,
        error: &AgentError,
        subtask: Option<&Subtask>,
    ) -> RecoveryAction {
        let text = error.to_string().to_lowercase();
        let alternatives = || {
            subtask
                .map(|s| s.tools.clone())
                .unwrap_or_default()
        };

        if text.contains("timeout") {
            RecoveryAction {
                kind: RecoveryKind::Retry,
                reason: "Timeout occurred, retrying with a longer deadline".to_string(),
                alternative_tools: Vec::new(),
                retry: true,
            }
        } else if text.contains("connection") || text.contains("pipe") {
            RecoveryAction {
                kind: RecoveryKind::Reconnect,
                reason: "Connection issue detected, reconnecting".to_string(),
                alternative_tools: Vec::new(),
                retry: true,
            }
        } else if text.contains("access denied") || text.contains("permission") {
            RecoveryAction {
                kind: RecoveryKind::SwitchApproach,
                reason: "Permission denied, trying an alternative approach".to_string(),
                alternative_tools: alternatives(),
                retry: false,
            }
        } else {
            RecoveryAction {
                kind: RecoveryKind::SwitchApproach,
                reason: format!("Unclassified error, trying an alternative approach: {text}"),
                alternative_tools: alternatives(),
                retry: false,
            }
        }
    }
}

/// A subtask counts as complete once at least half of its declared tools
/// (and at least one) have each succeeded in some step.
pub fn subtask_complete(subtask: &Subtask, context: &ExecutionContext) -> bool {
    let mut used: Vec<&str> = context
        .history
        .iter()
        .filter(|s| s.result.success)
        .map(|s| s.result.tool_name.as_str())
        .filter(|name| subtask.tools.iter().any(|t| t == name))
        .collect();
    used.sort_unstable();
    used.dedup();
    used.len() >= (subtask.tools.len() / 2).max(1)
}

fn parse_analysis(value: Value, success: bool) -> Option<Analysis> {
    let strings = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    let confidence = value.get("confidence")?.as_f64()?;
    Some(Analysis {
        success,
        findings: strings("findings")
            .into_iter()
            .map(|message| Finding {
                kind: if success { "success" } else { "error" }.to_string(),
                message,
                data: None,
            })
            .collect(),
        conclusions: strings("conclusions"),
        next_steps: strings("next_steps"),
        confidence: confidence.clamp(0.0, 1.0),
    })
}

fn parse_decision(value: Value) -> Option<Decision> {
    let action = DecisionAction::parse(value.get("action")?.as_str()?)?;
    let confidence = value.get("confidence")?.as_f64()?.clamp(0.0, 1.0);
    Some(Decision {
        action,
        reason: value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("LLM decision")
            .to_string(),
        confidence,
        next_steps: value
            .get("next_steps")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    fn engine() -> ReasoningEngine {
        ReasoningEngine::new(None)
    }

    fn plan(estimated_steps: u64) -> ExecutionPlan {
        ExecutionPlan {
            task_type: "scan".to_string(),
            subtasks: vec![Subtask::new(
                "s1",
                "scan for value",
                vec!["scan_all".to_string(), "get_scan_results".to_string()],
            )],
            estimated_steps,
        }
    }

    fn ok(tool: &str) -> ToolResult {
        ToolResult::ok(tool, HashMap::new(), json!({"ok": true}), 0.01)
    }

    fn fail(tool: &str, error: &str) -> ToolResult {
        ToolResult::err(tool, HashMap::new(), error, 0.01)
    }

    fn context_with(results: Vec<ToolResult>) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("find health value");
        ctx.update_state(TaskState::Running);
        for r in results {
            ctx.add_step("s1", r);
        }
        ctx
    }

    #[tokio::test]
    async fn failed_result_analyzes_at_low_confidence() {
        let ctx = context_with(vec![]);
        let subtask = plan(3).subtasks[0].clone();
        let analysis = engine()
            .analyze_result(&fail("scan_all", "boom"), &subtask, &ctx)
            .await;

        assert!(!analysis.success);
        assert_eq!(analysis.confidence, 0.3);
        assert_eq!(analysis.findings[0].kind, "error");
    }

    #[tokio::test]
    async fn successful_result_reports_subtask_progress() {
        let ctx = context_with(vec![ok("scan_all")]);
        let subtask = plan(3).subtasks[0].clone();
        let analysis = engine()
            .analyze_result(&ok("scan_all"), &subtask, &ctx)
            .await;

        assert!(analysis.success);
        assert_eq!(analysis.confidence, 0.8);
        assert!(analysis.next_steps[0].contains("complete"));
    }

    #[test]
    fn subtask_needs_half_of_declared_tools() {
        let subtask = Subtask::new(
            "s1",
            "scan",
            vec![
                "scan_all".to_string(),
                "get_scan_results".to_string(),
                "read_memory".to_string(),
                "aob_scan".to_string(),
            ],
        );

        let one = context_with(vec![ok("scan_all")]);
        assert!(!subtask_complete(&subtask, &one));

        let two = context_with(vec![ok("scan_all"), ok("read_memory")]);
        assert!(subtask_complete(&subtask, &two));

        // Repeats of one tool do not count twice.
        let repeats = context_with(vec![ok("scan_all"), ok("scan_all"), ok("scan_all")]);
        assert!(!subtask_complete(&subtask, &repeats));
    }

    #[test]
    fn progress_is_clamped() {
        let ctx = context_with(vec![ok("a"), ok("b"), ok("c")]);
        let eval = engine().evaluate_state(&ctx, &plan(2));
        assert_eq!(eval.progress, 1.0);
    }

    #[test]
    fn five_straight_failures_mean_stuck() {
        let four = context_with(vec![
            fail("t", "e"),
            fail("t", "e"),
            fail("t", "e"),
            fail("t", "e"),
        ]);
        assert!(!engine().evaluate_state(&four, &plan(10)).stuck);

        let five = context_with(vec![
            fail("t", "e"),
            fail("t", "e"),
            fail("t", "e"),
            fail("t", "e"),
            fail("t", "e"),
        ]);
        let eval = engine().evaluate_state(&five, &plan(10));
        assert!(eval.stuck);
        // Three recent-failure issues plus the loop issue.
        assert_eq!(eval.issues.len(), 4);
    }

    #[test]
    fn one_success_in_window_clears_stuck() {
        let ctx = context_with(vec![
            fail("t", "e"),
            fail("t", "e"),
            ok("t"),
            fail("t", "e"),
            fail("t", "e"),
        ]);
        assert!(!engine().evaluate_state(&ctx, &plan(10)).stuck);
    }

    #[tokio::test]
    async fn decision_table_priorities() {
        let e = engine();
        let base = StateEvaluation {
            current_state: TaskState::Running,
            progress: 0.4,
            stuck: false,
            issues: Vec::new(),
            recommendations: Vec::new(),
        };
        let ctx = context_with(vec![]);

        let completed = StateEvaluation {
            current_state: TaskState::Completed,
            ..base.clone()
        };
        assert_eq!(e.make_decision(&completed, &ctx).await.action, DecisionAction::Finalize);

        let failed = StateEvaluation {
            current_state: TaskState::Failed,
            ..base.clone()
        };
        assert_eq!(e.make_decision(&failed, &ctx).await.action, DecisionAction::Abort);

        let stuck = StateEvaluation {
            stuck: true,
            issues: vec!["loop".to_string()],
            ..base.clone()
        };
        let d = e.make_decision(&stuck, &ctx).await;
        assert_eq!(d.action, DecisionAction::Recover);
        assert_eq!(d.confidence, 0.5);

        let issues = StateEvaluation {
            issues: vec!["an error".to_string()],
            ..base.clone()
        };
        let d = e.make_decision(&issues, &ctx).await;
        assert_eq!(d.action, DecisionAction::Adjust);
        // 0.7 base dampened by the issue multiplier.
        assert!((d.confidence - 0.49).abs() < 1e-9);

        let done = StateEvaluation {
            progress: 1.0,
            ..base.clone()
        };
        assert_eq!(e.make_decision(&done, &ctx).await.action, DecisionAction::Finalize);

        let d = e.make_decision(&base, &ctx).await;
        assert_eq!(d.action, DecisionAction::Continue);
        assert!((d.confidence - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn issues_dampen_progress_confidence_for_terminal_actions() {
        // Completed state with lingering issues: finalize at progress * 0.7.
        let eval = StateEvaluation {
            current_state: TaskState::Completed,
            progress: 1.0,
            stuck: false,
            issues: vec!["late error".to_string()],
            recommendations: Vec::new(),
        };
        let d = engine().make_decision(&eval, &context_with(vec![])).await;
        assert_eq!(d.action, DecisionAction::Finalize);
        assert!((d.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn adjust_plan_applies_terminal_transitions() {
        let e = engine();
        let mut ctx = context_with(vec![]);

        e.adjust_plan(
            &Decision {
                action: DecisionAction::Finalize,
                reason: String::new(),
                confidence: 1.0,
                next_steps: Vec::new(),
            },
            &mut ctx,
        );
        assert_eq!(ctx.state, TaskState::Completed);

        // Terminal states absorb later aborts.
        e.adjust_plan(
            &Decision {
                action: DecisionAction::Abort,
                reason: String::new(),
                confidence: 1.0,
                next_steps: Vec::new(),
            },
            &mut ctx,
        );
        assert_eq!(ctx.state, TaskState::Completed);
    }

    #[test]
    fn error_classification_by_message() {
        let e = engine();
        let subtask = Subtask::new("s1", "scan", vec!["scan_all".to_string()]);

        let r = e.recover_from_error(&AgentError::Timeout("deadline".to_string()), None);
        assert_eq!(r.kind, RecoveryKind::Retry);
        assert!(r.retry);

        let r = e.recover_from_error(
            &AgentError::Connection("pipe broke".to_string()),
            Some(&subtask),
        );
        assert_eq!(r.kind, RecoveryKind::Reconnect);
        assert!(r.alternative_tools.is_empty());

        let r = e.recover_from_error(
            &AgentError::PermissionDenied("access denied".to_string()),
            Some(&subtask),
        );
        assert_eq!(r.kind, RecoveryKind::SwitchApproach);
        assert_eq!(r.alternative_tools, vec!["scan_all"]);

        let r = e.recover_from_error(&AgentError::Command("weird".to_string()), Some(&subtask));
        assert_eq!(r.kind, RecoveryKind::SwitchApproach);
        assert!(!r.retry);
    }

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatResponse, AgentError> {
            Ok(ChatResponse {
                content: self.0.clone(),
                usage: Default::default(),
            })
        }
    }

    struct DeadLlm;

    #[async_trait]
    impl LlmClient for DeadLlm {
        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatResponse, AgentError> {
            Err(AgentError::Llm("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn llm_decision_wins_when_parseable() {
        let e = ReasoningEngine::new(Some(Arc::new(CannedLlm(
            r#"{"action": "finalize", "reason": "done", "confidence": 0.9, "next_steps": []}"#
                .to_string(),
        ))));
        let eval = StateEvaluation {
            current_state: TaskState::Running,
            progress: 0.1,
            stuck: false,
            issues: Vec::new(),
            recommendations: Vec::new(),
        };

        let d = e.make_decision(&eval, &context_with(vec![])).await;
        assert_eq!(d.action, DecisionAction::Finalize);
        assert_eq!(d.reason, "done");
    }

    #[tokio::test]
    async fn dead_llm_falls_back_to_rules() {
        let e = ReasoningEngine::new(Some(Arc::new(DeadLlm)));
        let eval = StateEvaluation {
            current_state: TaskState::Running,
            progress: 0.1,
            stuck: false,
            issues: Vec::new(),
            recommendations: Vec::new(),
        };

        let d = e.make_decision(&eval, &context_with(vec![])).await;
        assert_eq!(d.action, DecisionAction::Continue);
    }

    #[tokio::test]
    async fn gibberish_llm_answer_falls_back_to_rules() {
        let e = ReasoningEngine::new(Some(Arc::new(CannedLlm(
            "I would simply find the pointer.".to_string(),
        ))));
        let eval = StateEvaluation {
            current_state: TaskState::Running,
            progress: 0.1,
            stuck: false,
            issues: Vec::new(),
            recommendations: Vec::new(),
        };

        let d = e.make_decision(&eval, &context_with(vec![])).await;
        assert_eq!(d.action, DecisionAction::Continue);
    }
}
