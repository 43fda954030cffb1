//! The agent orchestrator: plan, execute, reason, report.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::args::determine_tool_args;
use crate::context::{AnalysisReport, ExecutionContext, ExecutionPlan, Subtask, TaskState};
use crate::planner::Planner;
use crate::reasoning::{DecisionAction, ReasoningEngine};
use crate::synthesizer::Synthesizer;
use crate::tool::{ToolCall, ToolExecutor};

/// Pause between consecutive tool calls.
const TOOL_PAUSE: Duration = Duration::from_millis(100);
/// How long one queue receive waits before re-checking for shutdown.
const QUEUE_RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// Idle sleep between main-loop iterations.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Coarse agent lifecycle, readable from other tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Stopped,
    Running,
    Error,
}

/// Progress notifications for a frontend.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Step { message: String },
    ToolCall { tool: String, success: bool },
    Decision { action: DecisionAction, confidence: f64 },
    Error { message: String },
}

/// Callback invoked for every [`AgentEvent`].
pub type EventCallback = Arc<dyn Fn(AgentEvent) + Send + Sync>;

/// The main agent, wiring planner, executor, reasoner, and synthesizer.
pub struct Agent {
    planner: Arc<dyn Planner>,
    synthesizer: Arc<dyn Synthesizer>,
    reasoning: ReasoningEngine,
    executor: ToolExecutor,
    status: RwLock<AgentStatus>,
    cancel: CancellationToken,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    callback: Option<EventCallback>,
}

impl Agent {
    pub fn new(
        planner: Arc<dyn Planner>,
        synthesizer: Arc<dyn Synthesizer>,
        reasoning: ReasoningEngine,
        executor: ToolExecutor,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            planner,
            synthesizer,
            reasoning,
            executor,
            status: RwLock::new(AgentStatus::Stopped),
            cancel: CancellationToken::new(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: EventCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read().expect("status lock")
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.write().expect("status lock") = status;
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// Token that callers can use to stop the agent cooperatively.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Name and description of every registered tool, sorted by name.
    pub fn tool_listing(&self) -> Vec<(String, String)> {
        self.executor
            .registry()
            .list()
            .into_iter()
            .map(|m| (m.name.clone(), m.description.clone()))
            .collect()
    }

    /// Runs one request from planning to report. Failures of any stage come
    /// back as a failed report, never as a panic or an `Err`.
    pub async fn execute(&self, request: &str) -> AnalysisReport {
        info!(request, "executing request");
        self.emit(AgentEvent::Step {
            message: format!("Executing request: {request}"),
        });
        self.set_status(AgentStatus::Running);

        let mut context = ExecutionContext::new(request);

        let report = match self.run_to_report(&mut context).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "request execution failed");
                self.emit(AgentEvent::Error {
                    message: e.to_string(),
                });
                self.set_status(AgentStatus::Error);
                context.update_state(TaskState::Failed);
                AnalysisReport::failure(&context, format!("Execution failed: {e}"))
            }
        };

        if self.status() != AgentStatus::Error {
            self.set_status(AgentStatus::Stopped);
        }
        report
    }

    async fn run_to_report(
        &self,
        context: &mut ExecutionContext,
    ) -> Result<AnalysisReport, crate::error::AgentError> {
        self.emit(AgentEvent::Step {
            message: "Planning task".to_string(),
        });
        let plan = self.planner.plan(&context.request).await?;
        plan.validate()?;
        info!(
            task_type = %plan.task_type,
            subtasks = plan.subtasks.len(),
            "plan ready"
        );

        context.update_state(TaskState::Running);
        self.execute_plan(&plan, context).await;

        self.emit(AgentEvent::Step {
            message: "Synthesizing report".to_string(),
        });
        Ok(self.synthesizer.synthesize(context).await)
    }

    /// Walks the plan subtask by subtask. Returns early on cancellation or
    /// an abort decision; everything else runs to the end of the plan.
    async fn execute_plan(&self, plan: &ExecutionPlan, context: &mut ExecutionContext) {
        for subtask in &plan.subtasks {
            info!(subtask = %subtask.id, "executing subtask");

            if !dependencies_satisfied(subtask, plan, context) {
                warn!(
                    subtask = %subtask.id,
                    "dependencies not satisfied, skipping subtask"
                );
                continue;
            }

            for tool_name in &subtask.tools {
                if self.cancel.is_cancelled() {
                    info!("cancellation requested, terminating execution");
                    return;
                }

                let Some(tool) = self.executor.registry().get(tool_name) else {
                    warn!(tool = %tool_name, "planned tool is not registered, skipping");
                    continue;
                };
                let metadata = tool.metadata.clone();

                let args = determine_tool_args(&metadata, context);
                let call = ToolCall::new(tool_name.clone(), args);

                debug!(tool = %tool_name, "executing tool");
                let result = self.executor.execute(&call).await;
                self.emit(AgentEvent::ToolCall {
                    tool: tool_name.clone(),
                    success: result.success,
                });

                let step_id = context.add_step(&subtask.id, result.clone());
                debug!(step_id, success = result.success, "step recorded");

                let analysis = self.reasoning.analyze_result(&result, subtask, context).await;
                debug!(
                    confidence = analysis.confidence,
                    findings = analysis.findings.len(),
                    "result analyzed"
                );

                let evaluation = self.reasoning.evaluate_state(context, plan);
                let decision = self.reasoning.make_decision(&evaluation, context).await;
                self.emit(AgentEvent::Decision {
                    action: decision.action,
                    confidence: decision.confidence,
                });

                self.reasoning.adjust_plan(&decision, context);

                if decision.action == DecisionAction::Abort {
                    warn!(reason = %decision.reason, "aborting plan");
                    context.update_state(TaskState::Failed);
                    return;
                }

                tokio::time::sleep(TOOL_PAUSE).await;
            }
        }
    }

    /// Queues a request for the main loop.
    pub fn submit_task(&self, request: impl Into<String>) {
        let request = request.into();
        info!(request = %request, "task queued");
        // Send fails only after the receiver is dropped, i.e. at shutdown.
        let _ = self.queue_tx.send(request);
    }

    /// Processes queued tasks until stopped.
    pub async fn run(&self) {
        info!("agent main loop started");
        self.set_status(AgentStatus::Running);

        let mut rx = self.queue_rx.lock().await;
        while !self.cancel.is_cancelled() {
            match tokio::time::timeout(QUEUE_RECV_TIMEOUT, rx.recv()).await {
                Ok(Some(request)) => {
                    debug!(request = %request, "processing queued task");
                    self.execute(&request).await;
                }
                Ok(None) => break,
                Err(_) => {}
            }
            tokio::time::sleep(IDLE_SLEEP).await;
        }

        self.set_status(AgentStatus::Stopped);
        info!("agent main loop stopped");
    }

    /// Requests a graceful stop.
    pub fn stop(&self) {
        info!("stopping agent");
        self.cancel.cancel();
        self.set_status(AgentStatus::Stopped);
    }
}

/// A dependency is satisfied when some successful step used one of the
/// dependency subtask's tools.
fn dependencies_satisfied(
    subtask: &Subtask,
    plan: &ExecutionPlan,
    context: &ExecutionContext,
) -> bool {
    subtask.dependencies.iter().all(|dep_id| {
        let Some(dep) = plan.subtasks.iter().find(|s| &s.id == dep_id) else {
            return false;
        };
        context
            .history
            .iter()
            .any(|step| step.result.success && dep.tools.contains(&step.result.tool_name))
    })
}
