//! Task router: owns the task state machine.
//!
//! ```text
//! PENDING -> PLANNING -> EXECUTING(step 0..N) -> COMPLETED
//!    \__________\______________\_____________-> FAILED
//! ```
//!
//! Every reply on `queue_results` goes through [`Router::handle_agent_response`],
//! one at a time. Steps of a task run strictly in sequence: step `i + 1` is only
//! dispatched once step `i` has replied. Terminal tasks are deleted from the
//! task store right after their final result is written.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::PLANNER_ROLE;
use crate::channel::{self, Channel, RESULTS_CHANNEL};
use crate::error::{OrchestratorError, Result};
use crate::metrics::Metrics;
use crate::models::{
    AgentReply, PlanningRequest, ReplyStatus, Step, StepRequest, Task, TaskSnapshot, TaskStatus,
    NO_DESCRIPTION,
};
use crate::store::{ResultStore, TaskStore};
use crate::worker::PollSettings;

/// Every failure result starts with this.
pub const FAILURE_PREFIX: &str = "ERROR:";
const UNKNOWN_AGENT_ERROR: &str = "Unknown agent error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Dispatched { step: u32, role: String },
    Completed,
    Failed,
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownTask,
    /// A plan arrived for a task that is no longer waiting for one.
    NotPlanning(TaskStatus),
    /// A worker reply arrived before the plan was applied.
    NotExecuting(TaskStatus),
    StaleStep { expected: u32, got: u32 },
    UnexpectedOrigin { expected: String, got: String },
}

#[derive(Clone)]
pub struct Router {
    channel: Arc<dyn Channel>,
    tasks: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    metrics: Arc<Metrics>,
    worker_roles: Arc<[String]>,
}

impl Router {
    pub fn new(
        channel: Arc<dyn Channel>,
        tasks: Arc<dyn TaskStore>,
        results: Arc<dyn ResultStore>,
        metrics: Arc<Metrics>,
        worker_roles: &[String],
    ) -> Self {
        Self {
            channel,
            tasks,
            results,
            metrics,
            worker_roles: worker_roles.into(),
        }
    }

    /// Registers the task and hands it to the planner. Returns once the
    /// planning request is queued; never waits for the pipeline.
    pub async fn start_task(&self, task_id: &str, user_input: &str) -> Result<()> {
        if self.results.get_final(task_id).await?.is_some() {
            return Err(OrchestratorError::DuplicateTask(task_id.to_string()));
        }

        let mut task = Task::new(task_id, user_input);
        if !self.tasks.insert_new(&task).await? {
            return Err(OrchestratorError::DuplicateTask(task_id.to_string()));
        }

        // PLANNING is persisted before the request goes out, so the plan can
        // never arrive for a task still marked PENDING.
        task.begin_planning()?;
        self.tasks.save(&task).await?;

        let request = PlanningRequest {
            task_id: task_id.to_string(),
            user_input: user_input.to_string(),
        };
        let planner_queue = channel::request_channel(PLANNER_ROLE);
        if let Err(e) = channel::publish(self.channel.as_ref(), &planner_queue, &request).await {
            self.tasks.remove(task_id).await?;
            return Err(e);
        }

        self.metrics.tasks_submitted.inc();
        info!(task_id, "Task sent to Planner");
        Ok(())
    }

    pub async fn handle_agent_response(&self, reply: AgentReply) -> Result<Outcome> {
        let Some(task) = self.tasks.load(&reply.task_id).await? else {
            return Ok(self.drop_reply(&reply, DropReason::UnknownTask));
        };

        if reply.status == ReplyStatus::Failed {
            let error = reply.error.as_deref().unwrap_or(UNKNOWN_AGENT_ERROR);
            warn!(task_id = %reply.task_id, origin = %reply.origin, error, "Task FAILED at agent");
            let output = format!(
                "{FAILURE_PREFIX} system failed at {}. Details: {}",
                reply.origin, error
            );
            return self.finalize(task, TaskStatus::Failed, output).await;
        }

        if reply.origin == PLANNER_ROLE {
            return self.apply_plan(task, &reply).await;
        }

        let mut task = task;
        if task.status != TaskStatus::Executing {
            return Ok(self.drop_reply(&reply, DropReason::NotExecuting(task.status)));
        }
        let Some(current) = task.current_step() else {
            return Ok(self.drop_reply(&reply, DropReason::NotExecuting(task.status)));
        };
        if let Some(got) = reply.step {
            if got != current.step_number {
                let reason = DropReason::StaleStep {
                    expected: current.step_number,
                    got,
                };
                return Ok(self.drop_reply(&reply, reason));
            }
        }
        if reply.origin != current.agent_role {
            let reason = DropReason::UnexpectedOrigin {
                expected: current.agent_role.clone(),
                got: reply.origin.clone(),
            };
            return Ok(self.drop_reply(&reply, reason));
        }

        info!(task_id = %task.task_id, origin = %reply.origin, "Agent finished step");
        task.record_result(reply.payload_text())?;
        self.dispatch_next_step(task).await
    }

    async fn apply_plan(&self, mut task: Task, reply: &AgentReply) -> Result<Outcome> {
        if task.status != TaskStatus::Planning {
            return Ok(self.drop_reply(reply, DropReason::NotPlanning(task.status)));
        }

        match validate_plan(reply.data.as_ref(), &self.worker_roles) {
            Ok(steps) => {
                info!(task_id = %task.task_id, steps = steps.len(), "Plan accepted");
                task.apply_plan(steps)?;
                self.dispatch_next_step(task).await
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Planner sent invalid payload");
                let output = format!(
                    "{FAILURE_PREFIX} Planner failed to generate a valid task sequence. Details: {}",
                    invalid_plan_reason(&e)
                );
                self.finalize(task, TaskStatus::Failed, output).await
            }
        }
    }

    /// Sends the step under the cursor, or completes the task when none is left.
    pub async fn dispatch_next_step(&self, task: Task) -> Result<Outcome> {
        let Some(step) = task.current_step() else {
            let output = task.final_output();
            return self.finalize(task, TaskStatus::Completed, output).await;
        };

        let request = StepRequest {
            task_id: task.task_id.clone(),
            description: step.description.clone(),
            context: task.context(),
            step: Some(step.step_number),
        };
        let role = step.agent_role.clone();
        let step_number = step.step_number;

        self.tasks.save(&task).await?;
        let queue = channel::request_channel(&role);
        if let Err(e) = channel::publish(self.channel.as_ref(), &queue, &request).await {
            // The triggering reply is already consumed; nothing would retry this.
            error!(task_id = %task.task_id, role = %role, error = %e, "Step dispatch failed");
            let output = format!(
                "{FAILURE_PREFIX} system failed at router. Details: dispatch to {role} failed: {e}"
            );
            return self.finalize(task, TaskStatus::Failed, output).await;
        }

        self.metrics.steps_dispatched.inc();
        info!(
            task_id = %task.task_id,
            "Dispatched step {}/{} to {}",
            step_number,
            task.steps.len(),
            role
        );
        Ok(Outcome::Dispatched {
            step: step_number,
            role,
        })
    }

    async fn finalize(&self, mut task: Task, status: TaskStatus, output: String) -> Result<Outcome> {
        let outcome = match status {
            TaskStatus::Completed => {
                task.complete()?;
                Outcome::Completed
            }
            _ => {
                task.fail()?;
                Outcome::Failed
            }
        };

        // Result first, then retire: readers that miss the state find the result.
        if !self.results.put_final(&task.task_id, task.status, &output).await? {
            warn!(task_id = %task.task_id, "Final result already stored, keeping the first");
        }
        self.tasks.remove(&task.task_id).await?;

        self.metrics
            .record_finalized(&task.status.as_str().to_ascii_lowercase());
        info!(task_id = %task.task_id, status = %task.status, "Task finalized");
        Ok(outcome)
    }

    fn drop_reply(&self, reply: &AgentReply, reason: DropReason) -> Outcome {
        self.metrics.replies_dropped.inc();
        warn!(
            task_id = %reply.task_id,
            origin = %reply.origin,
            reason = ?reason,
            "Dropping reply for unknown, finished or out-of-step task"
        );
        Outcome::Dropped(reason)
    }

    /// Current view of a task for the status API; `None` if never seen.
    pub async fn status(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        if let Some(snapshot) = self.finished_snapshot(task_id).await? {
            return Ok(Some(snapshot));
        }
        if let Some(task) = self.tasks.load(task_id).await? {
            return Ok(Some(TaskSnapshot {
                task_id: task.task_id.clone(),
                status: task.status.to_string(),
                current_step: task.current_step_index,
                total_steps: task.steps.len(),
                result: None,
            }));
        }
        // The task may have finished between the two reads.
        self.finished_snapshot(task_id).await
    }

    /// Snapshot of a finished task. Results stored without a status are
    /// classified by the `ERROR:` prefix.
    async fn finished_snapshot(&self, task_id: &str) -> Result<Option<TaskSnapshot>> {
        let Some(result) = self.results.get_final(task_id).await? else {
            return Ok(None);
        };
        let status = match self.results.get_final_status(task_id).await? {
            Some(status) => status,
            None if result.starts_with(FAILURE_PREFIX) => TaskStatus::Failed,
            None => TaskStatus::Completed,
        };
        Ok(Some(TaskSnapshot {
            task_id: task_id.to_string(),
            status: status.to_string(),
            current_step: 0,
            total_steps: 0,
            result: Some(result),
        }))
    }

    /// Consumes `queue_results` until `shutdown` fires.
    pub async fn run(self, poll: PollSettings, shutdown: CancellationToken) {
        info!("Orchestrator is running...");
        // A dequeue is never raced against shutdown: a popped reply must be routed.
        while !shutdown.is_cancelled() {
            match self.channel.dequeue(RESULTS_CHANNEL, poll.dequeue_timeout).await {
                Ok(Some(raw)) => match self.handle_raw(&raw).await {
                    Ok(Some(Outcome::Dispatched { step, role })) => {
                        debug!(step, role = %role, "Reply routed to next step")
                    }
                    Ok(Some(outcome)) => debug!(outcome = ?outcome, "Reply routed"),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Critical error processing message"),
                },
                Ok(None) => {}
                Err(e) => error!(error = %e, "Dequeue from results channel failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll.idle_pause) => {}
            }
        }
        info!("Orchestrator stopped");
    }

    async fn handle_raw(&self, raw: &str) -> Result<Option<Outcome>> {
        let reply: AgentReply = match serde_json::from_str(raw) {
            Ok(reply) => reply,
            Err(e) => {
                let err = OrchestratorError::MalformedMessage(e.to_string());
                warn!(error = %err, "Dead-lettering unreadable reply");
                self.metrics.dead_letters.inc();
                channel::dead_letter(self.channel.as_ref(), RESULTS_CHANNEL, raw, &err.to_string())
                    .await?;
                return Ok(None);
            }
        };
        self.handle_agent_response(reply).await.map(Some)
    }
}

fn invalid_plan_reason(err: &OrchestratorError) -> String {
    match err {
        OrchestratorError::InvalidPlan(why) => why.clone(),
        other => other.to_string(),
    }
}

/// Checks a planner payload against the plan shape and the known roles.
pub fn validate_plan(payload: Option<&Value>, worker_roles: &[String]) -> Result<Vec<Step>> {
    let invalid = |why: String| OrchestratorError::InvalidPlan(why);

    let Some(Value::Object(plan)) = payload else {
        return Err(invalid("payload is not a mapping".into()));
    };
    let raw_steps = match plan.get("steps") {
        Some(Value::Array(steps)) if !steps.is_empty() => steps,
        Some(Value::Array(_)) => return Err(invalid("'steps' is empty".into())),
        Some(_) => return Err(invalid("'steps' is not a list".into())),
        None => return Err(invalid("'steps' is missing".into())),
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (raw, position) in raw_steps.iter().zip(1u32..) {
        let Value::Object(fields) = raw else {
            return Err(invalid(format!("step {position} is not a mapping")));
        };

        let agent = fields
            .get("agent")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|agent| !agent.is_empty())
            .ok_or_else(|| invalid(format!("step {position} names no agent")))?;
        if !worker_roles.iter().any(|role| role == agent) {
            return Err(invalid(format!(
                "step {position} names unknown agent '{agent}'"
            )));
        }

        let description = match fields.get("description") {
            None | Some(Value::Null) => NO_DESCRIPTION.to_string(),
            Some(Value::String(text)) => text.clone(),
            Some(_) => {
                return Err(invalid(format!(
                    "step {position} has a non-text description"
                )))
            }
        };

        if let Some(number) = fields.get("step") {
            if number.as_u64() != Some(u64::from(position)) {
                return Err(invalid(format!("step {position} is numbered {number}")));
            }
        }

        steps.push(Step {
            step_number: position,
            agent_role: agent.to_string(),
            description,
        });
    }
    Ok(steps)
}
