use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Joins prior step outputs into the context handed to the next step.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";
pub const NO_DESCRIPTION: &str = "No description provided";
pub const NO_OUTPUT: &str = "No output generated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Planning => "PLANNING",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Inverse of [`TaskStatus::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        use TaskStatus::*;
        [Pending, Planning, Executing, Completed, Failed]
            .into_iter()
            .find(|status| status.as_str() == name)
    }

    fn can_become(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Planning)
                | (Planning, Executing)
                | (Executing, Completed)
                | (Pending | Planning | Executing, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step")]
    pub step_number: u32,
    #[serde(rename = "agent")]
    pub agent_role: String,
    pub description: String,
}

/// Canonical plan shape produced by the planner role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// Persisted record of one submission, keyed by `task_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub user_input: String,
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    pub results: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            user_input: user_input.into(),
            steps: Vec::new(),
            current_step_index: 0,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(OrchestratorError::IllegalTransition {
                task_id: self.task_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn begin_planning(&mut self) -> Result<()> {
        self.transition(TaskStatus::Planning)
    }

    /// Steps are fixed from here on; only the cursor and results move.
    pub fn apply_plan(&mut self, steps: Vec<Step>) -> Result<()> {
        self.transition(TaskStatus::Executing)?;
        self.steps = steps;
        self.current_step_index = 0;
        self.results.clear();
        Ok(())
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step_index >= self.steps.len()
    }

    pub fn record_result(&mut self, output: String) -> Result<()> {
        if self.status != TaskStatus::Executing || self.is_exhausted() {
            return Err(OrchestratorError::IllegalTransition {
                task_id: self.task_id.clone(),
                from: self.status.to_string(),
                to: "record result".to_string(),
            });
        }
        self.results.push(output);
        self.current_step_index += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn context(&self) -> String {
        self.results.join(CONTEXT_SEPARATOR)
    }

    pub fn final_output(&self) -> String {
        self.results
            .last()
            .cloned()
            .unwrap_or_else(|| NO_OUTPUT.to_string())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(TaskStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(TaskStatus::Failed)
    }
}

// Queue messages

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningRequest {
    pub task_id: String,
    pub user_input: String,
}

/// Inbound work item for any role. Planning requests parse into this shape
/// too: their `user_input` lands in `description`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRequest {
    pub task_id: String,
    #[serde(alias = "user_input")]
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub task_id: String,
    pub origin: String,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl AgentReply {
    pub fn completed(task_id: &str, origin: &str, data: Value, step: Option<u32>) -> Self {
        Self {
            task_id: task_id.to_string(),
            origin: origin.to_string(),
            status: ReplyStatus::Completed,
            data: Some(data),
            error: None,
            step,
        }
    }

    pub fn failed(task_id: &str, origin: &str, error: impl Into<String>, step: Option<u32>) -> Self {
        Self {
            task_id: task_id.to_string(),
            origin: origin.to_string(),
            status: ReplyStatus::Failed,
            data: None,
            error: Some(error.into()),
            step,
        }
    }

    /// Step output as stored in `Task::results`.
    pub fn payload_text(&self) -> String {
        match &self.data {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub channel: String,
    pub payload: String,
    pub error: String,
    pub received_at: DateTime<Utc>,
}

// API Request/Response models

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub user_input: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: String,
    pub current_step: usize,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamEvent {
    Processing,
    Completed { result: String },
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(n: u32, role: &str) -> Step {
        Step {
            step_number: n,
            agent_role: role.to_string(),
            description: format!("do {n}"),
        }
    }

    #[test]
    fn step_uses_wire_field_names() {
        let value = serde_json::to_value(step(1, "retriever")).unwrap();
        assert_eq!(value, json!({"step": 1, "agent": "retriever", "description": "do 1"}));
    }

    #[test]
    fn task_walks_the_happy_path() {
        let mut task = Task::new("t1", "write a report");
        task.begin_planning().unwrap();
        task.apply_plan(vec![step(1, "retriever"), step(2, "writer")]).unwrap();
        assert_eq!(task.current_step().unwrap().agent_role, "retriever");

        task.record_result("facts".into()).unwrap();
        assert_eq!(task.context(), "facts");
        task.record_result("report".into()).unwrap();
        assert!(task.is_exhausted());
        assert_eq!(task.context(), "facts\n---\nreport");
        assert_eq!(task.final_output(), "report");

        task.complete().unwrap();
        assert!(task.status.is_terminal());
    }

    #[test]
    fn status_names_parse_back() {
        assert_eq!(TaskStatus::from_name("FAILED"), Some(TaskStatus::Failed));
        assert_eq!(
            TaskStatus::from_name(TaskStatus::Completed.as_str()),
            Some(TaskStatus::Completed)
        );
        assert_eq!(TaskStatus::from_name("failed"), None);
    }

    #[test]
    fn terminal_states_do_not_reopen() {
        let mut task = Task::new("t1", "x");
        task.fail().unwrap();
        assert!(task.begin_planning().is_err());
        assert!(task.complete().is_err());
        assert!(task.record_result("late".into()).is_err());
    }

    #[test]
    fn cannot_skip_planning() {
        let mut task = Task::new("t1", "x");
        assert!(task.apply_plan(vec![step(1, "writer")]).is_err());
    }

    #[test]
    fn empty_results_fall_back_to_sentinel() {
        assert_eq!(Task::new("t1", "x").final_output(), NO_OUTPUT);
    }

    #[test]
    fn planning_request_parses_as_step_request() {
        let raw = r#"{"task_id":"t9","user_input":"plan a trip"}"#;
        let request: StepRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.description, "plan a trip");
        assert_eq!(request.context, "");
        assert_eq!(request.step, None);
    }

    #[test]
    fn reply_payload_text_keeps_strings_verbatim() {
        let text = AgentReply::completed("t", "writer", json!("done"), None);
        assert_eq!(text.payload_text(), "done");

        let object = AgentReply::completed("t", "analyzer", json!({"score": 3}), None);
        assert_eq!(object.payload_text(), r#"{"score":3}"#);

        let failed = AgentReply::failed("t", "writer", "boom", Some(2));
        assert_eq!(failed.payload_text(), "");
        let wire = serde_json::to_value(&failed).unwrap();
        assert_eq!(
            wire,
            json!({"task_id": "t", "origin": "writer", "status": "failed", "error": "boom", "step": 2})
        );
    }

    #[test]
    fn stream_events_are_tagged_by_status() {
        assert_eq!(
            serde_json::to_value(StreamEvent::Processing).unwrap(),
            json!({"status": "processing"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Completed { result: "r".into() }).unwrap(),
            json!({"status": "completed", "result": "r"})
        );
    }
}
