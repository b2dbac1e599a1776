// Planner Agent: Decomposes user queries into executable steps

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{Agent, PLANNER_ROLE};
use crate::error::{OrchestratorError, Result};
use crate::llm::{TextGenerator, PLANNING_MARKER};
use crate::models::{Plan, Step, StepRequest, NO_DESCRIPTION};

pub struct PlannerAgent {
    generator: Arc<dyn TextGenerator>,
    worker_roles: Vec<String>,
}

/// Model output before normalization; step numbers and descriptions are
/// often left out.
#[derive(Debug, Deserialize)]
struct DraftPlan {
    steps: Vec<DraftStep>,
}

#[derive(Debug, Deserialize)]
struct DraftStep {
    agent: String,
    description: Option<String>,
}

impl PlannerAgent {
    pub fn new(generator: Arc<dyn TextGenerator>, worker_roles: Vec<String>) -> Self {
        Self {
            generator,
            worker_roles,
        }
    }

    fn prompt(&self, user_input: &str) -> String {
        format!(
            "ACT AS: A Task Planner.\n\
             USER REQUEST: {user_input}\n\n\
             Break the request into an ordered list of steps. Each step is handled by one of\n\
             these agents: {roles}.\n\
             {PLANNING_MARKER} and nothing else, shaped exactly like:\n\
             {{\"steps\": [{{\"step\": 1, \"agent\": \"<agent>\", \"description\": \"<instruction>\"}}]}}",
            roles = self.worker_roles.join(", "),
        )
    }

    /// Parses raw model output into the canonical plan shape.
    pub fn parse_plan(raw: &str) -> Result<Plan> {
        let cleaned = strip_formatting(raw);
        let draft: DraftPlan = serde_json::from_str(cleaned).map_err(|e| {
            OrchestratorError::InvalidPlan(format!("planner output is not a valid plan: {e}"))
        })?;
        if draft.steps.is_empty() {
            return Err(OrchestratorError::InvalidPlan("planner produced no steps".into()));
        }

        let steps = draft
            .steps
            .into_iter()
            .zip(1u32..)
            .map(|(draft, step_number)| Step {
                step_number,
                agent_role: draft.agent.trim().to_string(),
                description: draft
                    .description
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
            })
            .collect();
        Ok(Plan { steps })
    }
}

/// Drops markdown fences and any prose around the outermost JSON object.
fn strip_formatting(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[async_trait]
impl Agent for PlannerAgent {
    fn role(&self) -> &str {
        PLANNER_ROLE
    }

    async fn transform(&self, request: &StepRequest) -> Result<Value> {
        info!(task_id = %request.task_id, "Planner: Decomposing query: {}", request.description);

        let raw = self.generator.generate(&self.prompt(&request.description)).await?;
        let plan = Self::parse_plan(&raw).map_err(|e| {
            warn!(task_id = %request.task_id, error = %e, "Planner: could not parse model output");
            e
        })?;

        info!(task_id = %request.task_id, steps = plan.steps.len(), "Planner: plan ready");
        Ok(serde_json::to_value(plan)?)
    }
}
