use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{persona, TextGenerator, PLANNING_MARKER};
use crate::error::Result;

/// Deterministic stand-in for a model: canned plan for planning prompts,
/// a persona echo for everything else.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    plan: String,
    latency: Duration,
}

impl MockGenerator {
    pub fn new(latency: Duration) -> Self {
        let plan = json!({
            "steps": [
                {"step": 1, "agent": "retriever", "description": "Gathering fake data"},
                {"step": 2, "agent": "writer", "description": "Writing fake report"}
            ]
        });
        Self {
            plan: plan.to_string(),
            latency,
        }
    }

    /// Replace the canned plan, e.g. to exercise other roles.
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if prompt.contains(PLANNING_MARKER) {
            // Fenced like real model output so the planner's cleanup runs.
            return Ok(format!("```json\n{}\n```", self.plan));
        }
        Ok(format!(
            "Mocked response from {}",
            persona(prompt).unwrap_or("agent")
        ))
    }
}
