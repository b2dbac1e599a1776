// Retriever Agent: gathers raw facts for a step description

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{Agent, RETRIEVER_ROLE};
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::models::StepRequest;

pub struct RetrieverAgent {
    generator: Arc<dyn TextGenerator>,
}

impl RetrieverAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn prompt(description: &str) -> String {
        format!(
            "ACT AS: A Research & Retrieval Agent.\n\
             TASK: {description}\n\n\
             Provide a detailed collection of facts, data points, or context related to the task.\n\
             Focus on accuracy and raw information."
        )
    }
}

#[async_trait]
impl Agent for RetrieverAgent {
    fn role(&self) -> &str {
        RETRIEVER_ROLE
    }

    async fn transform(&self, request: &StepRequest) -> Result<Value> {
        info!(task_id = %request.task_id, "Retriever: Searching for: {}", request.description);
        let retrieved = self.generator.generate(&Self::prompt(&request.description)).await?;
        Ok(Value::String(retrieved))
    }
}
