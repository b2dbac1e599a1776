// Writer Agent: turns the accumulated context into the final answer

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{Agent, WRITER_ROLE};
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::models::StepRequest;

const NO_BACKGROUND: &str = "No background data provided.";

pub struct WriterAgent {
    generator: Arc<dyn TextGenerator>,
}

impl WriterAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn prompt(context: &str, instruction: &str) -> String {
        let context = if context.trim().is_empty() { NO_BACKGROUND } else { context };
        format!(
            "ACT AS: A Professional Technical Writer.\n\
             BACKGROUND DATA: {context}\n\
             FINAL INSTRUCTION: {instruction}\n\n\
             Using the background data provided, write a high-quality final response.\n\
             Ensure it is well-formatted, clear, and addresses the user's original goal."
        )
    }
}

#[async_trait]
impl Agent for WriterAgent {
    fn role(&self) -> &str {
        WRITER_ROLE
    }

    async fn transform(&self, request: &StepRequest) -> Result<Value> {
        info!(task_id = %request.task_id, "Writer: composing final response");
        let prompt = Self::prompt(&request.context, &request.description);
        Ok(Value::String(self.generator.generate(&prompt).await?))
    }
}
