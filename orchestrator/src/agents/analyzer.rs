// Analyzer Agent: finds trends and takeaways in the context gathered so far

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{Agent, ANALYZER_ROLE};
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::models::StepRequest;

const NO_CONTEXT: &str = "No context provided.";

pub struct AnalyzerAgent {
    generator: Arc<dyn TextGenerator>,
}

impl AnalyzerAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn prompt(context: &str, instruction: &str) -> String {
        let context = if context.trim().is_empty() { NO_CONTEXT } else { context };
        format!(
            "ACT AS: A Data Analyst.\n\
             RAW DATA / CONTEXT: {context}\n\
             INSTRUCTION: {instruction}\n\n\
             Perform a deep-dive analysis. Identify trends, sentiment, or key takeaways."
        )
    }
}

#[async_trait]
impl Agent for AnalyzerAgent {
    fn role(&self) -> &str {
        ANALYZER_ROLE
    }

    async fn transform(&self, request: &StepRequest) -> Result<Value> {
        info!(task_id = %request.task_id, context_chars = request.context.len(), "Analyzer: analyzing");
        let prompt = Self::prompt(&request.context, &request.description);
        Ok(Value::String(self.generator.generate(&prompt).await?))
    }
}
