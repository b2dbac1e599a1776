//! Text generation: the single capability every agent role builds on.
//!
//! The backend is picked once at startup and injected into the agents, so
//! role code never knows whether it talks to Gemini or the mock.

pub mod gemini;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{OrchestratorError, Result};

pub use gemini::GeminiClient;
pub use mock::MockGenerator;

/// Line that marks a prompt as a planning request.
pub const PLANNING_MARKER: &str = "RESPOND WITH A JSON PLAN";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Persona named on the prompt's `ACT AS:` line, without the trailing period.
pub fn persona(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix("ACT AS:"))
        .map(|rest| rest.trim().trim_end_matches('.'))
        .filter(|name| !name.is_empty())
}

pub fn from_config(config: &Config) -> Result<Arc<dyn TextGenerator>> {
    if config.mock_mode {
        return Ok(Arc::new(MockGenerator::new(Duration::from_millis(
            config.mock_latency_ms,
        ))));
    }

    let api_key = config
        .gemini_api_key
        .clone()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            OrchestratorError::Generation("GEMINI_API_KEY is required when MOCK_MODE=false".into())
        })?;
    let client = GeminiClient::new(
        &config.gemini_base_url,
        &config.gemini_model,
        api_key,
        Duration::from_secs(config.llm_timeout_secs),
    )?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_reads_the_act_as_line() {
        let prompt = "\n        ACT AS: A Data Analyst.\n        INSTRUCTION: x";
        assert_eq!(persona(prompt), Some("A Data Analyst"));
        assert_eq!(persona("no persona here"), None);
        assert_eq!(persona("ACT AS:   "), None);
    }
}
