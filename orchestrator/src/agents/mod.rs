pub mod analyzer;
pub mod planner;
pub mod retriever;
pub mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::TextGenerator;
use crate::models::StepRequest;

pub use analyzer::AnalyzerAgent;
pub use planner::PlannerAgent;
pub use retriever::RetrieverAgent;
pub use writer::WriterAgent;

pub const PLANNER_ROLE: &str = "planner";
pub const RETRIEVER_ROLE: &str = "retriever";
pub const ANALYZER_ROLE: &str = "analyzer";
pub const WRITER_ROLE: &str = "writer";

/// Roles a plan may dispatch steps to.
pub const WORKER_ROLES: &[&str] = &[RETRIEVER_ROLE, ANALYZER_ROLE, WRITER_ROLE];

/// Role-specific transform run by a [`crate::worker::WorkerLoop`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> &str;

    async fn transform(&self, request: &StepRequest) -> Result<Value>;
}

/// Maps a role name to its implementation. `worker_roles` is what the
/// planner is allowed to put in a plan.
pub fn build_agent(
    role: &str,
    generator: Arc<dyn TextGenerator>,
    worker_roles: &[String],
) -> Option<Arc<dyn Agent>> {
    let agent: Arc<dyn Agent> = match role {
        PLANNER_ROLE => Arc::new(PlannerAgent::new(generator, worker_roles.to_vec())),
        RETRIEVER_ROLE => Arc::new(RetrieverAgent::new(generator)),
        ANALYZER_ROLE => Arc::new(AnalyzerAgent::new(generator)),
        WRITER_ROLE => Arc::new(WriterAgent::new(generator)),
        _ => return None,
    };
    Some(agent)
}
