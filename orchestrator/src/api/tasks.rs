use tracing::{error, info};
use uuid::Uuid;
use warp::{Rejection, Reply};

use crate::error::{ApiError, OrchestratorError};
use crate::models::{SubmitTaskRequest, SubmitTaskResponse};
use crate::router::Router;

pub async fn handle_submit(
    request: SubmitTaskRequest,
    router: Router,
) -> Result<impl Reply, Rejection> {
    let user_input = request.user_input.trim();
    if user_input.is_empty() {
        return Err(ApiError::BadRequest("user_input must not be empty".into()).into());
    }

    let task_id = Uuid::new_v4().to_string();
    info!(task_id = %task_id, "Accepting task submission");

    router
        .start_task(&task_id, user_input)
        .await
        .map_err(|e| match e {
            OrchestratorError::DuplicateTask(id) => ApiError::Conflict(id),
            other => {
                error!(task_id = %task_id, error = %other, "Failed to start task");
                ApiError::Orchestrator(other)
            }
        })?;

    Ok(warp::reply::json(&SubmitTaskResponse {
        task_id,
        status: "queued",
    }))
}

pub async fn handle_status(task_id: String, router: Router) -> Result<impl Reply, Rejection> {
    match router.status(&task_id).await.map_err(ApiError::from)? {
        Some(snapshot) => Ok(warp::reply::json(&snapshot)),
        None => Err(ApiError::NotFound(format!("task {task_id}")).into()),
    }
}
