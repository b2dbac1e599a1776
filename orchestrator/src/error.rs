use thiserror::Error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

/// Errors raised by the orchestration core: channels, stores, agents and the router.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

impl Reject for ApiError {}

pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Rejection> {
    if let Some(api_err) = err.find::<ApiError>() {
        let (code, message) = match api_err {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Resource not found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
            ApiError::Orchestrator(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        let json = warp::reply::json(&serde_json::json!({
            "error": message,
            "details": api_err.to_string(),
        }));

        Ok(warp::reply::with_status(json, code))
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        let json = warp::reply::json(&serde_json::json!({
            "error": "Bad request",
            "details": body_err.to_string(),
        }));
        Ok(warp::reply::with_status(json, StatusCode::BAD_REQUEST))
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn status_of(err: ApiError) -> StatusCode {
        let rejection: Rejection = err.into();
        handle_rejection(rejection)
            .await
            .unwrap()
            .into_response()
            .status()
    }

    #[tokio::test]
    async fn api_errors_map_to_status_codes() {
        assert_eq!(status_of(ApiError::NotFound("t1".into())).await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(ApiError::BadRequest("x".into())).await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ApiError::Conflict("t1".into())).await, StatusCode::CONFLICT);
        assert_eq!(
            status_of(ApiError::RateLimitExceeded).await,
            StatusCode::TOO_MANY_REQUESTS
        );
        let internal = ApiError::from(OrchestratorError::Backend("down".into()));
        assert_eq!(status_of(internal).await, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unrelated_rejections_pass_through() {
        assert!(handle_rejection(warp::reject::not_found()).await.is_err());
    }
}
