use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use warp::{Filter, Rejection, Reply};

use crate::metrics::Metrics;
use crate::middleware::{self, SubmitLimiter};
use crate::router::Router;

mod stream;
mod tasks;

/// Largest accepted submission body.
const MAX_BODY_BYTES: u64 = 64 * 1024;

pub fn routes(
    router: Router,
    metrics: Arc<Metrics>,
    limiter: SubmitLimiter,
    stream_interval: Duration,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));

    let submit_route = api
        .and(warp::path("tasks"))
        .and(warp::path::end())
        .and(warp::post())
        .and(middleware::rate_limit(limiter))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_router(router.clone()))
        .and_then(tasks::handle_submit);

    let status_route = api
        .and(warp::path("tasks"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_router(router.clone()))
        .and_then(tasks::handle_status);

    let stream_route = api
        .and(warp::path("tasks"))
        .and(warp::path::param::<String>())
        .and(warp::path("stream"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_router(router))
        .and(warp::any().map(move || stream_interval))
        .and_then(stream::handle_stream);

    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    let metrics_route = warp::path("metrics").and(warp::get()).map(move || {
        warp::reply::with_header(
            metrics.render(),
            "Content-Type",
            prometheus::TEXT_FORMAT,
        )
    });

    health
        .or(metrics_route)
        .or(submit_route)
        .or(status_route)
        .or(stream_route)
}

fn with_router(router: Router) -> impl Filter<Extract = (Router,), Error = Infallible> + Clone {
    warp::any().map(move || router.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::handle_rejection;
    use crate::memory::MemoryBackend;
    use crate::models::{AgentReply, TaskStatus};
    use crate::store::ResultStore;
    use serde_json::{json, Value};
    use warp::http::StatusCode;

    fn setup(
        rate: u32,
    ) -> (
        Router,
        MemoryBackend,
        impl Filter<Extract = impl Reply, Error = Rejection> + Clone + 'static,
    ) {
        let backend = MemoryBackend::new();
        let shared = Arc::new(backend.clone());
        let metrics = Arc::new(Metrics::new());
        let router = Router::new(
            shared.clone(),
            shared.clone(),
            shared,
            metrics.clone(),
            &["writer".to_string()],
        );
        let filter = routes(
            router.clone(),
            metrics,
            middleware::submit_limiter(rate),
            Duration::from_millis(5),
        )
        .recover(handle_rejection);
        (router, backend, filter)
    }

    fn submit(body: Value) -> warp::test::RequestBuilder {
        warp::test::request()
            .method("POST")
            .path("/api/v1/tasks")
            .json(&body)
    }

    #[tokio::test]
    async fn submission_is_queued_immediately() {
        let (_router, backend, filter) = setup(100);
        let resp = submit(json!({"user_input": "research rust"})).reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "queued");
        let task_id = body["task_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(task_id).is_ok());
        assert_eq!(backend.pending("queue_planner"), 1);
    }

    #[tokio::test]
    async fn blank_input_is_a_bad_request() {
        let (_router, backend, filter) = setup(100);
        let resp = submit(json!({"user_input": "   "})).reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = submit(json!({"wrong": 1})).reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(backend.pending("queue_planner"), 0);
    }

    #[tokio::test]
    async fn submissions_are_rate_limited() {
        let (_router, _backend, filter) = setup(1);
        let first = submit(json!({"user_input": "a"})).reply(&filter).await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = submit(json!({"user_input": "b"})).reply(&filter).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn status_reports_unknown_and_finished_tasks() {
        let (router, backend, filter) = setup(100);
        let resp = warp::test::request().path("/api/v1/tasks/nope").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        router.start_task("t1", "x").await.unwrap();
        let resp = warp::test::request().path("/api/v1/tasks/t1").reply(&filter).await;
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "PLANNING");

        backend.put_final("t2", TaskStatus::Completed, "all done").await.unwrap();
        let resp = warp::test::request().path("/api/v1/tasks/t2").reply(&filter).await;
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["result"], "all done");
    }

    #[tokio::test]
    async fn stream_heartbeats_until_the_result_lands() {
        let (router, _backend, filter) = setup(100);
        router.start_task("t1", "x").await.unwrap();

        let finisher = {
            let router = router.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                router
                    .handle_agent_response(AgentReply::failed("t1", "planner", "bad", None))
                    .await
                    .unwrap();
            })
        };

        let resp = warp::test::request()
            .path("/api/v1/tasks/t1/stream")
            .reply(&filter)
            .await;
        finisher.await.unwrap();

        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        let events: Vec<Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).unwrap())
            .collect();
        assert!(events.len() >= 2);
        assert!(events[..events.len() - 1]
            .iter()
            .all(|e| e == &json!({"status": "processing"})));
        assert_eq!(
            events.last().unwrap(),
            &json!({"status": "completed", "result": "ERROR: system failed at planner. Details: bad"})
        );
    }

    #[tokio::test]
    async fn stream_for_unknown_task_closes() {
        let (_router, _backend, filter) = setup(100);
        let resp = warp::test::request()
            .path("/api/v1/tasks/ghost/stream")
            .reply(&filter)
            .await;
        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(body.contains(r#"{"status":"not_found"}"#));
    }

    #[tokio::test]
    async fn health_and_metrics_respond() {
        let (_router, _backend, filter) = setup(100);
        let resp = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::OK);

        submit(json!({"user_input": "a"})).reply(&filter).await;
        let resp = warp::test::request().path("/metrics").reply(&filter).await;
        let text = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(text.contains("orchestrator_tasks_submitted_total 1"));
    }
}
