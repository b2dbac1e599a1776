use std::time::Duration;

use futures::{stream, Stream};
use tracing::{debug, warn};
use warp::sse::Event;
use warp::{Rejection, Reply};

use crate::models::StreamEvent;
use crate::router::Router;

#[derive(Clone, Copy)]
enum Phase {
    First,
    Waiting,
    Done,
}

pub async fn handle_stream(
    task_id: String,
    router: Router,
    interval: Duration,
) -> Result<impl Reply, Rejection> {
    debug!(task_id = %task_id, "Streaming started");
    let events = progress_events(router, task_id, interval);
    Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}

/// `processing` every `interval` until a final result exists, then one
/// `completed` event and the end of the stream.
fn progress_events(
    router: Router,
    task_id: String,
    interval: Duration,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    stream::unfold(Phase::First, move |phase| {
        let router = router.clone();
        let task_id = task_id.clone();
        async move {
            match phase {
                Phase::Done => return None,
                Phase::Waiting => tokio::time::sleep(interval).await,
                Phase::First => {}
            }

            let event = poll_once(&router, &task_id).await;
            let next = match event {
                StreamEvent::Processing => Phase::Waiting,
                StreamEvent::Completed { .. } | StreamEvent::NotFound => Phase::Done,
            };
            let sent = serde_json::to_string(&event).map(|data| Event::default().data(data));
            Some((sent, next))
        }
    })
}

async fn poll_once(router: &Router, task_id: &str) -> StreamEvent {
    match router.status(task_id).await {
        Ok(Some(snapshot)) => match snapshot.result {
            Some(result) => StreamEvent::Completed { result },
            None => StreamEvent::Processing,
        },
        Ok(None) => StreamEvent::NotFound,
        Err(e) => {
            // Keep the client connected; the next poll may succeed.
            warn!(task_id, error = %e, "Status lookup failed while streaming");
            StreamEvent::Processing
        }
    }
}
