use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::models::DeadLetter;

pub const RESULTS_CHANNEL: &str = "queue_results";
pub const DEAD_LETTER_CHANNEL: &str = "queue_dead_letter";

/// Request channel consumed by the workers of `role`.
pub fn request_channel(role: &str) -> String {
    format!("queue_{role}")
}

/// Named FIFO queue with at-least-once delivery and competing consumers.
///
/// `enqueue` never waits on consumers. `dequeue` waits at most `timeout` and
/// returns `None` when nothing arrived, so callers can check for shutdown.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn enqueue(&self, channel: &str, payload: &str) -> Result<()>;

    async fn dequeue(&self, channel: &str, timeout: Duration) -> Result<Option<String>>;
}

pub async fn publish<T: Serialize + Sync>(
    channel: &dyn Channel,
    name: &str,
    message: &T,
) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    channel.enqueue(name, &payload).await
}

/// Parks a message that could not be processed instead of dropping it.
pub async fn dead_letter(
    channel: &dyn Channel,
    source: &str,
    payload: &str,
    error: &str,
) -> Result<()> {
    let letter = DeadLetter {
        channel: source.to_string(),
        payload: payload.to_string(),
        error: error.to_string(),
        received_at: Utc::now(),
    };
    publish(channel, DEAD_LETTER_CHANNEL, &letter).await
}
