//! Generic consumption loop shared by every agent role.
//!
//! One message per iteration: dequeue from `queue_<role>`, run the role's
//! transform, publish a reply on the results channel. Every request that
//! carries a readable `task_id` gets a reply, failed or not, so the router is
//! never left waiting on a swallowed error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::Agent;
use crate::channel::{self, Channel, RESULTS_CHANNEL};
use crate::error::{OrchestratorError, Result};
use crate::metrics::Metrics;
use crate::models::{AgentReply, StepRequest};

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub dequeue_timeout: Duration,
    pub idle_pause: Duration,
}

pub struct WorkerLoop {
    agent: Arc<dyn Agent>,
    channel: Arc<dyn Channel>,
    queue: String,
    poll: PollSettings,
    metrics: Arc<Metrics>,
}

impl WorkerLoop {
    pub fn new(
        agent: Arc<dyn Agent>,
        channel: Arc<dyn Channel>,
        poll: PollSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let queue = channel::request_channel(agent.role());
        Self {
            agent,
            channel,
            queue,
            poll,
            metrics,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let role = self.agent.role().to_string();
        info!(role = %role, queue = %self.queue, "Agent is listening");

        // Shutdown is checked between dequeues only; a popped message is always handled.
        while !shutdown.is_cancelled() {
            match self.channel.dequeue(&self.queue, self.poll.dequeue_timeout).await {
                Ok(Some(raw)) => {
                    if let Err(e) = self.process(&raw).await {
                        error!(role = %role, error = %e, "Error in listen loop");
                    }
                }
                Ok(None) => {}
                Err(e) => error!(role = %role, error = %e, "Dequeue failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll.idle_pause) => {}
            }
        }

        info!(role = %role, "Agent stopped");
    }

    /// Handles one raw message. Errors returned here are backend failures
    /// (publishing the reply or dead letter), never task failures.
    pub async fn process(&self, raw: &str) -> Result<()> {
        let role = self.agent.role();

        let request: StepRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => return self.reject_malformed(raw, &e.to_string()).await,
        };
        info!(role, task_id = %request.task_id, step = ?request.step, "Received task");

        let reply = match self.agent.transform(&request).await {
            Ok(data) => {
                self.metrics.record_worker_message(role, "completed");
                debug!(role, task_id = %request.task_id, "Transform complete");
                AgentReply::completed(&request.task_id, role, data, request.step)
            }
            Err(e) => {
                self.metrics.record_worker_message(role, "failed");
                warn!(role, task_id = %request.task_id, error = %e, "Transform failed");
                AgentReply::failed(&request.task_id, role, e.to_string(), request.step)
            }
        };

        channel::publish(self.channel.as_ref(), RESULTS_CHANNEL, &reply).await
    }

    async fn reject_malformed(&self, raw: &str, reason: &str) -> Result<()> {
        let role = self.agent.role();
        self.metrics.record_worker_message(role, "malformed");
        self.metrics.dead_letters.inc();
        warn!(role, error = reason, "Malformed message, dead-lettering");

        channel::dead_letter(self.channel.as_ref(), &self.queue, raw, reason).await?;

        // Still tell the router when we can tell which task this was.
        if let Some(task_id) = readable_task_id(raw) {
            let error = OrchestratorError::MalformedMessage(reason.to_string());
            let reply = AgentReply::failed(&task_id, role, error.to_string(), None);
            channel::publish(self.channel.as_ref(), RESULTS_CHANNEL, &reply).await?;
        }
        Ok(())
    }
}

fn readable_task_id(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("task_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{PlannerAgent, WriterAgent};
    use crate::channel::testing::CancelsOnReceive;
    use crate::channel::DEAD_LETTER_CHANNEL;
    use crate::llm::{MockGenerator, TextGenerator};
    use crate::memory::MemoryBackend;
    use crate::models::{DeadLetter, ReplyStatus};
    use async_trait::async_trait;

    const POLL: PollSettings = PollSettings {
        dequeue_timeout: Duration::from_millis(20),
        idle_pause: Duration::from_millis(1),
    };

    struct Unavailable;

    #[async_trait]
    impl TextGenerator for Unavailable {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(OrchestratorError::Generation("model unavailable".into()))
        }
    }

    fn writer_loop(backend: &MemoryBackend, generator: Arc<dyn TextGenerator>) -> WorkerLoop {
        WorkerLoop::new(
            Arc::new(WriterAgent::new(generator)),
            Arc::new(backend.clone()),
            POLL,
            Arc::new(Metrics::new()),
        )
    }

    async fn next_reply(backend: &MemoryBackend) -> AgentReply {
        let raw = backend
            .dequeue(RESULTS_CHANNEL, Duration::from_millis(500))
            .await
            .unwrap()
            .expect("a reply");
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn publishes_completed_reply_with_step() {
        let backend = MemoryBackend::new();
        let worker = writer_loop(&backend, Arc::new(MockGenerator::default()));
        assert_eq!(worker.queue(), "queue_writer");

        worker
            .process(r#"{"task_id":"t1","description":"write","context":"facts","step":2}"#)
            .await
            .unwrap();

        let reply = next_reply(&backend).await;
        assert_eq!(reply.status, ReplyStatus::Completed);
        assert_eq!(reply.origin, "writer");
        assert_eq!(reply.step, Some(2));
        assert_eq!(
            reply.payload_text(),
            "Mocked response from A Professional Technical Writer"
        );
    }

    #[tokio::test]
    async fn transform_errors_become_failed_replies() {
        let backend = MemoryBackend::new();
        let worker = writer_loop(&backend, Arc::new(Unavailable));

        worker
            .process(r#"{"task_id":"t1","description":"write","context":""}"#)
            .await
            .unwrap();

        let reply = next_reply(&backend).await;
        assert_eq!(reply.status, ReplyStatus::Failed);
        assert!(reply.error.unwrap().contains("model unavailable"));
    }

    #[tokio::test]
    async fn malformed_messages_are_dead_lettered_and_reported() {
        let backend = MemoryBackend::new();
        let worker = writer_loop(&backend, Arc::new(MockGenerator::default()));

        // Valid JSON, wrong shape: the task id is still readable.
        worker.process(r#"{"task_id":"t7","oops":true}"#).await.unwrap();
        let reply = next_reply(&backend).await;
        assert_eq!(reply.task_id, "t7");
        assert_eq!(reply.status, ReplyStatus::Failed);
        assert!(reply.error.unwrap().starts_with("Malformed message"));

        // Not JSON at all: nothing to report, only parked.
        worker.process("not json").await.unwrap();
        assert_eq!(backend.pending(RESULTS_CHANNEL), 0);

        let letters: Vec<DeadLetter> = backend
            .peek_all(DEAD_LETTER_CHANNEL)
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[1].channel, "queue_writer");
        assert_eq!(letters[1].payload, "not json");
    }

    #[tokio::test]
    async fn planner_parse_failure_is_surfaced() {
        struct Rambling;

        #[async_trait]
        impl TextGenerator for Rambling {
            async fn generate(&self, _prompt: &str) -> Result<String> {
                Ok("Here is my plan: first, think hard.".into())
            }
        }

        let backend = MemoryBackend::new();
        let worker = WorkerLoop::new(
            Arc::new(PlannerAgent::new(Arc::new(Rambling), vec!["writer".into()])),
            Arc::new(backend.clone()),
            POLL,
            Arc::new(Metrics::new()),
        );
        worker
            .process(r#"{"task_id":"t2","user_input":"do things"}"#)
            .await
            .unwrap();

        let reply = next_reply(&backend).await;
        assert_eq!(reply.origin, "planner");
        assert_eq!(reply.status, ReplyStatus::Failed);
    }

    #[tokio::test]
    async fn loop_keeps_going_after_bad_input_and_stops_on_shutdown() {
        let backend = MemoryBackend::new();
        let worker = writer_loop(&backend, Arc::new(MockGenerator::default()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        backend.enqueue("queue_writer", "garbage").await.unwrap();
        backend
            .enqueue("queue_writer", r#"{"task_id":"t3","description":"w","context":""}"#)
            .await
            .unwrap();

        let reply = next_reply(&backend).await;
        assert_eq!(reply.task_id, "t3");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn message_popped_during_shutdown_is_still_answered() {
        let backend = MemoryBackend::new();
        let shutdown = CancellationToken::new();
        let channel = CancelsOnReceive {
            inner: backend.clone(),
            shutdown: shutdown.clone(),
        };
        let worker = WorkerLoop::new(
            Arc::new(WriterAgent::new(Arc::new(MockGenerator::default()))),
            Arc::new(channel),
            POLL,
            Arc::new(Metrics::new()),
        );
        backend
            .enqueue("queue_writer", r#"{"task_id":"t4","description":"w","context":""}"#)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), worker.run(shutdown))
            .await
            .expect("loop exits after the in-flight message");

        assert_eq!(next_reply(&backend).await.task_id, "t4");
    }
}
