use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::channel::Channel;
use crate::error::{OrchestratorError, Result};
use crate::models::{Task, TaskStatus};
use crate::store::{ResultStore, TaskStore};

/// Single-process backend for `MODE=all` with `QUEUE_BACKEND=memory`, and for tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    tasks: Mutex<HashMap<String, Task>>,
    finals: Mutex<HashMap<String, (TaskStatus, String)>>,
    pushed: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| OrchestratorError::Backend(e.to_string()))
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, channel: &str) -> Result<Option<String>> {
        let mut queues = lock(&self.inner.queues)?;
        Ok(queues.get_mut(channel).and_then(VecDeque::pop_front))
    }

    #[cfg(test)]
    pub fn pending(&self, channel: &str) -> usize {
        lock(&self.inner.queues)
            .map(|queues| queues.get(channel).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Non-destructive view of a queue's pending messages.
    #[cfg(test)]
    pub fn peek_all(&self, channel: &str) -> Vec<String> {
        lock(&self.inner.queues)
            .map(|queues| {
                queues
                    .get(channel)
                    .map(|q| q.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Channel for MemoryBackend {
    async fn enqueue(&self, channel: &str, payload: &str) -> Result<()> {
        lock(&self.inner.queues)?
            .entry(channel.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.inner.pushed.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, channel: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop(channel)? {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl TaskStore for MemoryBackend {
    async fn insert_new(&self, task: &Task) -> Result<bool> {
        let mut tasks = lock(&self.inner.tasks)?;
        if tasks.contains_key(&task.task_id) {
            return Ok(false);
        }
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(true)
    }

    async fn load(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(lock(&self.inner.tasks)?.get(task_id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        lock(&self.inner.tasks)?.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        lock(&self.inner.tasks)?.remove(task_id);
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryBackend {
    async fn put_final(&self, task_id: &str, status: TaskStatus, output: &str) -> Result<bool> {
        let mut finals = lock(&self.inner.finals)?;
        if finals.contains_key(task_id) {
            return Ok(false);
        }
        finals.insert(task_id.to_string(), (status, output.to_string()));
        Ok(true)
    }

    async fn get_final(&self, task_id: &str) -> Result<Option<String>> {
        Ok(lock(&self.inner.finals)?
            .get(task_id)
            .map(|(_, output)| output.clone()))
    }

    async fn get_final_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        Ok(lock(&self.inner.finals)?.get(task_id).map(|(status, _)| *status))
    }
}
