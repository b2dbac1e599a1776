use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::channel::Channel;
use crate::error::Result;
use crate::models::{Task, TaskStatus};
use crate::store::{final_key, final_status_key, task_key, ResultStore, TaskStore};

/// Redis-backed channel, task store and result store.
///
/// `BLPOP` occupies its connection until it returns, so dequeues run on a
/// connection of their own. Clones share both connections: give every
/// consumer loop its own client from [`RedisClient::new`].
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    blocking: ConnectionManager,
    result_ttl_secs: u64,
}

impl RedisClient {
    pub async fn new(redis_url: &str, result_ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_tokio_connection_manager().await?;
        let blocking = client.get_tokio_connection_manager().await?;
        Ok(Self {
            connection,
            blocking,
            result_ttl_secs,
        })
    }
}

#[async_trait]
impl Channel for RedisClient {
    async fn enqueue(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.rpush::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, channel: &str, timeout: Duration) -> Result<Option<String>> {
        // BLPOP treats 0 as "block forever".
        let timeout_secs = timeout.as_secs().max(1);
        let mut conn = self.blocking.clone();
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(channel)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, message)| message))
    }
}

#[async_trait]
impl TaskStore for RedisClient {
    async fn insert_new(&self, task: &Task) -> Result<bool> {
        let json = serde_json::to_string(task)?;
        let mut conn = self.connection.clone();
        let created: bool = conn.set_nx(task_key(&task.task_id), json).await?;
        Ok(created)
    }

    async fn load(&self, task_id: &str) -> Result<Option<Task>> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.get(task_key(task_id)).await?;
        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let json = serde_json::to_string(task)?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(task_key(&task.task_id), json).await?;
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(task_key(task_id)).await?;
        Ok(())
    }
}

impl RedisClient {
    /// `SET key value NX [EX ttl]`; `true` when the key was written.
    async fn set_final_key(&self, key: String, value: &str) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if self.result_ttl_secs > 0 {
            cmd.arg("EX").arg(self.result_ttl_secs);
        }
        let mut conn = self.connection.clone();
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl ResultStore for RedisClient {
    async fn put_final(&self, task_id: &str, status: TaskStatus, output: &str) -> Result<bool> {
        // Status first: whoever sees `final_<id>` also finds its status.
        self.set_final_key(final_status_key(task_id), status.as_str())
            .await?;
        self.set_final_key(final_key(task_id), output).await
    }

    async fn get_final(&self, task_id: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.get(final_key(task_id)).await?;
        Ok(result)
    }

    async fn get_final_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(final_status_key(task_id)).await?;
        Ok(raw.and_then(|status| TaskStatus::from_name(&status)))
    }
}
