use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Task, TaskStatus};

pub fn final_key(task_id: &str) -> String {
    format!("final_{task_id}")
}

pub fn final_status_key(task_id: &str) -> String {
    format!("final_status_{task_id}")
}

pub fn task_key(task_id: &str) -> String {
    format!("task_state_{task_id}")
}

/// Active task records. Terminal tasks are removed, never kept.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Returns `false` without writing when the id is already taken.
    async fn insert_new(&self, task: &Task) -> Result<bool>;

    async fn load(&self, task_id: &str) -> Result<Option<Task>>;

    async fn save(&self, task: &Task) -> Result<()>;

    async fn remove(&self, task_id: &str) -> Result<()>;
}

/// Final outputs read by the status boundary.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// First write wins; returns `false` if a result was already stored.
    /// The terminal status is recorded before the output becomes visible.
    async fn put_final(&self, task_id: &str, status: TaskStatus, output: &str) -> Result<bool>;

    async fn get_final(&self, task_id: &str) -> Result<Option<String>>;

    /// COMPLETED or FAILED, as recorded by `put_final`.
    async fn get_final_status(&self, task_id: &str) -> Result<Option<TaskStatus>>;
}
