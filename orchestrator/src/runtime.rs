//! Builds and spawns the router and worker loops for the configured backend.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::{self, PLANNER_ROLE};
use crate::channel::Channel;
use crate::config::{Config, QueueBackend};
use crate::error::{OrchestratorError, Result};
use crate::llm::TextGenerator;
use crate::memory::MemoryBackend;
use crate::metrics::Metrics;
use crate::redis_client::RedisClient;
use crate::router::Router;
use crate::store::{ResultStore, TaskStore};
use crate::worker::{PollSettings, WorkerLoop};

/// Where channels and stores live.
#[derive(Clone)]
pub enum Backend {
    Redis { url: String, result_ttl_secs: u64 },
    Memory(MemoryBackend),
}

/// Channel and stores for one loop.
pub struct Connection {
    pub channel: Arc<dyn Channel>,
    pub tasks: Arc<dyn TaskStore>,
    pub results: Arc<dyn ResultStore>,
}

impl Connection {
    fn shared<T>(backend: Arc<T>) -> Self
    where
        T: Channel + TaskStore + ResultStore + 'static,
    {
        Self {
            channel: backend.clone(),
            tasks: backend.clone(),
            results: backend,
        }
    }
}

impl Backend {
    pub fn from_config(config: &Config) -> Self {
        match config.queue_backend {
            QueueBackend::Redis => Backend::Redis {
                url: config.redis_url.clone(),
                result_ttl_secs: config.result_ttl_secs,
            },
            QueueBackend::Memory => Backend::Memory(MemoryBackend::new()),
        }
    }

    /// Redis gets a fresh client per call, since each blocking consumer
    /// needs a connection of its own.
    pub async fn open(&self) -> Result<Connection> {
        match self {
            Backend::Redis {
                url,
                result_ttl_secs,
            } => {
                let client = RedisClient::new(url, *result_ttl_secs).await?;
                Ok(Connection::shared(Arc::new(client)))
            }
            Backend::Memory(memory) => Ok(Connection::shared(Arc::new(memory.clone()))),
        }
    }
}

pub fn poll_settings(config: &Config) -> PollSettings {
    PollSettings {
        dequeue_timeout: config.dequeue_timeout(),
        idle_pause: config.idle_pause(),
    }
}

pub async fn build_router(
    backend: &Backend,
    config: &Config,
    metrics: Arc<Metrics>,
) -> Result<Router> {
    let conn = backend.open().await?;
    Ok(Router::new(
        conn.channel,
        conn.tasks,
        conn.results,
        metrics,
        &config.worker_roles,
    ))
}

pub async fn spawn_router(
    backend: &Backend,
    config: &Config,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let router = build_router(backend, config, metrics).await?;
    Ok(tokio::spawn(router.run(poll_settings(config), shutdown)))
}

/// Planner plus every configured worker role, `worker_instances` loops each.
pub async fn spawn_workers(
    backend: &Backend,
    config: &Config,
    generator: Arc<dyn TextGenerator>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let roles = std::iter::once(PLANNER_ROLE).chain(config.worker_roles.iter().map(String::as_str));

    let mut handles = Vec::new();
    for role in roles {
        let agent = agents::build_agent(role, generator.clone(), &config.worker_roles)
            .ok_or_else(|| OrchestratorError::Backend(format!("no agent registered for role '{role}'")))?;

        for instance in 0..config.worker_instances {
            let conn = backend.open().await?;
            let worker = WorkerLoop::new(
                agent.clone(),
                conn.channel,
                poll_settings(config),
                metrics.clone(),
            );
            info!(role, instance, queue = worker.queue(), "Spawning worker");
            handles.push(tokio::spawn(worker.run(shutdown.clone())));
        }
    }
    Ok(handles)
}
