use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::agents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    Memory,
}

/// Which loops this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    All,
    Api,
    Router,
    Workers,
}

impl RunMode {
    pub fn runs_api(self) -> bool {
        matches!(self, RunMode::All | RunMode::Api)
    }

    pub fn runs_router(self) -> bool {
        matches!(self, RunMode::All | RunMode::Router)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, RunMode::All | RunMode::Workers)
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(RunMode::All),
            "api" => Ok(RunMode::Api),
            "router" => Ok(RunMode::Router),
            "workers" => Ok(RunMode::Workers),
            other => bail!("unknown mode '{other}' (expected all, api, router or workers)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_queue_backend")]
    pub queue_backend: QueueBackend,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default = "default_worker_roles")]
    pub worker_roles: Vec<String>,
    #[serde(default = "default_one")]
    pub worker_instances: usize,
    #[serde(default = "default_one_u64")]
    pub dequeue_timeout_secs: u64,
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,
    #[serde(default = "default_stream_interval_secs")]
    pub stream_interval_secs: u64,
    #[serde(default)]
    pub result_ttl_secs: u64,
    #[serde(default = "default_true")]
    pub mock_mode: bool,
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_submit_rate_per_sec")]
    pub submit_rate_per_sec: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Redis
}

fn default_mode() -> RunMode {
    RunMode::All
}

fn default_worker_roles() -> Vec<String> {
    agents::WORKER_ROLES.iter().map(|r| r.to_string()).collect()
}

fn default_one() -> usize {
    1
}

fn default_one_u64() -> u64 {
    1
}

fn default_idle_pause_ms() -> u64 {
    100
}

fn default_stream_interval_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_mock_latency_ms() -> u64 {
    500
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_submit_rate_per_sec() -> u32 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// `.env`, then an optional `orchestrator.toml`, then plain environment
    /// variables (`PORT`, `REDIS_URL`, `WORKER_ROLES=retriever,writer`, ...).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("orchestrator").required(false))
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("worker_roles"),
            );
        Self::from_builder(builder)
    }

    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_backend == QueueBackend::Memory && self.mode != RunMode::All {
            bail!("QUEUE_BACKEND=memory only works with MODE=all");
        }
        if self.worker_roles.is_empty() {
            bail!("WORKER_ROLES must name at least one role");
        }
        for role in &self.worker_roles {
            if !agents::WORKER_ROLES.contains(&role.as_str()) {
                bail!(
                    "unknown worker role '{role}' (known: {})",
                    agents::WORKER_ROLES.join(", ")
                );
            }
        }
        if self.worker_instances == 0 {
            bail!("WORKER_INSTANCES must be at least 1");
        }
        if self.submit_rate_per_sec == 0 {
            bail!("SUBMIT_RATE_PER_SEC must be at least 1");
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_secs(self.stream_interval_secs)
    }
}
