use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::actions::simulated::LatencyRange;
use crate::runtime::executor::ExecutorConfig;
use crate::runtime::handler::NodeHandlers;
use crate::runtime::retry::RetryPolicy;
use crate::store::file::FileKv;
use crate::store::redis_kv::RedisKv;
use crate::store::{InMemoryKv, KvStore, StoreError, TemplateRegistry};

/// Studio settings, normally read from a YAML file. Every field has a default,
/// so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudioConfig {
    pub store: StoreConfig,
    pub executor: ExecutorSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    pub redis_url: String,
    /// Key prefix for the Redis backend.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            data_dir: PathBuf::from(".karta"),
            redis_url: "redis://127.0.0.1/".to_string(),
            namespace: "karta".to_string(),
        }
    }
}

impl StoreConfig {
    pub async fn open_backend(&self) -> Result<Arc<dyn KvStore>, StoreError> {
        let backend: Arc<dyn KvStore> = match self.backend {
            StoreBackend::Memory => Arc::new(InMemoryKv::new()),
            StoreBackend::File => Arc::new(FileKv::new(&self.data_dir).await?),
            StoreBackend::Redis => Arc::new(RedisKv::open(&self.redis_url, self.namespace.clone())?),
        };
        info!(backend = ?self.backend, "Opened template store");
        Ok(backend)
    }

    pub async fn open_registry(&self) -> Result<TemplateRegistry, StoreError> {
        Ok(TemplateRegistry::new(self.open_backend().await?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorSettings {
    pub max_concurrency: usize,
    pub node_timeout_ms: Option<u64>,
    /// Retries for non-tool nodes. Tool nodes carry their own `retryCount`.
    pub default_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub flow_window_ms: u64,
    /// When set, agents and non-http tools sleep within this range.
    pub simulated_latency_ms: Option<LatencyRange>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            node_timeout_ms: None,
            default_retries: 0,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            flow_window_ms: 2000,
            simulated_latency_ms: None,
        }
    }
}

impl ExecutorSettings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrency: self.max_concurrency.max(1),
            node_timeout: self.node_timeout_ms.map(Duration::from_millis),
            retry: RetryPolicy {
                max_retries: self.default_retries,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                ..RetryPolicy::default()
            },
        }
    }

    pub fn handlers(&self) -> NodeHandlers {
        match self.simulated_latency_ms {
            Some(latency) => NodeHandlers::simulated(latency),
            None => NodeHandlers::builtin(),
        }
    }

    pub fn flow_window(&self) -> Duration {
        Duration::from_millis(self.flow_window_ms)
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<StudioConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    // An empty YAML document parses as null
    if content.trim().is_empty() {
        return Ok(StudioConfig::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}
