use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::compiler::graph::GraphError;

pub mod file;
pub mod redis_kv;
pub mod registry;
pub mod seed;

pub use registry::{RegistryEvent, TemplateRegistry};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

// --- Interfaces ---

/// 键值存储后端：按 collection 分组的 id -> JSON 文本
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, collection: &str, id: &str, value: String) -> Result<(), StoreError>;
    /// Returns whether the entry existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
    /// Every value stored in a collection, in no particular order.
    async fn values(&self, collection: &str) -> Result<Vec<String>, StoreError>;
}

// --- In-Memory Implementation ---

#[derive(Debug, Default)]
pub struct InMemoryKv {
    // Map<Collection, Map<Id, Json>>
    collections: DashMap<String, DashMap<String, String>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|c| c.get(id).map(|v| v.value().clone())))
    }

    async fn put(&self, collection: &str, id: &str, value: String) -> Result<(), StoreError> {
        let entries = self.collections.entry(collection.to_string()).or_default();
        entries.insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .is_some_and(|c| c.remove(id).is_some()))
    }

    async fn values(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .map(|c| c.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default())
    }
}
