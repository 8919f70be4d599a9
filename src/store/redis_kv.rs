use async_trait::async_trait;
use redis::AsyncCommands;

use super::{KvStore, StoreError};

/// Each collection is one Redis hash, `{namespace}:{collection}`, keyed by id.
pub struct RedisKv {
    client: redis::Client,
    namespace: String,
}

impl RedisKv {
    pub fn new(client: redis::Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn open(url: &str, namespace: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self::new(redis::Client::open(url)?, namespace))
    }

    fn hash_key(&self, collection: &str) -> String {
        format!("{}:{}", self.namespace, collection)
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.hget(self.hash_key(collection), id).await?;
        Ok(value)
    }

    async fn put(&self, collection: &str, id: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.hset(self.hash_key(collection), id, value).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: usize = conn.hdel(self.hash_key(collection), id).await?;
        Ok(removed > 0)
    }

    async fn values(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let values: Vec<String> = conn.hvals(self.hash_key(collection)).await?;
        Ok(values)
    }
}
