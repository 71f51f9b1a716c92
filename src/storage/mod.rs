mod local;
mod memory;
mod s3;
mod stats;
mod url;

use std::{fmt::Debug, sync::Arc};

use async_channel::Receiver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

pub use {
    local::LocalStorage, memory::MemoryStorage, s3::S3Storage, stats::StorageStats,
    url::StorageUrl,
};

pub type BoxedStorage = Arc<dyn Storage + Sync + Send + 'static>;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Debug + Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    fn stats(&self) -> StorageStats;

    async fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(Error::ItemNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stores the concatenation of every chunk received before the channel
    /// closes. Nothing is visible under `key` until the stream completes.
    async fn put_stream(&self, key: &str, chunks: Receiver<Vec<u8>>) -> Result<()> {
        let mut bytes = vec![];
        while let Ok(chunk) = chunks.recv().await {
            bytes.extend_from_slice(&chunk);
        }

        self.put(key, bytes).await
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        let bytes = self.get(from_key).await?;
        self.put(to_key, bytes).await
    }
}

#[cfg(test)]
mod tests;
