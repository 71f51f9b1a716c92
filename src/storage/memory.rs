use std::{collections::BTreeMap, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::{Storage, StorageObject, StorageStats};

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Process-local storage, mostly useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    failing_prefix: Option<String>,
    stats: Mutex<StorageStats>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Every write to a key starting with `prefix` fails.
    pub fn failing_writes(prefix: &str) -> Self {
        MemoryStorage {
            failing_prefix: Some(prefix.to_owned()),
            ..MemoryStorage::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).map(|object| object.bytes.clone())
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        match &self.failing_prefix {
            Some(prefix) if key.starts_with(prefix.as_str()) => Err(anyhow::anyhow!(
                "write to `{key}` rejected by storage"
            )
            .into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, key: &str) -> Result<bool> {
        let start_time = Instant::now();
        let exists = self.objects.lock().contains_key(key);
        self.stats.lock().add_get(start_time, Instant::now(), 0);
        Ok(exists)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        let start_time = Instant::now();
        let objects = self
            .objects
            .lock()
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| StorageObject {
                key: key.clone(),
                last_modified: object.last_modified,
            })
            .collect();

        self.stats.lock().add_list(start_time, Instant::now());
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let bytes = self
            .object(key)
            .ok_or_else(|| Error::ItemNotFound(key.to_owned()))?;

        let size = bytes.len() as u64;
        self.stats.lock().add_get(start_time, Instant::now(), size);
        Ok(bytes)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.check_writable(key)?;

        let start_time = Instant::now();
        let size = bytes.len() as u64;
        let object = MemoryObject {
            bytes,
            last_modified: Utc::now(),
        };

        self.objects.lock().insert(key.to_owned(), object);
        self.stats.lock().add_put(start_time, Instant::now(), size);
        Ok(())
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        self.check_writable(to_key)?;

        let start_time = Instant::now();
        let mut objects = self.objects.lock();
        let object = objects
            .get(from_key)
            .cloned()
            .ok_or_else(|| Error::ItemNotFound(from_key.to_owned()))?;

        objects.insert(to_key.to_owned(), object);
        drop(objects);

        self.stats.lock().add_copy(start_time, Instant::now());
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        self.stats.lock().clone()
    }
}
