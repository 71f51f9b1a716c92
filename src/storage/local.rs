use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_channel::Receiver;
use async_trait::async_trait;
use async_walkdir::WalkDir;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    time::sleep,
};
use tokio_stream::StreamExt;

use crate::error::{Error, Result};

use super::{Storage, StorageObject, StorageStats};

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug)]
pub struct LocalStorage {
    path: PathBuf,
    latency: Option<Duration>,
    stats: Mutex<StorageStats>,
}

impl LocalStorage {
    pub fn new(path: PathBuf, latency: Option<Duration>) -> Self {
        LocalStorage {
            path,
            latency,
            stats: Mutex::new(StorageStats::new()),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }

    async fn create_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            match fs::create_dir_all(parent).await {
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
                result => result,
            }?;
        }

        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            sleep(latency).await;
        }
    }

    fn key_from_path(&self, path: &Path) -> Option<String> {
        let relative_path = path.strip_prefix(&self.path).ok()?;
        let parts: Vec<_> = relative_path
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.simulate_latency().await;

        let start_time = Instant::now();
        let path = self.object_path(key);
        let exists = fs::try_exists(path).await?;
        self.stats.lock().add_get(start_time, Instant::now(), 0);
        Ok(exists)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        self.simulate_latency().await;

        let start_time = Instant::now();
        let mut objects = vec![];
        if fs::try_exists(&self.path).await? {
            let mut walker = WalkDir::new(&self.path);
            while let Some(entry) = walker.try_next().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }

                let path = entry.path();
                let Some(key) = self.key_from_path(&path) else {
                    continue;
                };

                if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(prefix) {
                    continue;
                }

                let modified = entry.metadata().await?.modified()?;
                objects.push(StorageObject {
                    key,
                    last_modified: DateTime::<Utc>::from(modified),
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        self.stats.lock().add_list(start_time, Instant::now());
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.simulate_latency().await;

        let start_time = Instant::now();
        let path = self.object_path(key);
        let bytes = match fs::read(path).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(Error::ItemNotFound(key.to_owned()))
            }
            result => Ok(result?),
        }?;

        let size = bytes.len() as u64;
        self.stats.lock().add_get(start_time, Instant::now(), size);
        Ok(bytes)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.simulate_latency().await;

        let start_time = Instant::now();
        let path = self.object_path(key);
        Self::create_parent_dir(&path).await?;
        fs::write(path, &bytes).await?;

        let size = bytes.len() as u64;
        self.stats.lock().add_put(start_time, Instant::now(), size);
        Ok(())
    }

    async fn put_stream(&self, key: &str, chunks: Receiver<Vec<u8>>) -> Result<()> {
        self.simulate_latency().await;

        let start_time = Instant::now();
        let path = self.object_path(key);
        let mut partial_path = path.clone().into_os_string();
        partial_path.push(PARTIAL_SUFFIX);
        let partial_path = PathBuf::from(partial_path);

        Self::create_parent_dir(&path).await?;
        let mut file = File::create(&partial_path).await?;
        let mut size = 0;
        while let Ok(chunk) = chunks.recv().await {
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        drop(file);
        fs::rename(&partial_path, &path).await?;

        self.stats.lock().add_put(start_time, Instant::now(), size);
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        self.stats.lock().clone()
    }
}
