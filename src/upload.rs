use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::anyhow;
use async_channel::Sender;
use log::trace;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    error::{Error, Result},
    format::{format_key, format_size},
    storage::BoxedStorage,
    transform::BoxedTransform,
};

const STREAM_BUFFER_CHUNKS: usize = 4;

/// Storage plus the transform and byte accounting shared by one backup.
#[derive(Debug, Clone)]
pub struct Uploader {
    storage: BoxedStorage,
    transform: BoxedTransform,
    uploaded_size: Option<Arc<AtomicU64>>,
}

impl Uploader {
    pub fn new(storage: BoxedStorage, transform: BoxedTransform) -> Self {
        Uploader {
            storage,
            transform,
            uploaded_size: Some(Arc::new(AtomicU64::new(0))),
        }
    }

    /// A clone that shares storage and transform but does not count bytes.
    pub fn clone_untracked(&self) -> Self {
        Uploader {
            uploaded_size: None,
            ..self.clone()
        }
    }

    pub fn storage(&self) -> &BoxedStorage {
        &self.storage
    }

    pub fn transform(&self) -> &BoxedTransform {
        &self.transform
    }

    pub fn uploaded_size(&self) -> u64 {
        self.uploaded_size
            .as_ref()
            .map_or(0, |size| size.load(Ordering::Relaxed))
    }

    fn track(&self, size: usize) {
        if let Some(uploaded_size) = &self.uploaded_size {
            uploaded_size.fetch_add(size as u64, Ordering::Relaxed);
        }
    }

    pub async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let size = bytes.len();
        self.storage.put(key, bytes).await?;
        self.track(size);
        trace!("uploaded {} ({})", format_key(key), format_size(size));
        Ok(())
    }

    pub async fn upload_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.upload(key, bytes).await
    }

    /// Spawns a streaming upload to `key` fed by [`UploadStream::send`].
    pub fn start_stream(&self, key: String) -> UploadStream {
        let (sender, receiver) = async_channel::bounded(STREAM_BUFFER_CHUNKS);
        let storage = self.storage.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move { storage.put_stream(&task_key, receiver).await });

        UploadStream {
            key,
            uploader: self.clone(),
            sender: Some(sender),
            handle: Some(handle),
        }
    }
}

/// The producer side of one streaming upload.
///
/// Dropping a stream before [`UploadStream::finish`] aborts the upload.
#[derive(Debug)]
pub struct UploadStream {
    key: String,
    uploader: Uploader,
    sender: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl UploadStream {
    pub async fn send(&mut self, chunk: Vec<u8>) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let size = chunk.len();
        let sent = match &self.sender {
            Some(sender) => sender.send(chunk).await.is_ok(),
            None => false,
        };

        if sent {
            self.uploader.track(size);
            return Ok(());
        }

        self.sender = None;
        match self.join().await {
            Err(err) => Err(err),
            Ok(()) => Err(anyhow!("upload of `{}` ended early", self.key).into()),
        }
    }

    /// Closes the stream and waits for storage to acknowledge it.
    pub async fn finish(mut self) -> Result<()> {
        self.sender = None;
        self.join().await
    }

    pub fn abort(mut self) {
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    async fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.map_err(Error::from)?,
            None => Ok(()),
        }
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
