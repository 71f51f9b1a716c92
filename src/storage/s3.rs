use std::{io, mem, time::Instant};

use async_channel::Receiver;
use async_trait::async_trait;
use aws_sdk_s3::{
    error::SdkError,
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};

use super::{Storage, StorageObject, StorageStats};

#[derive(Debug)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
    stats: Mutex<StorageStats>,
}

impl S3Storage {
    /// `location` is a bucket name, optionally followed by `/` and a key prefix.
    pub async fn new(location: &str) -> Self {
        let s3_config = aws_config::load_from_env().await;
        let client = Client::new(&s3_config);
        let (bucket, prefix) = match location.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_owned(), format!("{prefix}/")),
            None => (location.to_owned(), String::new()),
        };

        S3Storage {
            client,
            bucket,
            prefix,
            stats: Mutex::new(StorageStats::new()),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    async fn upload_parts(
        &self,
        upload: &PendingUpload,
        first_part: Vec<u8>,
        chunks: &Receiver<Vec<u8>>,
    ) -> Result<u64> {
        let mut parts = vec![];
        let mut size = 0;
        let mut part = first_part;
        while !part.is_empty() {
            let part_number = i32::try_from(parts.len() + 1).map_err(Error::other)?;
            size += part.len() as u64;
            let (bytes, encoded_digest) = spawn_blocking(move || {
                let encoded_digest = md5_base64(&part);
                (part, encoded_digest)
            })
            .await?;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&upload.key)
                .upload_id(&upload.upload_id)
                .part_number(part_number)
                .body(bytes.into())
                .content_md5(encoded_digest)
                .send()
                .await?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(response.e_tag.unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            part = next_part(chunks, MIN_PART_SIZE).await;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await?;

        Ok(size)
    }
}

const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Collects chunks until at least `part_size` bytes are buffered or the
/// channel closes. An empty part means the stream is exhausted.
pub(super) async fn next_part(chunks: &Receiver<Vec<u8>>, part_size: usize) -> Vec<u8> {
    let mut part = vec![];
    while part.len() < part_size {
        let Ok(chunk) = chunks.recv().await else {
            break;
        };
        part.extend_from_slice(&chunk);
    }

    part
}

/// A started multipart upload. Dropping it before completion aborts the
/// upload so no parts are left behind.
struct PendingUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    completed: bool,
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id);
        let key = mem::take(&mut self.key);
        tokio::spawn(async move {
            if let Err(err) = request.send().await {
                warn!("failed to abort multipart upload of {key}: {err}");
            }
        });
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn exists(&self, key: &str) -> Result<bool> {
        let start_time = Instant::now();
        let response_result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(SdkError::into_service_error);

        let exists = match response_result {
            Ok(_) => Ok(true),
            Err(HeadObjectError::NotFound(_)) => Ok(false),
            Err(err) => Err(Error::other(err)),
        }?;

        self.stats.lock().add_get(start_time, Instant::now(), 0);
        Ok(exists)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        let start_time = Instant::now();
        let mut stream = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .into_paginator()
            .send();

        let mut objects = vec![];
        while let Some(page) = stream.try_next().await? {
            for object in page.contents.unwrap_or_default() {
                let Some(full_key) = object.key else {
                    continue;
                };

                let key = full_key
                    .strip_prefix(&self.prefix)
                    .unwrap_or(&full_key)
                    .to_owned();
                let last_modified = object
                    .last_modified
                    .and_then(|time| DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos()))
                    .unwrap_or_default();
                objects.push(StorageObject { key, last_modified });
            }
        }

        self.stats.lock().add_list(start_time, Instant::now());
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|err| match err.into_service_error() {
                GetObjectError::NoSuchKey(_) => Error::ItemNotFound(key.to_owned()),
                err => Error::other(err),
            })?;

        let bytes = response.body.collect().await?.to_vec();

        let size = bytes.len() as u64;
        self.stats.lock().add_get(start_time, Instant::now(), size);
        Ok(bytes)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let size = bytes.len() as u64;
        let (bytes, encoded_digest) = spawn_blocking(move || {
            let encoded_digest = md5_base64(&bytes);
            (bytes, encoded_digest)
        })
        .await?;

        let start_time = Instant::now();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(bytes.into())
            .content_md5(encoded_digest)
            .send()
            .await?;

        self.stats.lock().add_put(start_time, Instant::now(), size);
        Ok(())
    }

    /// Small streams become a single put; anything reaching a full part goes
    /// through a multipart upload.
    async fn put_stream(&self, key: &str, chunks: Receiver<Vec<u8>>) -> Result<()> {
        let first_part = next_part(&chunks, MIN_PART_SIZE).await;
        if first_part.len() < MIN_PART_SIZE {
            return self.put(key, first_part).await;
        }

        let start_time = Instant::now();
        let full_key = self.full_key(key);
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await?;
        let upload_id = response
            .upload_id()
            .ok_or_else(|| Error::other(io::Error::other("multipart upload has no id")))?
            .to_owned();

        let mut upload = PendingUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: full_key,
            upload_id,
            completed: false,
        };
        let size = self.upload_parts(&upload, first_part, &chunks).await?;
        upload.completed = true;

        self.stats.lock().add_put(start_time, Instant::now(), size);
        Ok(())
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        let start_time = Instant::now();
        let copy_source = format!("{}/{}", self.bucket, self.full_key(from_key));
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(self.full_key(to_key))
            .send()
            .await?;

        self.stats.lock().add_copy(start_time, Instant::now());
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        self.stats.lock().clone()
    }
}

fn md5_base64(bytes: &[u8]) -> String {
    let digest = md5::compute(bytes);
    BASE64_STANDARD.encode(digest.0)
}
