//! Content-addressed storage for append-only relation segments.
//!
//! Segments are stored once under a key derived from their relation and
//! modification count. Later backups that see the same key only add a
//! reference instead of uploading the bytes again.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use clap::builder::styling::AnsiColor;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::{
    bundle::SharedBundleFiles,
    error::{Error, Result},
    file::ComposeFileInfo,
    format::{format_key, format_path, format_size},
    packer::FilePacker,
    relation::{RelFileNode, RelFileSegment},
    stats::BackupStats,
    storage::BoxedStorage,
    task::FailFast,
    upload::Uploader,
};

pub const AO_SEGMENTS_DIR: &str = "aosegments";
pub const AO_SEGMENT_SUFFIX: &str = "_aoseg";
pub const AO_FILES_METADATA_NAME: &str = "ao_files_metadata.json";

const READ_CHUNK_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AoStorageType {
    /// Row-oriented append-optimized table.
    Rows,
    /// Column-oriented append-optimized table.
    Columns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AoRelFileMetadata {
    pub relname_md5: String,
    pub storage_type: AoStorageType,
    /// Logical end of file of the segment.
    pub eof: u64,
    pub mod_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AoRelFileEntry {
    #[serde(flatten)]
    pub node: RelFileNode,
    pub segment: u32,
    #[serde(flatten)]
    pub metadata: AoRelFileMetadata,
}

/// Which segment files belong to append-optimized relations.
#[derive(Debug, Clone, Default)]
pub struct AoRelFileStorageMap {
    segments: HashMap<(RelFileNode, u32), AoRelFileMetadata>,
}

impl AoRelFileStorageMap {
    pub fn new() -> Self {
        AoRelFileStorageMap::default()
    }

    pub fn from_entries(entries: Vec<AoRelFileEntry>) -> Self {
        let mut map = AoRelFileStorageMap::new();
        for entry in entries {
            map.insert(entry.node, entry.segment, entry.metadata);
        }

        map
    }

    pub fn insert(&mut self, node: RelFileNode, segment: u32, metadata: AoRelFileMetadata) {
        self.segments.insert((node, segment), metadata);
    }

    pub fn lookup(&self, path: &str) -> Option<(RelFileSegment, &AoRelFileMetadata)> {
        let segment = RelFileSegment::parse(path).ok()?;
        let metadata = self.segments.get(&(segment.node, segment.segment))?;
        Some((segment, metadata))
    }
}

pub fn segment_storage_key(segment: &RelFileSegment, metadata: &AoRelFileMetadata) -> String {
    let node = &segment.node;
    format!(
        "{}_{}_{}_{}_{}_{}{AO_SEGMENT_SUFFIX}",
        node.spc_node,
        node.db_node,
        metadata.relname_md5,
        node.rel_node,
        segment.segment,
        metadata.mod_count
    )
}

pub fn segment_path(key: &str) -> String {
    format!("{AO_SEGMENTS_DIR}/{key}")
}

pub fn reference_path(key: &str, backup_name: &str) -> String {
    format!("{AO_SEGMENTS_DIR}/{key}_backups/{backup_name}")
}

pub fn metadata_path(backup_name: &str) -> String {
    format!("{backup_name}/{AO_FILES_METADATA_NAME}")
}

pub async fn load_base_segment_keys(storage: &BoxedStorage) -> Result<HashSet<String>> {
    let prefix = format!("{AO_SEGMENTS_DIR}/");
    let keys = storage
        .list(&prefix)
        .await?
        .into_iter()
        .filter_map(|object| {
            let key = object.key.strip_prefix(&prefix)?;
            (!key.contains('/') && key.ends_with(AO_SEGMENT_SUFFIX)).then(|| key.to_owned())
        })
        .collect();

    Ok(keys)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AoFileMetadataEntry {
    pub storage_key: String,
    pub is_skipped: bool,
    #[serde(rename = "MTime")]
    pub mtime: DateTime<Utc>,
    pub storage_type: AoStorageType,
    pub eof: u64,
    pub mod_count: u64,
    pub file_mode: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AoFilesMetadata {
    pub files: BTreeMap<String, AoFileMetadataEntry>,
}

/// Uploads append-optimized segments at most once across backups.
#[derive(Debug)]
pub struct SegmentStore {
    backup_name: String,
    uploader: Uploader,
    reference_uploader: Uploader,
    storage_map: Arc<AoRelFileStorageMap>,
    base_keys: HashSet<String>,
    metadata: Mutex<AoFilesMetadata>,
    files: SharedBundleFiles,
    stats: Arc<BackupStats>,
    fail_fast: FailFast,
}

impl SegmentStore {
    pub fn new(
        backup_name: &str,
        uploader: Uploader,
        storage_map: Arc<AoRelFileStorageMap>,
        base_keys: HashSet<String>,
        packer: &FilePacker,
        fail_fast: FailFast,
    ) -> Self {
        SegmentStore {
            backup_name: backup_name.to_owned(),
            reference_uploader: uploader.clone_untracked(),
            uploader,
            storage_map,
            base_keys,
            metadata: Mutex::default(),
            files: packer.files().clone(),
            stats: packer.stats().clone(),
            fail_fast,
        }
    }

    pub fn lookup(&self, info: &ComposeFileInfo) -> Option<(RelFileSegment, AoRelFileMetadata)> {
        self.storage_map
            .lookup(info.name())
            .map(|(segment, metadata)| (segment, metadata.clone()))
    }

    /// Stores one segment file, or only references it when an identical
    /// segment is already in storage.
    pub async fn add_segment(
        &self,
        info: &ComposeFileInfo,
        segment: &RelFileSegment,
        metadata: &AoRelFileMetadata,
    ) -> Result<()> {
        let key = segment_storage_key(segment, metadata);

        let deduplicated = self.base_keys.contains(&key);
        if deduplicated {
            debug!(
                "segment {} already stored as {}",
                format_path(&info.path),
                format_key(&key)
            );
        } else {
            let mut file = match FilePacker::open(info).await {
                Ok(file) => file,
                Err(Error::FileVanished(_)) => {
                    debug!("segment {} vanished", format_path(&info.path));
                    self.files.add_skipped_file(&info.header);
                    self.stats.add_vanished_file();
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            let mut stream = self.uploader.start_stream(segment_path(&key));
            let mut size = 0u64;
            loop {
                if self.fail_fast.is_cancelled() {
                    stream.abort();
                    return Err(Error::Cancelled);
                }

                let mut chunk = vec![0; READ_CHUNK_SIZE];
                let read = file.read(&mut chunk).await?;
                if read == 0 {
                    break;
                }

                chunk.truncate(read);
                size += read as u64;
                stream.send(chunk).await?;
            }
            stream.finish().await?;
            self.stats.add_bytes_read(size);

            let style = AnsiColor::Magenta.on_default();
            let size_style = AnsiColor::BrightBlack.on_default();
            debug!(
                "{style}uploaded segment{style:#} {} {size_style}({}){size_style:#}",
                format_key(&key),
                format_size(size)
            );
        }

        self.reference_uploader
            .upload(&reference_path(&key, &self.backup_name), vec![])
            .await?;

        let entry = AoFileMetadataEntry {
            storage_key: key,
            is_skipped: deduplicated,
            mtime: info.header.modified,
            storage_type: metadata.storage_type,
            eof: metadata.eof,
            mod_count: metadata.mod_count,
            file_mode: info.header.mode,
        };
        self.metadata
            .lock()
            .files
            .insert(info.name().to_owned(), entry);
        self.files.add_file(&info.header, false);
        self.stats.add_segment(deduplicated);
        Ok(())
    }

    pub fn metadata(&self) -> AoFilesMetadata {
        self.metadata.lock().clone()
    }

    pub async fn upload_metadata(&self) -> Result<()> {
        let metadata = self.metadata();
        self.reference_uploader
            .upload_json(&metadata_path(&self.backup_name), &metadata)
            .await
    }
}
