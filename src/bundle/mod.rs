//! Per-backup indexes of what happened to every file.

mod tar_file_sets;

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{file::FileHeader, relation::RelFileStatistics};

pub use self::tar_file_sets::{
    NopTarFileSets, RegularTarFileSets, SharedTarFileSets, TarFileSetMap, TarFileSets,
};

pub const MAX_CORRUPT_BLOCKS_IN_FILE_DESC: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CorruptBlocksInfo {
    pub corrupted_blocks_count: usize,
    pub some_corrupted_blocks: Vec<u32>,
}

impl CorruptBlocksInfo {
    pub fn new(blocks: &[u32], store_all: bool) -> Self {
        let kept = if store_all {
            blocks
        } else {
            &blocks[..blocks.len().min(MAX_CORRUPT_BLOCKS_IN_FILE_DESC)]
        };

        CorruptBlocksInfo {
            corrupted_blocks_count: blocks.len(),
            some_corrupted_blocks: kept.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupFileDescription {
    pub is_incremented: bool,
    pub is_skipped: bool,
    pub mtime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrupt_blocks: Option<CorruptBlocksInfo>,
    #[serde(default)]
    pub updates_count: u64,
}

impl BackupFileDescription {
    pub fn new(is_incremented: bool, is_skipped: bool, mtime: DateTime<Utc>) -> Self {
        BackupFileDescription {
            is_incremented,
            is_skipped,
            mtime,
            corrupt_blocks: None,
            updates_count: 0,
        }
    }
}

pub type FileDescriptions = BTreeMap<String, BackupFileDescription>;

/// Append-only record of one description per processed path.
pub trait BundleFiles: Debug + Send + Sync {
    fn add_description(&self, name: &str, description: BackupFileDescription);

    fn files(&self) -> FileDescriptions;

    fn add_skipped_file(&self, header: &FileHeader) {
        let description = BackupFileDescription::new(false, true, header.modified);
        self.add_description(&header.name, description);
    }

    fn add_file(&self, header: &FileHeader, is_incremented: bool) {
        let description = BackupFileDescription::new(is_incremented, false, header.modified);
        self.add_description(&header.name, description);
    }

    fn add_file_with_corrupt_blocks(
        &self,
        header: &FileHeader,
        is_incremented: bool,
        corrupt_blocks: &[u32],
        store_all_corrupt_blocks: bool,
    ) {
        let mut description = BackupFileDescription::new(is_incremented, false, header.modified);
        if !corrupt_blocks.is_empty() {
            description.corrupt_blocks = Some(CorruptBlocksInfo::new(
                corrupt_blocks,
                store_all_corrupt_blocks,
            ));
        }

        self.add_description(&header.name, description);
    }
}

pub type SharedBundleFiles = Arc<dyn BundleFiles>;

fn insert_once(files: &mut FileDescriptions, name: &str, description: BackupFileDescription) {
    if files.insert(name.to_owned(), description).is_some() {
        warn!("file {name} was recorded more than once");
    }
}

#[derive(Debug, Default)]
pub struct RegularBundleFiles {
    files: Mutex<FileDescriptions>,
}

impl RegularBundleFiles {
    pub fn new() -> Self {
        RegularBundleFiles::default()
    }
}

impl BundleFiles for RegularBundleFiles {
    fn add_description(&self, name: &str, description: BackupFileDescription) {
        insert_once(&mut self.files.lock(), name, description);
    }

    fn files(&self) -> FileDescriptions {
        self.files.lock().clone()
    }
}

/// Like [`RegularBundleFiles`], with update counts from relation statistics.
#[derive(Debug)]
pub struct StatBundleFiles {
    files: Mutex<FileDescriptions>,
    statistics: Arc<RelFileStatistics>,
}

impl StatBundleFiles {
    pub fn new(statistics: Arc<RelFileStatistics>) -> Self {
        StatBundleFiles {
            files: Mutex::default(),
            statistics,
        }
    }
}

impl BundleFiles for StatBundleFiles {
    fn add_description(&self, name: &str, mut description: BackupFileDescription) {
        description.updates_count = self.statistics.file_update_count(name);
        insert_once(&mut self.files.lock(), name, description);
    }

    fn files(&self) -> FileDescriptions {
        self.files.lock().clone()
    }
}

#[derive(Debug, Default)]
pub struct NopBundleFiles;

impl BundleFiles for NopBundleFiles {
    fn add_description(&self, _name: &str, _description: BackupFileDescription) {}

    fn files(&self) -> FileDescriptions {
        FileDescriptions::new()
    }
}

#[cfg(test)]
mod tests;
