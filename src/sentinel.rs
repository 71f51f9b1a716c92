use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    bundle::{FileDescriptions, TarFileSetMap},
    composer::ComposerKind,
    error::{Error, Result},
    storage::BoxedStorage,
};

pub const SENTINEL_SUFFIX: &str = "_backup_stop_sentinel.json";

pub fn sentinel_path(backup_name: &str) -> String {
    format!("{backup_name}{SENTINEL_SUFFIX}")
}

/// The document that marks a backup as complete.
///
/// Written last, and only when every container and metadata document of the
/// backup is already stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupSentinel {
    pub tar_file_sets: TarFileSetMap,
    #[serde(default)]
    pub files: FileDescriptions,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_from_lsn: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub composer: ComposerKind,
}

/// A completed backup that a new one is built on.
#[derive(Debug, Clone)]
pub struct PreviousBackup {
    pub name: String,
    pub sentinel: BackupSentinel,
}

impl PreviousBackup {
    pub async fn load(storage: &BoxedStorage, name: &str) -> Result<Arc<Self>> {
        let bytes = match storage.try_get(&sentinel_path(name)).await? {
            Some(bytes) => bytes,
            None => return Err(Error::BackupNotFound(name.to_owned())),
        };

        let sentinel = serde_json::from_slice(&bytes)?;
        Ok(Arc::new(PreviousBackup {
            name: name.to_owned(),
            sentinel,
        }))
    }

    pub fn files(&self) -> &FileDescriptions {
        &self.sentinel.files
    }

    pub fn tar_file_sets(&self) -> &TarFileSetMap {
        &self.sentinel.tar_file_sets
    }
}
