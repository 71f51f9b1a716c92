use std::os::unix::fs::MetadataExt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Archive header of one data directory entry; `name` is relative to the
/// data directory and uses `/` separators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub name: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub link_target: Option<String>,
}

impl FileHeader {
    pub fn from_native(
        name: String,
        kind: EntryKind,
        native: &std::fs::Metadata,
        link_target: Option<String>,
    ) -> Self {
        let size = if kind == EntryKind::File {
            native.len()
        } else {
            0
        };

        FileHeader {
            name,
            kind,
            mode: native.mode() & 0o7777,
            uid: native.uid(),
            gid: native.gid(),
            size,
            modified: native.modified().map(Into::into).unwrap_or_default(),
            link_target,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}
