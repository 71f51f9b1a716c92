mod entry;
mod metadata;

use std::path::PathBuf;

pub use self::{
    entry::{append_header, padding_len},
    metadata::{EntryKind, FileHeader},
};

/// A regular file offered to a composer. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct ComposeFileInfo {
    pub path: PathBuf,
    pub header: FileHeader,
    pub is_unreadable: bool,
}

impl ComposeFileInfo {
    pub fn new(path: PathBuf, header: FileHeader, is_unreadable: bool) -> Self {
        ComposeFileInfo {
            path,
            header,
            is_unreadable,
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }
}

#[cfg(test)]
mod tests;
