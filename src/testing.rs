//! Fixtures shared by unit tests.

use std::{path::Path, sync::Arc};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    file::{ComposeFileInfo, EntryKind, FileHeader},
    storage::MemoryStorage,
    transform::Identity,
    upload::Uploader,
};

pub fn valid_page(block_size: u32, lsn: u64, fill: u8) -> Vec<u8> {
    let mut page = vec![fill; block_size as usize];
    let special = u16::try_from(block_size).unwrap_or(0x8000);
    let page_size_version = u16::try_from(block_size & 0xFF00).unwrap() | 4;
    page[0..4].copy_from_slice(&((lsn >> 32) as u32).to_le_bytes());
    page[4..8].copy_from_slice(&(lsn as u32).to_le_bytes());
    page[8..12].copy_from_slice(&[0; 4]);
    page[12..14].copy_from_slice(&24u16.to_le_bytes());
    page[14..16].copy_from_slice(&special.to_le_bytes());
    page[16..18].copy_from_slice(&special.to_le_bytes());
    page[18..20].copy_from_slice(&page_size_version.to_le_bytes());
    page[20..24].copy_from_slice(&[0; 4]);
    page
}

pub fn mtime(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

pub fn file_header(name: &str, size: u64, modified: DateTime<Utc>) -> FileHeader {
    FileHeader {
        name: name.to_owned(),
        kind: EntryKind::File,
        mode: 0o600,
        uid: 1000,
        gid: 1000,
        size,
        modified,
        link_target: None,
    }
}

/// Writes `contents` under `root` and describes it the way the walker would.
pub fn write_file(root: &Path, name: &str, contents: &[u8]) -> ComposeFileInfo {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }

    std::fs::write(&path, contents).unwrap();
    let header = file_header(name, contents.len() as u64, mtime(1_700_000_000));
    ComposeFileInfo::new(path, header, false)
}

pub fn missing_file(root: &Path, name: &str, size: u64) -> ComposeFileInfo {
    let header = file_header(name, size, mtime(1_700_000_000));
    ComposeFileInfo::new(root.join(name), header, false)
}

pub fn memory_uploader() -> (Arc<MemoryStorage>, Uploader) {
    uploader_for(MemoryStorage::new())
}

pub fn uploader_for(storage: MemoryStorage) -> (Arc<MemoryStorage>, Uploader) {
    let storage = Arc::new(storage);
    let uploader = Uploader::new(storage.clone(), Arc::new(Identity));
    (storage, uploader)
}

pub fn tar_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = vec![];
            entry.read_to_end(&mut body).unwrap();
            (path, body)
        })
        .collect()
}
