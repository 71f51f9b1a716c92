use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageStats;

/// Counters shared by every task of one backup.
#[derive(Debug)]
pub struct BackupStats {
    pub start_time: DateTime<Utc>,
    files_packed: AtomicU64,
    files_incremented: AtomicU64,
    files_skipped: AtomicU64,
    files_vanished: AtomicU64,
    headers_written: AtomicU64,
    bytes_read: AtomicU64,
    corrupt_blocks: AtomicU64,
    segments_uploaded: AtomicU64,
    segments_deduplicated: AtomicU64,
}

impl Default for BackupStats {
    fn default() -> Self {
        BackupStats::new()
    }
}

fn bump(counter: &AtomicU64, amount: u64) {
    counter.fetch_add(amount, Ordering::Relaxed);
}

impl BackupStats {
    pub fn new() -> Self {
        BackupStats {
            start_time: Utc::now(),
            files_packed: AtomicU64::new(0),
            files_incremented: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_vanished: AtomicU64::new(0),
            headers_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            corrupt_blocks: AtomicU64::new(0),
            segments_uploaded: AtomicU64::new(0),
            segments_deduplicated: AtomicU64::new(0),
        }
    }

    pub fn add_packed_file(&self, incremented: bool) {
        bump(&self.files_packed, 1);
        if incremented {
            bump(&self.files_incremented, 1);
        }
    }

    pub fn add_skipped_file(&self) {
        bump(&self.files_skipped, 1);
    }

    pub fn add_vanished_file(&self) {
        bump(&self.files_skipped, 1);
        bump(&self.files_vanished, 1);
    }

    pub fn add_header(&self) {
        bump(&self.headers_written, 1);
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        bump(&self.bytes_read, bytes);
    }

    pub fn add_corrupt_blocks(&self, count: u64) {
        bump(&self.corrupt_blocks, count);
    }

    pub fn add_segment(&self, deduplicated: bool) {
        if deduplicated {
            bump(&self.segments_deduplicated, 1);
        } else {
            bump(&self.segments_uploaded, 1);
        }
    }

    pub fn finalize(
        &self,
        uploaded_size: u64,
        containers_retired: usize,
        storage: StorageStats,
    ) -> FinalizedBackupStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        FinalizedBackupStats {
            start_time: self.start_time,
            end_time: Utc::now(),
            files_packed: load(&self.files_packed),
            files_incremented: load(&self.files_incremented),
            files_skipped: load(&self.files_skipped),
            files_vanished: load(&self.files_vanished),
            headers_written: load(&self.headers_written),
            bytes_read: load(&self.bytes_read),
            corrupt_blocks: load(&self.corrupt_blocks),
            segments_uploaded: load(&self.segments_uploaded),
            segments_deduplicated: load(&self.segments_deduplicated),
            containers_retired: containers_retired as u64,
            bytes_uploaded: uploaded_size,
            storage_bytes_uploaded: storage.bytes_uploaded,
            storage_requests: storage.get_requests
                + storage.put_requests
                + storage.list_requests
                + storage.copy_requests,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedBackupStats {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub files_packed: u64,
    pub files_incremented: u64,
    pub files_skipped: u64,
    pub files_vanished: u64,
    pub headers_written: u64,
    pub bytes_read: u64,
    pub corrupt_blocks: u64,
    pub segments_uploaded: u64,
    pub segments_deduplicated: u64,
    pub containers_retired: u64,
    pub bytes_uploaded: u64,
    pub storage_bytes_uploaded: u64,
    pub storage_requests: u64,
}

impl FinalizedBackupStats {
    pub fn elapsed_time(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or_default()
    }
}
