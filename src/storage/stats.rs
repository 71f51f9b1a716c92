use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub get_requests: u64,
    pub put_requests: u64,
    pub list_requests: u64,
    pub copy_requests: u64,
    pub request_time: Duration,
}

impl StorageStats {
    pub fn new() -> Self {
        StorageStats::default()
    }

    pub fn add_get(&mut self, start_time: Instant, end_time: Instant, size: u64) {
        self.get_requests += 1;
        self.bytes_downloaded += size;
        self.request_time += end_time - start_time;
    }

    pub fn add_put(&mut self, start_time: Instant, end_time: Instant, size: u64) {
        self.put_requests += 1;
        self.bytes_uploaded += size;
        self.request_time += end_time - start_time;
    }

    pub fn add_list(&mut self, start_time: Instant, end_time: Instant) {
        self.list_requests += 1;
        self.request_time += end_time - start_time;
    }

    pub fn add_copy(&mut self, start_time: Instant, end_time: Instant) {
        self.copy_requests += 1;
        self.request_time += end_time - start_time;
    }
}
