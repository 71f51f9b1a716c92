use std::sync::{
    atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use async_channel::{Receiver, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    error::{Error, Result},
    task::FailFast,
    upload::Uploader,
};

use super::Container;

#[derive(Debug, Default)]
struct Counters {
    next_number: AtomicU32,
    retired_size: AtomicU64,
    checked_out: AtomicUsize,
    peak_checked_out: AtomicUsize,
}

/// A fixed pool of containers shared by concurrent packing tasks.
///
/// Holds `capacity` containers at all times, so at most that many files are
/// packed at once. Checking out blocks while every container is busy.
#[derive(Debug, Clone)]
pub struct ContainerQueue {
    sender: Sender<Container>,
    receiver: Receiver<Container>,
    capacity: usize,
    tar_size_threshold: u64,
    backup_name: Arc<str>,
    uploader: Uploader,
    fail_fast: FailFast,
    counters: Arc<Counters>,
    retired: Arc<Mutex<Vec<String>>>,
}

impl ContainerQueue {
    pub fn new(
        capacity: usize,
        tar_size_threshold: u64,
        backup_name: &str,
        uploader: Uploader,
        fail_fast: FailFast,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConcurrency {
                name: "upload concurrency",
            });
        }

        let (sender, receiver) = async_channel::bounded(capacity);
        let queue = ContainerQueue {
            sender,
            receiver,
            capacity,
            tar_size_threshold,
            backup_name: backup_name.into(),
            uploader,
            fail_fast,
            counters: Arc::default(),
            retired: Arc::default(),
        };

        for _ in 0..capacity {
            queue.put_back(queue.fresh_container())?;
        }

        Ok(queue)
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn fail_fast(&self) -> &FailFast {
        &self.fail_fast
    }

    pub fn fresh_container(&self) -> Container {
        let number = self.counters.next_number.fetch_add(1, Ordering::SeqCst) + 1;
        Container::new(number, &self.backup_name, self.uploader.clone())
    }

    fn put_back(&self, container: Container) -> Result<()> {
        self.sender
            .try_send(container)
            .map_err(|_| Error::QueueClosed)
    }

    /// Waits for an idle container, or fails once the backup is cancelled.
    pub async fn checkout(&self) -> Result<Container> {
        let token = self.fail_fast.token().clone();
        let container = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            container = self.receiver.recv() => container.map_err(|_| Error::QueueClosed)?,
        };

        let checked_out = self.counters.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_checked_out
            .fetch_max(checked_out, Ordering::SeqCst);
        Ok(container)
    }

    pub fn checkin(&self, container: Container) -> Result<()> {
        self.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
        self.put_back(container)
    }

    /// Returns a container, first retiring it when it grew past the threshold.
    ///
    /// A retired container is replaced by a fresh one, so the pool never
    /// shrinks. After cancellation the container is discarded instead.
    pub async fn checkin_and_maybe_retire(&self, container: Container) -> Result<()> {
        if container.size() <= self.tar_size_threshold && !self.fail_fast.is_cancelled() {
            return self.checkin(container);
        }

        self.checkin_and_retire(container).await
    }

    pub async fn checkin_and_retire(&self, mut container: Container) -> Result<()> {
        if self.fail_fast.is_cancelled() {
            self.discard(container)?;
            return Err(Error::Cancelled);
        }

        let retired = self.retire(&mut container).await;
        if retired.is_err() {
            container.abort();
        }

        self.checkin(self.fresh_container())?;
        retired
    }

    /// Drops a container whose contents are incomplete, keeping the pool size.
    pub fn discard(&self, mut container: Container) -> Result<()> {
        container.abort();
        self.checkin(self.fresh_container())
    }

    async fn retire(&self, container: &mut Container) -> Result<()> {
        let written = container.is_written();
        container.retire().await?;

        if written {
            self.counters
                .retired_size
                .fetch_add(container.size(), Ordering::SeqCst);
            self.retired.lock().push(container.name().to_owned());
        }

        Ok(())
    }

    /// Drains the pool and retires every container that holds data.
    ///
    /// Must only be called once every checked out container was returned.
    /// If the backup failed, containers are discarded and the first error is
    /// returned.
    pub async fn finish(&self) -> Result<()> {
        let mut containers = Vec::with_capacity(self.capacity);
        for _ in 0..self.capacity {
            match self.receiver.try_recv() {
                Ok(container) => containers.push(container),
                Err(_) => {
                    warn!("container queue finished with a container still checked out");
                    break;
                }
            }
        }
        self.sender.close();

        for mut container in containers {
            if self.fail_fast.is_cancelled() {
                container.abort();
                continue;
            }

            if let Err(err) = self.retire(&mut container).await {
                container.abort();
                self.fail_fast.fail(err);
            }
        }

        debug!(
            "container queue finished, {} containers retired",
            self.retired.lock().len()
        );
        self.fail_fast.check()
    }

    pub fn all_containers_size(&self) -> u64 {
        self.counters.retired_size.load(Ordering::SeqCst)
    }

    pub fn retired_containers(&self) -> Vec<String> {
        let mut retired = self.retired.lock().clone();
        retired.sort();
        retired
    }

    pub fn peak_checked_out(&self) -> usize {
        self.counters.peak_checked_out.load(Ordering::SeqCst)
    }
}
