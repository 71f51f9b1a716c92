use std::{future::Future, sync::Arc};

use log::debug;
use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Shared failure state for one unit of work.
///
/// The first error recorded wins and cancels the token; later errors are
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct FailFast {
    token: CancellationToken,
    first_error: Arc<Mutex<Option<Error>>>,
}

impl FailFast {
    pub fn new() -> Self {
        FailFast::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn fail(&self, error: Error) {
        let mut first_error = self.first_error.lock();
        if first_error.is_none() {
            *first_error = Some(error);
        } else {
            debug!("discarded error after failure: {error}");
        }

        drop(first_error);
        self.token.cancel();
    }

    pub fn check(&self) -> Result<()> {
        if let Some(err) = self.first_error.lock().take() {
            Err(err)
        } else if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A join set whose tasks report into a [`FailFast`].
pub struct TaskGroup {
    join_set: JoinSet<()>,
    semaphore: Option<Arc<Semaphore>>,
    fail_fast: FailFast,
}

impl TaskGroup {
    pub fn new(fail_fast: FailFast) -> Self {
        TaskGroup {
            join_set: JoinSet::new(),
            semaphore: None,
            fail_fast,
        }
    }

    pub fn bounded(max_tasks: usize, fail_fast: FailFast) -> Self {
        TaskGroup {
            join_set: JoinSet::new(),
            semaphore: Some(Arc::new(Semaphore::new(max_tasks))),
            fail_fast,
        }
    }

    pub fn fail_fast(&self) -> &FailFast {
        &self.fail_fast
    }

    pub async fn spawn<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = if let Some(semaphore) = &self.semaphore {
            let token = self.fail_fast.token().clone();
            tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                permit = semaphore.clone().acquire_owned() => Some(permit?),
            }
        } else {
            None
        };

        let fail_fast = self.fail_fast.clone();
        self.join_set.spawn(async move {
            if let Err(err) = task.await {
                fail_fast.fail(err);
            }

            drop(permit);
        });

        while let Some(result) = self.join_set.try_join_next() {
            if let Err(err) = result {
                self.fail_fast.fail(err.into());
            }
        }

        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.join_set.len()
    }

    /// Waits for every spawned task and returns the first recorded error.
    pub async fn wait(&mut self) -> Result<()> {
        while let Some(result) = self.join_set.join_next().await {
            if let Err(err) = result {
                self.fail_fast.fail(err.into());
            }
        }

        self.fail_fast.check()
    }
}
