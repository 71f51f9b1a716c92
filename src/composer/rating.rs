use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use log::debug;

use crate::{
    bundle::{SharedBundleFiles, TarFileSetMap},
    error::Result,
    file::{ComposeFileInfo, FileHeader},
    task::TaskGroup,
};

use super::{ComposeContext, Composer, ComposerKind};

#[derive(Debug, Clone)]
struct RatedFile {
    info: ComposeFileInfo,
    rating: u64,
    expected_size: u64,
}

/// Groups files by how often their relations change.
///
/// Rarely updated files end up sharing containers, which a later copy
/// backup can then reuse as a whole.
pub struct RatingComposer {
    context: Arc<ComposeContext>,
    files: Vec<RatedFile>,
    headers: Vec<FileHeader>,
}

impl RatingComposer {
    pub fn new(context: Arc<ComposeContext>) -> Self {
        RatingComposer {
            context,
            files: vec![],
            headers: vec![],
        }
    }

    /// Update count of the file, relative to the previous backup's count
    /// when the file was already there.
    fn rating(&self, info: &ComposeFileInfo) -> u64 {
        let updates = self
            .context
            .statistics
            .as_ref()
            .map_or(0, |statistics| statistics.file_update_count(info.name()));

        let previous_updates = self
            .context
            .previous
            .as_ref()
            .and_then(|previous| previous.files().get(info.name()))
            .map_or(0, |description| description.updates_count);

        if previous_updates == 0 {
            updates
        } else {
            updates.saturating_mul(100) / previous_updates
        }
    }
}

/// Cuts files sorted by rating into the sets that share a container.
///
/// A new set starts once the current one outgrew `threshold`, and where the
/// ratings move from unchanged to changed.
fn collections(files: Vec<RatedFile>, threshold: u64) -> Vec<Vec<ComposeFileInfo>> {
    let mut collections = vec![];
    let mut current = vec![];
    let mut current_size = 0u64;
    let mut previous_rating = 0u64;

    for file in files.into_iter().sorted_by_key(|file| file.rating) {
        let rating_jump = previous_rating == 0 && file.rating > 0;
        if !current.is_empty() && (current_size > threshold || rating_jump) {
            collections.push(std::mem::take(&mut current));
            current_size = 0;
        }

        previous_rating = file.rating;
        current_size += file.expected_size;
        current.push(file.info);
    }

    if !current.is_empty() {
        collections.push(current);
    }

    collections
}

async fn pack_collection(context: Arc<ComposeContext>, files: Vec<ComposeFileInfo>) -> Result<()> {
    let mut container = context.queue.checkout().await?;
    for info in &files {
        match context.packer.pack(info, &mut container).await {
            Ok(outcome) => {
                if outcome.is_packed() {
                    context.tar_file_sets.add_file(container.name(), info.name());
                }
            }
            Err(err) => {
                context.queue.discard(container)?;
                return Err(err);
            }
        }
    }

    context.queue.checkin_and_retire(container).await
}

#[async_trait]
impl Composer for RatingComposer {
    fn kind(&self) -> ComposerKind {
        ComposerKind::Rating
    }

    async fn add_file(&mut self, info: ComposeFileInfo) -> Result<()> {
        let rating = self.rating(&info);
        let expected_size = self.context.packer.expected_size(&info);
        self.files.push(RatedFile {
            info,
            rating,
            expected_size,
        });
        Ok(())
    }

    async fn add_header(&mut self, header: FileHeader) -> Result<()> {
        self.headers.push(header);
        Ok(())
    }

    fn skip_file(&mut self, header: &FileHeader) {
        self.context.skip_file(header);
    }

    async fn finish_composing(self: Box<Self>) -> Result<TarFileSetMap> {
        let RatingComposer {
            context,
            files,
            headers,
        } = *self;

        let written = write_headers(&context, &headers).await;
        if let Err(err) = written {
            return context.finish(Err(err)).await;
        }

        let collections = collections(files, context.config.tar_size_threshold);
        debug!("packing {} rated collections", collections.len());

        let mut tasks = TaskGroup::bounded(
            context.config.upload_disk_concurrency,
            context.fail_fast().clone(),
        );
        let mut spawned = Ok(());
        for collection in collections {
            spawned = tasks
                .spawn(pack_collection(context.clone(), collection))
                .await;
            if spawned.is_err() {
                break;
            }
        }

        let waited = tasks.wait().await.and(spawned);
        context.finish(waited).await
    }

    fn files(&self) -> SharedBundleFiles {
        self.context.files().clone()
    }
}

/// Writes every header into one container, which stays in the pool.
async fn write_headers(context: &ComposeContext, headers: &[FileHeader]) -> Result<()> {
    if headers.is_empty() {
        return Ok(());
    }

    let mut container = context.queue.checkout().await?;
    for header in headers {
        if let Err(err) = container.append_header(header).await {
            context.queue.discard(container)?;
            return Err(err);
        }

        context.record_header(container.name(), header);
    }

    context.queue.checkin(container)
}

#[cfg(test)]
pub(super) fn collection_names(
    files: Vec<(ComposeFileInfo, u64, u64)>,
    threshold: u64,
) -> Vec<Vec<String>> {
    let files = files
        .into_iter()
        .map(|(info, rating, expected_size)| RatedFile {
            info,
            rating,
            expected_size,
        })
        .collect();

    collections(files, threshold)
        .into_iter()
        .map(|collection| {
            collection
                .iter()
                .map(|info| info.name().to_owned())
                .collect()
        })
        .collect()
}
