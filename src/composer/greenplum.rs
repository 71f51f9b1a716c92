use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::{
    bundle::{SharedBundleFiles, TarFileSetMap},
    error::{Error, Result},
    file::{ComposeFileInfo, FileHeader},
    segment::SegmentStore,
    task::TaskGroup,
};

use super::{ComposeContext, Composer, ComposerKind};

/// Sends append-optimized segments to the [`SegmentStore`] and packs the rest.
pub struct GreenplumComposer {
    context: Arc<ComposeContext>,
    segments: Arc<SegmentStore>,
    tasks: TaskGroup,
}

impl GreenplumComposer {
    pub fn new(context: Arc<ComposeContext>) -> Result<Self> {
        let segments = context
            .segment_store
            .clone()
            .ok_or(Error::MissingComposerInput {
                composer: "greenplum",
                input: "an append-optimized segment store",
            })?;
        let tasks = TaskGroup::bounded(
            context.config.upload_disk_concurrency,
            context.fail_fast().clone(),
        );

        Ok(GreenplumComposer {
            context,
            segments,
            tasks,
        })
    }
}

#[async_trait]
impl Composer for GreenplumComposer {
    fn kind(&self) -> ComposerKind {
        ComposerKind::Greenplum
    }

    async fn add_file(&mut self, info: ComposeFileInfo) -> Result<()> {
        let context = self.context.clone();
        let segments = self.segments.clone();
        self.tasks
            .spawn(async move {
                if info.is_unreadable {
                    context.skip_file(&info.header);
                    return Ok(());
                }

                match segments.lookup(&info) {
                    Some((segment, metadata)) => {
                        segments.add_segment(&info, &segment, &metadata).await
                    }
                    None => context.pack_file(&info).await,
                }
            })
            .await
    }

    async fn add_header(&mut self, header: FileHeader) -> Result<()> {
        self.context.write_header(&header).await
    }

    fn skip_file(&mut self, header: &FileHeader) {
        self.context.skip_file(header);
    }

    async fn finish_composing(mut self: Box<Self>) -> Result<TarFileSetMap> {
        let waited = self.tasks.wait().await;
        let tar_file_sets = self.context.finish(waited).await?;

        self.segments.upload_metadata().await?;
        debug!(
            "uploaded metadata of {} append-optimized segments",
            self.segments.metadata().files.len()
        );
        Ok(tar_file_sets)
    }

    fn files(&self) -> SharedBundleFiles {
        self.context.files().clone()
    }
}
