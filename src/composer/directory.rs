use std::sync::Arc;

use async_trait::async_trait;
use log::trace;

use crate::{
    bundle::{SharedBundleFiles, TarFileSetMap},
    error::Result,
    file::{ComposeFileInfo, FileHeader},
    format::format_path,
    task::TaskGroup,
};

use super::{ComposeContext, Composer, ComposerKind};

/// Packs only the files beneath one subdirectory of the data directory.
///
/// Everything else is recorded as skipped without being opened. Headers are
/// always written so the directory layout survives a restore.
pub struct DirectoryComposer {
    context: Arc<ComposeContext>,
    prefix: String,
    tasks: TaskGroup,
}

impl DirectoryComposer {
    pub fn new(context: Arc<ComposeContext>) -> Self {
        let prefix = format!("{}/", context.config.directory.trim_end_matches('/'));
        let tasks = TaskGroup::bounded(
            context.config.upload_disk_concurrency,
            context.fail_fast().clone(),
        );

        DirectoryComposer {
            context,
            prefix,
            tasks,
        }
    }

    fn is_selected(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }
}

#[async_trait]
impl Composer for DirectoryComposer {
    fn kind(&self) -> ComposerKind {
        ComposerKind::Directory
    }

    async fn add_file(&mut self, info: ComposeFileInfo) -> Result<()> {
        if !self.is_selected(info.name()) {
            trace!("{} is outside {}", format_path(&info.path), self.prefix);
            self.context.skip_file(&info.header);
            return Ok(());
        }

        let context = self.context.clone();
        self.tasks
            .spawn(async move { context.pack_file(&info).await })
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
        self.context.finish(waited).await
    }

    fn files(&self) -> SharedBundleFiles {
        self.context.files().clone()
    }
}
