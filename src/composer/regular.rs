use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    bundle::{SharedBundleFiles, TarFileSetMap},
    error::Result,
    file::{ComposeFileInfo, FileHeader},
    task::TaskGroup,
};

use super::{ComposeContext, Composer, ComposerKind};

/// Packs every file into whichever container is free, one task per file.
pub struct RegularComposer {
    context: Arc<ComposeContext>,
    tasks: TaskGroup,
}

impl RegularComposer {
    pub fn new(context: Arc<ComposeContext>) -> Self {
        let tasks = TaskGroup::new(context.fail_fast().clone());
        RegularComposer { context, tasks }
    }
}

#[async_trait]
impl Composer for RegularComposer {
    fn kind(&self) -> ComposerKind {
        ComposerKind::Regular
    }

    async fn add_file(&mut self, info: ComposeFileInfo) -> Result<()> {
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
