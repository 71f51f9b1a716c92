//! Strategies that decide which container every file of a backup ends up in.

mod copy;
mod directory;
mod greenplum;
mod rating;
mod regular;

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    bundle::{SharedBundleFiles, SharedTarFileSets, TarFileSetMap},
    config::BackupConfig,
    container::ContainerQueue,
    error::{Error, Result},
    file::{ComposeFileInfo, FileHeader},
    packer::FilePacker,
    relation::RelFileStatistics,
    segment::SegmentStore,
    sentinel::PreviousBackup,
    task::FailFast,
};

pub use self::{
    copy::CopyComposer, directory::DirectoryComposer, greenplum::GreenplumComposer,
    rating::RatingComposer, regular::RegularComposer,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposerKind {
    #[default]
    Regular,
    Rating,
    Copy,
    #[serde(alias = "database")]
    Directory,
    Greenplum,
}

impl ComposerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComposerKind::Regular => "regular",
            ComposerKind::Rating => "rating",
            ComposerKind::Copy => "copy",
            ComposerKind::Directory => "directory",
            ComposerKind::Greenplum => "greenplum",
        }
    }
}

impl fmt::Display for ComposerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComposerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "regular" => Ok(ComposerKind::Regular),
            "rating" => Ok(ComposerKind::Rating),
            "copy" => Ok(ComposerKind::Copy),
            "directory" | "database" => Ok(ComposerKind::Directory),
            "greenplum" => Ok(ComposerKind::Greenplum),
            _ => Err(Error::UnknownComposer(s.to_owned())),
        }
    }
}

/// Places the files of one backup into containers.
///
/// Every path handed to a composer ends up with exactly one description in
/// [`Composer::files`], and packed paths with exactly one container in the
/// map returned by [`Composer::finish_composing`].
#[async_trait]
pub trait Composer: Send {
    fn kind(&self) -> ComposerKind;

    /// Queues a regular file. May wait for a free worker, never for the whole
    /// backup.
    async fn add_file(&mut self, info: ComposeFileInfo) -> Result<()>;

    async fn add_header(&mut self, header: FileHeader) -> Result<()>;

    fn skip_file(&mut self, header: &FileHeader);

    /// Waits for all queued work and returns which container holds which file.
    async fn finish_composing(self: Box<Self>) -> Result<TarFileSetMap>;

    fn files(&self) -> SharedBundleFiles;
}

pub type BoxedComposer = Box<dyn Composer>;

/// Everything a composer works with, shared by all of its tasks.
#[derive(Debug)]
pub struct ComposeContext {
    pub backup_name: String,
    pub config: BackupConfig,
    pub queue: ContainerQueue,
    pub packer: FilePacker,
    pub tar_file_sets: SharedTarFileSets,
    pub previous: Option<Arc<PreviousBackup>>,
    pub statistics: Option<Arc<RelFileStatistics>>,
    pub segment_store: Option<Arc<SegmentStore>>,
}

impl ComposeContext {
    pub fn fail_fast(&self) -> &FailFast {
        self.queue.fail_fast()
    }

    pub fn files(&self) -> &SharedBundleFiles {
        self.packer.files()
    }

    pub async fn pack_file(&self, info: &ComposeFileInfo) -> Result<()> {
        let mut container = self.queue.checkout().await?;
        match self.packer.pack(info, &mut container).await {
            Ok(outcome) => {
                if outcome.is_packed() {
                    self.tar_file_sets.add_file(container.name(), info.name());
                }

                self.queue.checkin_and_maybe_retire(container).await
            }
            Err(err) => {
                self.queue.discard(container)?;
                Err(err)
            }
        }
    }

    pub async fn write_header(&self, header: &FileHeader) -> Result<()> {
        let mut container = self.queue.checkout().await?;
        match container.append_header(header).await {
            Ok(()) => {
                self.record_header(container.name(), header);
                self.queue.checkin(container)
            }
            Err(err) => {
                self.queue.discard(container)?;
                Err(err)
            }
        }
    }

    pub(super) fn record_header(&self, container: &str, header: &FileHeader) {
        self.tar_file_sets.add_file(container, &header.name);
        self.files().add_file(header, false);
        self.packer.stats().add_header();
    }

    pub fn skip_file(&self, header: &FileHeader) {
        self.files().add_skipped_file(header);
        self.packer.stats().add_skipped_file();
    }

    /// Retires every container once the composer's own tasks are done.
    ///
    /// The queue is finished even when the tasks failed and no upload is left
    /// running. The task error takes precedence.
    pub async fn finish(&self, waited: Result<()>) -> Result<TarFileSetMap> {
        let finished = self.queue.finish().await;
        waited?;
        finished?;
        Ok(self.tar_file_sets.files())
    }
}

pub fn new_composer(context: ComposeContext) -> Result<BoxedComposer> {
    let kind = context.config.composer;
    let context = Arc::new(context);
    let composer: BoxedComposer = match kind {
        ComposerKind::Regular => Box::new(RegularComposer::new(context)),
        ComposerKind::Rating => Box::new(RatingComposer::new(context)),
        ComposerKind::Copy => Box::new(CopyComposer::new(context)?),
        ComposerKind::Directory => Box::new(DirectoryComposer::new(context)),
        ComposerKind::Greenplum => Box::new(GreenplumComposer::new(context)?),
    };

    Ok(composer)
}

#[cfg(test)]
mod tests;
