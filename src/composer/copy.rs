use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::builder::styling::AnsiColor;
use log::debug;

use crate::{
    bundle::{BackupFileDescription, SharedBundleFiles, TarFileSetMap},
    container::TAR_PARTITIONS_DIR,
    error::{Error, Result},
    file::{ComposeFileInfo, FileHeader},
    format::format_key,
    sentinel::PreviousBackup,
    task::TaskGroup,
};

use super::{ComposeContext, Composer, ComposerKind};

/// Name of a reused container inside the new backup. Prefixes stack so
/// distinct source names never share a key.
pub fn copied_container_name(name: &str) -> String {
    format!("copy_{name}")
}

#[derive(Debug)]
enum Candidate {
    File(ComposeFileInfo),
    Header(FileHeader),
}

impl Candidate {
    fn name(&self) -> &str {
        match self {
            Candidate::File(info) => info.name(),
            Candidate::Header(header) => &header.name,
        }
    }

    fn header(&self) -> &FileHeader {
        match self {
            Candidate::File(info) => &info.header,
            Candidate::Header(header) => header,
        }
    }

    fn modified(&self) -> DateTime<Utc> {
        self.header().modified
    }

    fn is_unreadable(&self) -> bool {
        matches!(self, Candidate::File(info) if info.is_unreadable)
    }
}

/// Reuses whole containers of the previous backup when none of their
/// members changed, and packs everything else.
pub struct CopyComposer {
    context: Arc<ComposeContext>,
    previous: Arc<PreviousBackup>,
    candidates: Vec<Candidate>,
}

/// Previous container name to the members it carries over.
type CopyPlan = BTreeMap<String, Vec<String>>;

impl CopyComposer {
    pub fn new(context: Arc<ComposeContext>) -> Result<Self> {
        let previous = context
            .previous
            .clone()
            .ok_or(Error::MissingComposerInput {
                composer: "copy",
                input: "a previous backup",
            })?;

        Ok(CopyComposer {
            context,
            previous,
            candidates: vec![],
        })
    }

    /// A previous container is reused only when every one of its members is
    /// present again, readable and with an unchanged mtime.
    fn plan(&self) -> CopyPlan {
        let previous_files = self.previous.files();
        let mut container_of = HashMap::new();
        let mut remaining = HashMap::new();
        for (container, members) in self.previous.tar_file_sets() {
            remaining.insert(container.as_str(), Some(members.len()));
            for member in members {
                container_of.insert(member.as_str(), container.as_str());
            }
        }

        for candidate in &self.candidates {
            let Some(&container) = container_of.get(candidate.name()) else {
                continue;
            };

            let unchanged = !candidate.is_unreadable()
                && previous_files
                    .get(candidate.name())
                    .is_some_and(|description| description.mtime == candidate.modified());
            let count = remaining.entry(container).or_insert(None);
            *count = match *count {
                Some(left) if unchanged => Some(left.saturating_sub(1)),
                _ => None,
            };
        }

        let mut plan = CopyPlan::new();
        for candidate in &self.candidates {
            let reusable = container_of
                .get(candidate.name())
                .filter(|container| remaining.get(*container) == Some(&Some(0)));

            if let Some(container) = reusable {
                plan.entry((*container).to_owned())
                    .or_default()
                    .push(candidate.name().to_owned());
            }
        }

        plan
    }
}

async fn copy_container(
    context: Arc<ComposeContext>,
    previous: Arc<PreviousBackup>,
    container: String,
    members: Vec<String>,
) -> Result<()> {
    let from_key = format!("{}/{TAR_PARTITIONS_DIR}/{container}", previous.name);
    let name = copied_container_name(&container);
    let to_key = format!("{}/{TAR_PARTITIONS_DIR}/{name}", context.backup_name);

    if context.fail_fast().is_cancelled() {
        return Err(Error::Cancelled);
    }
    context
        .queue
        .uploader()
        .storage()
        .copy(&from_key, &to_key)
        .await?;

    let previous_files = previous.files();
    for member in &members {
        let Some(description) = previous_files.get(member) else {
            continue;
        };

        let description = BackupFileDescription::new(
            description.is_incremented,
            false,
            description.mtime,
        );
        context.packer.stats().add_packed_file(description.is_incremented);
        context.files().add_description(member, description);
    }
    context.tar_file_sets.add_files(&name, &members);

    let style = AnsiColor::Green.on_default();
    debug!(
        "{style}copied container{style:#} {} to {} ({} files)",
        format_key(&from_key),
        format_key(&to_key),
        members.len()
    );
    Ok(())
}

#[async_trait]
impl Composer for CopyComposer {
    fn kind(&self) -> ComposerKind {
        ComposerKind::Copy
    }

    async fn add_file(&mut self, info: ComposeFileInfo) -> Result<()> {
        self.candidates.push(Candidate::File(info));
        Ok(())
    }

    async fn add_header(&mut self, header: FileHeader) -> Result<()> {
        self.candidates.push(Candidate::Header(header));
        Ok(())
    }

    fn skip_file(&mut self, header: &FileHeader) {
        self.context.skip_file(header);
    }

    async fn finish_composing(self: Box<Self>) -> Result<TarFileSetMap> {
        let plan = self.plan();
        debug!(
            "reusing {} of {} previous containers",
            plan.len(),
            self.previous.tar_file_sets().len()
        );

        let CopyComposer {
            context,
            previous,
            candidates,
        } = *self;

        let copied: HashSet<&str> = plan
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .filter(|candidate| !copied.contains(candidate.name()))
            .collect();

        let mut copies = TaskGroup::bounded(
            context.config.upload_concurrency,
            context.fail_fast().clone(),
        );
        let mut packs = TaskGroup::bounded(
            context.config.upload_disk_concurrency,
            context.fail_fast().clone(),
        );

        let mut spawned = Ok(());
        for (container, members) in plan {
            spawned = copies
                .spawn(copy_container(
                    context.clone(),
                    previous.clone(),
                    container,
                    members,
                ))
                .await;
            if spawned.is_err() {
                break;
            }
        }

        for candidate in candidates {
            if spawned.is_err() {
                break;
            }

            let context = context.clone();
            spawned = packs
                .spawn(async move {
                    match candidate {
                        Candidate::File(info) => context.pack_file(&info).await,
                        Candidate::Header(header) => context.write_header(&header).await,
                    }
                })
                .await;
        }

        let copied = copies.wait().await;
        let packed = packs.wait().await;
        let waited = copied.and(packed).and(spawned);
        context.finish(waited).await
    }

    fn files(&self) -> SharedBundleFiles {
        self.context.files().clone()
    }
}
