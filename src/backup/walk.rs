use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_walkdir::{DirEntry, WalkDir};
use clap::builder::styling::AnsiColor;
use log::{debug, trace, warn};
use tokio::fs;
use tokio_stream::StreamExt;

use crate::{
    bundle::FileDescriptions,
    composer::Composer,
    error::{Error, Result},
    file::{ComposeFileInfo, EntryKind, FileHeader},
    format::{format_path, format_size},
    task::FailFast,
};

/// Written last, in its own container, once everything else is stored.
pub const PG_CONTROL: &str = "global/pg_control";

/// Entries never copied into a backup. Excluded directories keep their
/// header but lose their contents.
const EXCLUDED_NAMES: &[&str] = &[
    "log",
    "pg_log",
    "pg_xlog",
    "pg_wal",
    "pgsql_tmp",
    "postgresql.auto.conf.tmp",
    "postmaster.pid",
    "postmaster.opts",
    "recovery.conf",
    "pg_dynshmem",
    "pg_notify",
    "pg_replslot",
    "pg_serial",
    "pg_stat_tmp",
    "pg_snapshots",
    "pg_subtrans",
];

const INTERNAL_INIT_PREFIX: &str = "pg_internal.init";

fn is_excluded(file_name: &str) -> bool {
    EXCLUDED_NAMES.contains(&file_name) || file_name.starts_with(INTERNAL_INIT_PREFIX)
}

#[derive(Debug, Default)]
pub struct WalkSummary {
    pub entries: u64,
    /// Total size of the regular files seen.
    pub data_size: u64,
    pub pg_control: Option<ComposeFileInfo>,
}

/// Feeds every entry of a data directory to `composer`.
///
/// Files whose mtime matches `unchanged_since` are recorded as skipped
/// without being read.
pub struct DataDirWalker<'a> {
    root: &'a Path,
    unchanged_since: Option<&'a FileDescriptions>,
    fail_fast: FailFast,
    excluded_dirs: Vec<PathBuf>,
    summary: WalkSummary,
}

impl<'a> DataDirWalker<'a> {
    pub fn new(
        root: &'a Path,
        unchanged_since: Option<&'a FileDescriptions>,
        fail_fast: FailFast,
    ) -> Self {
        DataDirWalker {
            root,
            unchanged_since,
            fail_fast,
            excluded_dirs: vec![],
            summary: WalkSummary::default(),
        }
    }

    pub async fn walk(mut self, composer: &mut dyn Composer) -> Result<WalkSummary> {
        if !fs::metadata(self.root).await?.is_dir() {
            return Err(Error::FileIsNotDirectory(self.root.to_owned()));
        }

        let mut walker = WalkDir::new(self.root);
        loop {
            if self.fail_fast.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match walker.try_next().await {
                Ok(Some(entry)) => self.handle_entry(entry, composer).await?,
                Ok(None) => break,
                Err(err) => handle_walkdir_error(err)?,
            }
        }

        debug!(
            "walked {} entries ({})",
            self.summary.entries,
            format_size(self.summary.data_size)
        );
        Ok(self.summary)
    }

    async fn handle_entry(&mut self, entry: DirEntry, composer: &mut dyn Composer) -> Result<()> {
        let path = entry.path();
        if self.excluded_dirs.iter().any(|dir| path.starts_with(dir)) {
            return Ok(());
        }

        let formatted_path = format_path(&path);
        let metadata = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("{formatted_path} was deleted during the walk");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let name = relative_name(self.root, &path)?;
        let file_name = path
            .file_name()
            .map(|file_name| file_name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let excluded = is_excluded(&file_name);
        self.summary.entries += 1;

        let file_type = metadata.file_type();
        if file_type.is_dir() {
            let header = FileHeader::from_native(name, EntryKind::Directory, &metadata, None);
            composer.add_header(header).await?;
            if excluded {
                trace!("excluded contents of {formatted_path}");
                self.excluded_dirs.push(path);
            }
        } else if excluded {
            trace!("excluded {formatted_path}");
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path).await?;
            let target = target.to_string_lossy().into_owned();
            let header = FileHeader::from_native(name, EntryKind::Symlink, &metadata, Some(target));
            composer.add_header(header).await?;

            let style = AnsiColor::Cyan.on_default();
            debug!("{style}added symlink{style:#} {formatted_path}");
        } else if file_type.is_file() {
            let header = FileHeader::from_native(name, EntryKind::File, &metadata, None);
            self.summary.data_size += header.size;
            self.handle_file(path, header, composer).await?;
        } else {
            warn!("skipped special file {formatted_path}");
        }

        Ok(())
    }

    async fn handle_file(
        &mut self,
        path: PathBuf,
        header: FileHeader,
        composer: &mut dyn Composer,
    ) -> Result<()> {
        let unreadable = header.mode & 0o444 == 0;
        let info = ComposeFileInfo::new(path, header, unreadable);
        if info.name() == PG_CONTROL {
            self.summary.pg_control = Some(info);
            return Ok(());
        }

        let unchanged = self
            .unchanged_since
            .and_then(|files| files.get(info.name()))
            .is_some_and(|base| base.mtime == info.header.modified);
        if unchanged {
            trace!("{} has not changed since the base backup", format_path(&info.path));
            composer.skip_file(&info.header);
            return Ok(());
        }

        composer.add_file(info).await
    }
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root)?;
    let components: Vec<_> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect();
    Ok(components.join("/"))
}

fn handle_walkdir_error(err: async_walkdir::Error) -> Result<()> {
    match err.io() {
        Some(io_err) if io_err.kind() == ErrorKind::NotFound => {
            if let Some(path) = err.path() {
                warn!("{} was deleted during the walk", format_path(path));
            } else {
                warn!("skipped deleted entry ({io_err})");
            }

            Ok(())
        }
        _ => Err(err.into()),
    }
}
