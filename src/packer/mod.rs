//! Turns one file into tar bytes inside a container.

use std::{
    collections::BTreeSet,
    io::{ErrorKind, SeekFrom},
    sync::Arc,
};

use clap::builder::styling::AnsiColor;
use log::{debug, warn};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

use crate::{
    bundle::{FileDescriptions, SharedBundleFiles},
    config::BackupConfig,
    container::Container,
    error::{Error, Result},
    file::ComposeFileInfo,
    format::{format_path, format_size},
    relation::{
        blocks_per_segment, is_paged_file, page_checksum, write_increment_header,
        IncrementHeader, PageHeader, PagedFileDeltaMap, RelFileSegment,
    },
    stats::BackupStats,
    task::FailFast,
};

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackerOptions {
    pub verify_page_checksums: bool,
    pub store_all_corrupt_blocks: bool,
    pub block_size: u32,
}

impl From<&BackupConfig> for PackerOptions {
    fn from(config: &BackupConfig) -> Self {
        PackerOptions {
            verify_page_checksums: config.verify_page_checksums,
            store_all_corrupt_blocks: config.store_all_corrupt_blocks,
            block_size: config.block_size,
        }
    }
}

/// What an incremental backup is taken against.
#[derive(Debug, Clone)]
pub struct IncrementBase {
    /// Start position of the previous backup.
    pub lsn: u64,
    pub delta_map: Arc<PagedFileDeltaMap>,
    /// Files of the previous backup; a file missing from it is packed whole.
    pub files: Option<Arc<FileDescriptions>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PackOutcome {
    Packed { incremented: bool, size: u64 },
    Skipped,
}

impl PackOutcome {
    pub fn is_packed(&self) -> bool {
        matches!(self, PackOutcome::Packed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FilePacker {
    options: PackerOptions,
    increment_base: Option<IncrementBase>,
    files: SharedBundleFiles,
    stats: Arc<BackupStats>,
    fail_fast: FailFast,
}

struct Increment {
    blocks: Vec<u32>,
    corrupt_blocks: Vec<u32>,
}

impl FilePacker {
    pub fn new(
        options: PackerOptions,
        increment_base: Option<IncrementBase>,
        files: SharedBundleFiles,
        stats: Arc<BackupStats>,
        fail_fast: FailFast,
    ) -> Self {
        FilePacker {
            options,
            increment_base,
            files,
            stats,
            fail_fast,
        }
    }

    pub fn files(&self) -> &SharedBundleFiles {
        &self.files
    }

    pub fn stats(&self) -> &Arc<BackupStats> {
        &self.stats
    }

    pub fn increment_lsn(&self) -> Option<u64> {
        self.increment_base.as_ref().map(|base| base.lsn)
    }

    /// Bytes the entry for `info` is expected to take, before tar framing.
    pub fn expected_size(&self, info: &ComposeFileInfo) -> u64 {
        match self.delta_blocks(info) {
            Some((_, blocks)) => {
                IncrementHeader::encoded_len(blocks.len())
                    + blocks.len() as u64 * u64::from(self.options.block_size)
            }
            None => info.header.size,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.fail_fast.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn skip(&self, info: &ComposeFileInfo) {
        self.files.add_skipped_file(&info.header);
        self.stats.add_skipped_file();
    }

    /// Opens `info` for reading, mapping a missing file to [`Error::FileVanished`].
    pub async fn open(info: &ComposeFileInfo) -> Result<File> {
        match File::open(&info.path).await {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(Error::FileVanished(info.path.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn vanished(&self, info: &ComposeFileInfo) {
        warn!(
            "file {} disappeared before it was read, skipping",
            format_path(&info.path)
        );
        self.files.add_skipped_file(&info.header);
        self.stats.add_vanished_file();
    }

    /// Writes `info` into `container`, either whole or as an increment.
    ///
    /// Exactly one description is recorded for the file unless an error is
    /// returned.
    pub async fn pack(
        &self,
        info: &ComposeFileInfo,
        container: &mut Container,
    ) -> Result<PackOutcome> {
        self.check_cancelled()?;
        if info.is_unreadable {
            self.skip(info);
            return Ok(PackOutcome::Skipped);
        }

        let mut file = match Self::open(info).await {
            Ok(file) => file,
            Err(Error::FileVanished(_)) => {
                self.vanished(info);
                return Ok(PackOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        if let Some((segment, delta_blocks)) = self.delta_blocks(info) {
            let scanned = self
                .scan_increment(info, &mut file, &segment, &delta_blocks)
                .await;
            match scanned {
                Ok(increment) => {
                    return self
                        .write_increment(info, &mut file, increment, container)
                        .await
                }
                Err(Error::InvalidBlock(block_no)) => {
                    warn!(
                        "block {block_no} of {} is invalid, packing the whole file",
                        format_path(&info.path)
                    );
                    file.seek(SeekFrom::Start(0)).await?;
                }
                Err(err) => return Err(err),
            }
        }

        self.write_whole(info, &mut file, container).await
    }

    fn delta_blocks(&self, info: &ComposeFileInfo) -> Option<(RelFileSegment, BTreeSet<u32>)> {
        let base = self.increment_base.as_ref()?;
        let name = info.name();
        if !is_paged_file(name, info.header.size, self.options.block_size) {
            return None;
        }

        if let Some(files) = &base.files {
            if !files.contains_key(name) {
                return None;
            }
        }

        let segment = RelFileSegment::parse(name).ok()?;
        let blocks =
            base.delta_map
                .blocks_for_segment(&segment, blocks_per_segment(self.options.block_size))?;
        Some((segment, blocks))
    }

    async fn scan_increment(
        &self,
        info: &ComposeFileInfo,
        file: &mut File,
        segment: &RelFileSegment,
        delta_blocks: &BTreeSet<u32>,
    ) -> Result<Increment> {
        let base_lsn = self.increment_lsn().unwrap_or(0);
        let block_size = self.options.block_size;
        let block_count = info.header.size / u64::from(block_size);
        let first_block = segment.segment * blocks_per_segment(block_size);

        let mut page = vec![0; block_size as usize];
        let mut increment = Increment {
            blocks: vec![],
            corrupt_blocks: vec![],
        };

        for block_no in 0..block_count {
            self.check_cancelled()?;
            let block_no = u32::try_from(block_no).map_err(Error::other)?;
            read_page(file, &mut page).await?;

            let header = PageHeader::parse(&page).ok_or(Error::InvalidBlock(block_no))?;
            if !header.is_new() && !header.is_valid(block_size) {
                return Err(Error::InvalidBlock(block_no));
            }

            let corrupt = self.options.verify_page_checksums
                && !header.is_new()
                && page_checksum(&page, first_block + block_no) != header.checksum;
            if corrupt {
                increment.corrupt_blocks.push(block_no);
            }

            if corrupt
                || header.is_new()
                || header.lsn() >= base_lsn
                || delta_blocks.contains(&block_no)
            {
                increment.blocks.push(block_no);
            }
        }

        Ok(increment)
    }

    async fn write_increment(
        &self,
        info: &ComposeFileInfo,
        file: &mut File,
        increment: Increment,
        container: &mut Container,
    ) -> Result<PackOutcome> {
        let block_size = u64::from(self.options.block_size);
        let size = IncrementHeader::encoded_len(increment.blocks.len())
            + increment.blocks.len() as u64 * block_size;

        let mut header = info.header.clone();
        header.size = size;
        container.begin_entry(&header, size).await?;
        container
            .write(&write_increment_header(info.header.size, &increment.blocks))
            .await?;

        let mut page = vec![0; block_size as usize];
        for &block_no in &increment.blocks {
            self.check_cancelled()?;
            file.seek(SeekFrom::Start(u64::from(block_no) * block_size)).await?;
            read_page(file, &mut page).await?;
            container.write(&page).await?;
            self.stats.add_bytes_read(block_size);
        }
        container.end_entry().await?;

        self.finish_file(info, true, &increment.corrupt_blocks, size, container);
        Ok(PackOutcome::Packed {
            incremented: true,
            size,
        })
    }

    async fn write_whole(
        &self,
        info: &ComposeFileInfo,
        file: &mut File,
        container: &mut Container,
    ) -> Result<PackOutcome> {
        let size = info.header.size;
        let block_size = self.options.block_size as usize;
        let verify = self.options.verify_page_checksums
            && is_paged_file(info.name(), size, self.options.block_size);
        let first_block = RelFileSegment::parse(info.name())
            .map_or(0, |segment| segment.segment * blocks_per_segment(self.options.block_size));

        container.begin_entry(&info.header, size).await?;

        let mut corrupt_blocks = vec![];
        let mut buffer = vec![0; READ_CHUNK_SIZE];
        let mut offset = 0u64;
        while offset < size {
            self.check_cancelled()?;
            let wanted = usize::try_from(size - offset).map_or(READ_CHUNK_SIZE, |remaining| {
                remaining.min(READ_CHUNK_SIZE)
            });
            let chunk = &mut buffer[..wanted];
            let read = read_full(file, chunk).await?;
            chunk[read..].fill(0);
            self.stats.add_bytes_read(read as u64);

            if verify {
                let chunk_first_block =
                    u32::try_from(offset / block_size as u64).map_err(Error::other)?;
                for (index, page) in chunk.chunks_exact(block_size).enumerate() {
                    let block_no = chunk_first_block + index as u32;
                    if is_corrupt(page, first_block + block_no) {
                        corrupt_blocks.push(block_no);
                    }
                }
            }

            container.write(chunk).await?;
            offset += wanted as u64;
        }
        container.end_entry().await?;

        self.finish_file(info, false, &corrupt_blocks, size, container);
        Ok(PackOutcome::Packed {
            incremented: false,
            size,
        })
    }

    fn finish_file(
        &self,
        info: &ComposeFileInfo,
        incremented: bool,
        corrupt_blocks: &[u32],
        size: u64,
        container: &Container,
    ) {
        if !corrupt_blocks.is_empty() {
            warn!(
                "{} corrupt blocks in {}",
                corrupt_blocks.len(),
                format_path(&info.path)
            );
        }

        self.files.add_file_with_corrupt_blocks(
            &info.header,
            incremented,
            corrupt_blocks,
            self.options.store_all_corrupt_blocks,
        );
        self.stats.add_packed_file(incremented);
        self.stats.add_corrupt_blocks(corrupt_blocks.len() as u64);

        let style = AnsiColor::Cyan.on_default();
        let size_style = AnsiColor::BrightBlack.on_default();
        let action = if incremented { "packed increment" } else { "packed file" };
        debug!(
            "{style}{action}{style:#} {} into {} {size_style}({}){size_style:#}",
            format_path(&info.path),
            container.name(),
            format_size(size)
        );
    }
}

fn is_corrupt(page: &[u8], block_no: u32) -> bool {
    match PageHeader::parse(page) {
        Some(header) if !header.is_new() => page_checksum(page, block_no) != header.checksum,
        _ => false,
    }
}

/// Fills `buf` from `file`, stopping early only at end of file.
async fn read_full(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = file.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }

    Ok(filled)
}

/// Reads one page, zero filling whatever the file no longer holds.
async fn read_page(file: &mut File, page: &mut [u8]) -> Result<()> {
    let read = read_full(file, page).await?;
    page[read..].fill(0);
    Ok(())
}
