use serde::{Deserialize, Serialize};

use crate::{
    composer::ComposerKind,
    env,
    error::{Error, Result},
    relation::DEFAULT_BLOCK_SIZE,
    transform::TransformKind,
};

pub const ENV_TAR_SIZE_THRESHOLD: &str = "PGBUNDLE_TAR_SIZE_THRESHOLD";
pub const ENV_UPLOAD_CONCURRENCY: &str = "PGBUNDLE_UPLOAD_CONCURRENCY";
pub const ENV_UPLOAD_DISK_CONCURRENCY: &str = "PGBUNDLE_UPLOAD_DISK_CONCURRENCY";
pub const ENV_COMPOSER: &str = "PGBUNDLE_COMPOSER";
pub const ENV_VERIFY_PAGE_CHECKSUMS: &str = "PGBUNDLE_VERIFY_PAGE_CHECKSUMS";
pub const ENV_STORE_ALL_CORRUPT_BLOCKS: &str = "PGBUNDLE_STORE_ALL_CORRUPT_BLOCKS";
pub const ENV_WITHOUT_FILES_METADATA: &str = "PGBUNDLE_WITHOUT_FILES_METADATA";
pub const ENV_COMPRESSION: &str = "PGBUNDLE_COMPRESSION";

pub const DEFAULT_TAR_SIZE_THRESHOLD: u64 = (1 << 30) - 1;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 16;
pub const DEFAULT_COMPRESSION: &str = "zstd";
pub const DEFAULT_DIRECTORY: &str = "base";

/// Settings of one backup, resolved before any file is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub tar_size_threshold: u64,
    pub upload_concurrency: usize,
    pub upload_disk_concurrency: usize,
    pub composer: ComposerKind,
    pub verify_page_checksums: bool,
    pub store_all_corrupt_blocks: bool,
    pub without_files_metadata: bool,
    pub block_size: u32,
    pub compression: String,
    pub directory: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let disk_concurrency = std::thread::available_parallelism().map_or(1, usize::from);
        BackupConfig {
            tar_size_threshold: DEFAULT_TAR_SIZE_THRESHOLD,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            upload_disk_concurrency: disk_concurrency,
            composer: ComposerKind::Regular,
            verify_page_checksums: false,
            store_all_corrupt_blocks: false,
            without_files_metadata: false,
            block_size: DEFAULT_BLOCK_SIZE,
            compression: DEFAULT_COMPRESSION.to_owned(),
            directory: DEFAULT_DIRECTORY.to_owned(),
        }
    }
}

impl BackupConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = BackupConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overrides fields from `PGBUNDLE_*` variables that are set.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(threshold) = env::parse_var(ENV_TAR_SIZE_THRESHOLD)? {
            self.tar_size_threshold = threshold;
        }
        if let Some(concurrency) = env::parse_var(ENV_UPLOAD_CONCURRENCY)? {
            self.upload_concurrency = concurrency;
        }
        if let Some(concurrency) = env::parse_var(ENV_UPLOAD_DISK_CONCURRENCY)? {
            self.upload_disk_concurrency = concurrency;
        }
        if let Some(composer) = env::try_var(ENV_COMPOSER)? {
            self.composer = composer.parse()?;
        }
        if let Some(verify) = env::parse_var(ENV_VERIFY_PAGE_CHECKSUMS)? {
            self.verify_page_checksums = verify;
        }
        if let Some(store_all) = env::parse_var(ENV_STORE_ALL_CORRUPT_BLOCKS)? {
            self.store_all_corrupt_blocks = store_all;
        }
        if let Some(without) = env::parse_var(ENV_WITHOUT_FILES_METADATA)? {
            self.without_files_metadata = without;
        }
        if let Some(compression) = env::try_var(ENV_COMPRESSION)? {
            self.compression = compression;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_concurrency == 0 {
            return Err(Error::InvalidConcurrency {
                name: "upload concurrency",
            });
        }
        if self.upload_disk_concurrency == 0 {
            return Err(Error::InvalidConcurrency {
                name: "upload disk concurrency",
            });
        }
        if self.tar_size_threshold == 0 {
            return Err(Error::InvalidTarSizeThreshold);
        }
        if !self.block_size.is_power_of_two() || !(512..=32768).contains(&self.block_size) {
            return Err(Error::InvalidBlockSize(self.block_size));
        }

        if self.without_files_metadata && self.composer != ComposerKind::Regular {
            return Err(Error::FilesMetadataRequired(self.composer.to_string()));
        }

        self.compression.parse::<TransformKind>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
