use std::{ops::RangeInclusive, path::PathBuf, time::Duration};

use clap::{ArgAction, Args, ValueEnum};
use env_logger::WriteStyle;
use humantime::parse_duration;

use crate::{composer::ComposerKind, storage::StorageUrl};

use super::parse::{parse_lsn, parse_range_inclusive};

const TASK_COUNT_RANGE: RangeInclusive<usize> = 1..=1024;
const SIZE_RANGE: RangeInclusive<u64> = 1..=u64::MAX;

fn parse_task_count(s: &str) -> Result<usize, String> {
    parse_range_inclusive(s, TASK_COUNT_RANGE)
}

fn parse_size(s: &str) -> Result<u64, String> {
    parse_range_inclusive(s, SIZE_RANGE)
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Database data directory to back up
    pub data_dir: PathBuf,

    /// Name of the new backup (defaults to one derived from the start time)
    #[arg(short = 'N', long, value_name = "NAME")]
    pub name: Option<String>,

    /// How files are grouped into containers
    #[arg(long, value_name = "KIND")]
    pub composer: Option<ComposerKind>,

    /// Number of files read at once
    #[arg(short = 'j', long, value_name = "NUM", value_parser = parse_task_count)]
    pub jobs: Option<usize>,

    /// Number of containers uploaded at once
    #[arg(short = 'u', long, value_name = "NUM", value_parser = parse_task_count)]
    pub uploads: Option<usize>,

    /// Size in bytes after which a container is uploaded
    #[arg(long, value_name = "BYTES", value_parser = parse_size)]
    pub tar_size_threshold: Option<u64>,

    /// Compression applied to containers
    #[arg(long, value_name = "METHOD", value_parser = ["none", "zstd"])]
    pub compression: Option<String>,

    /// Completed backup to build on
    #[arg(long, value_name = "NAME")]
    pub increment_from: Option<String>,

    /// Start position of the base backup (e.g. '0/16B3748')
    #[arg(long, value_name = "LSN", requires = "increment_from", value_parser = parse_lsn)]
    pub increment_lsn: Option<u64>,

    /// JSON list of changed blocks per relation
    #[arg(long, value_name = "FILE", requires = "increment_lsn")]
    pub delta_map: Option<PathBuf>,

    /// JSON list of update counts per relation
    #[arg(long, value_name = "FILE")]
    pub statistics: Option<PathBuf>,

    /// JSON list of append-optimized segment files
    #[arg(long, value_name = "FILE")]
    pub ao_storage_map: Option<PathBuf>,

    /// Verify page checksums while reading relation files
    #[arg(long, default_value_t = false)]
    pub verify_checksums: bool,

    /// Record every corrupt block instead of the first few
    #[arg(long, default_value_t = false)]
    pub store_all_corrupt_blocks: bool,

    /// Leave per-file metadata out of the sentinel
    #[arg(long, default_value_t = false)]
    pub without_files_metadata: bool,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Storage backend (e.g. 's3://<bucket>' or 'file://<path>')
    #[arg(short, long, value_name = "URL")]
    pub storage: Option<StorageUrl>,

    /// Add latency when using local storage
    #[arg(short = 'L', long, value_parser = parse_duration)]
    pub latency: Option<Duration>,

    /// Print stats after completion
    #[arg(
        long,
        value_name = "FORMAT",
        num_args = 0..=1,
        default_missing_value = "basic",
    )]
    pub stats: Option<StatsType>,

    #[command(flatten)]
    pub logger: LoggerArgs,
}

#[derive(Args, Debug)]
pub struct LoggerArgs {
    /// When to use color in output
    #[arg(short, long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorChoice,

    /// Print more output
    #[arg(short, long, action = ArgAction::Count, group = "verbosity")]
    pub verbose: u8,

    /// Print less output
    #[arg(short, long, action = ArgAction::Count, group = "verbosity")]
    pub quiet: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum StatsType {
    Basic,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl From<ColorChoice> for WriteStyle {
    fn from(choice: ColorChoice) -> Self {
        match choice {
            ColorChoice::Auto => WriteStyle::Auto,
            ColorChoice::Always => WriteStyle::Always,
            ColorChoice::Never => WriteStyle::Never,
        }
    }
}
