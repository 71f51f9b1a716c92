use std::path::Path;

use chrono::Utc;
use humantime::format_duration;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::{
    backup::{default_backup_name, push_backup, BackupBase, BackupRequest},
    config::BackupConfig,
    error::Result,
    format::{format_path, format_size},
    relation::{DeltaEntry, PagedFileDeltaMap, RelFileStatistics, RelationStatEntry},
    segment::{AoRelFileEntry, AoRelFileStorageMap},
};

use super::{
    args::{BackupArgs, StatsType},
    print_stat, print_stats_json,
    storage::create_storage,
};

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|err| {
        anyhow::anyhow!("failed to read {}: {err}", format_path(path)).into()
    })
}

fn backup_config(cli: &BackupArgs) -> Result<BackupConfig> {
    let mut config = BackupConfig::from_env()?;
    if let Some(composer) = cli.composer {
        config.composer = composer;
    }
    if let Some(jobs) = cli.jobs {
        config.upload_disk_concurrency = jobs;
    }
    if let Some(uploads) = cli.uploads {
        config.upload_concurrency = uploads;
    }
    if let Some(threshold) = cli.tar_size_threshold {
        config.tar_size_threshold = threshold;
    }
    if let Some(compression) = &cli.compression {
        config.compression.clone_from(compression);
    }

    config.verify_page_checksums |= cli.verify_checksums;
    config.store_all_corrupt_blocks |= cli.store_all_corrupt_blocks;
    config.without_files_metadata |= cli.without_files_metadata;
    Ok(config)
}

pub async fn main(cli: BackupArgs) -> Result<()> {
    let config = backup_config(&cli)?;
    config.validate()?;
    let storage = create_storage(&cli.global).await?;

    let delta_map = match &cli.delta_map {
        Some(path) => PagedFileDeltaMap::from_entries(read_json::<Vec<DeltaEntry>>(path).await?),
        None => PagedFileDeltaMap::new(),
    };
    let statistics = match &cli.statistics {
        Some(path) => Some(RelFileStatistics::from_entries(
            read_json::<Vec<RelationStatEntry>>(path).await?,
        )),
        None => None,
    };
    let ao_storage_map = match &cli.ao_storage_map {
        Some(path) => {
            AoRelFileStorageMap::from_entries(read_json::<Vec<AoRelFileEntry>>(path).await?)
        }
        None => AoRelFileStorageMap::new(),
    };

    let base = cli.increment_from.clone().map(|name| BackupBase {
        name,
        increment_lsn: cli.increment_lsn,
    });
    let request = BackupRequest {
        backup_name: cli
            .name
            .clone()
            .unwrap_or_else(|| default_backup_name(Utc::now())),
        data_dir: cli.data_dir.clone(),
        config,
        storage,
        base,
        delta_map,
        statistics,
        ao_storage_map,
    };
    let result = push_backup(request).await?;

    match cli.global.stats {
        Some(StatsType::Basic) => {
            let stats = &result.stats;
            print_stat("files packed", stats.files_packed);
            print_stat("files incremented", stats.files_incremented);
            print_stat("files skipped", stats.files_skipped);
            print_stat("files vanished", stats.files_vanished);
            print_stat("headers written", stats.headers_written);
            print_stat("corrupt blocks", stats.corrupt_blocks);
            print_stat("segments uploaded", stats.segments_uploaded);
            print_stat("segments deduplicated", stats.segments_deduplicated);
            print_stat("containers retired", stats.containers_retired);
            print_stat("bytes read", format_size(stats.bytes_read));
            print_stat(
                "backup size",
                format_size(result.sentinel.uncompressed_size),
            );
            print_stat("bytes uploaded", format_size(stats.bytes_uploaded));
            print_stat("storage requests", stats.storage_requests);
            print_stat("elapsed time", format_duration(stats.elapsed_time()));
        }
        Some(StatsType::Json) => {
            print_stats_json(&result.stats)?;
        }
        None => {}
    }

    Ok(())
}
