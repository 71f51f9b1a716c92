//! One backup from start to sentinel.

mod walk;

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use clap::builder::styling::AnsiColor;
use log::{debug, info, warn};

use crate::{
    bundle::{
        NopBundleFiles, NopTarFileSets, RegularBundleFiles, RegularTarFileSets, SharedBundleFiles,
        SharedTarFileSets, StatBundleFiles,
    },
    composer::{new_composer, ComposeContext, ComposerKind},
    config::BackupConfig,
    container::{Container, ContainerQueue},
    error::Result,
    format::{format_key, format_path, format_size, format_time},
    packer::{FilePacker, IncrementBase},
    relation::{PagedFileDeltaMap, RelFileStatistics},
    segment::{load_base_segment_keys, AoRelFileStorageMap, SegmentStore},
    sentinel::{sentinel_path, BackupSentinel, PreviousBackup},
    stats::{BackupStats, FinalizedBackupStats},
    storage::BoxedStorage,
    task::FailFast,
    transform::TransformKind,
    upload::Uploader,
};

pub use self::walk::{DataDirWalker, WalkSummary, PG_CONTROL};

const PG_CONTROL_CONTAINER: &str = "pg_control";

pub fn default_backup_name(time: DateTime<Utc>) -> String {
    format!("base_{}", time.format("%Y%m%dT%H%M%SZ"))
}

/// A completed backup this one builds on.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupBase {
    pub name: String,
    /// Start position of the base; makes the new backup incremental.
    pub increment_lsn: Option<u64>,
}

#[derive(Debug)]
pub struct BackupRequest {
    pub backup_name: String,
    pub data_dir: PathBuf,
    pub config: BackupConfig,
    pub storage: BoxedStorage,
    pub base: Option<BackupBase>,
    pub delta_map: PagedFileDeltaMap,
    pub statistics: Option<RelFileStatistics>,
    pub ao_storage_map: AoRelFileStorageMap,
}

#[derive(Debug)]
pub struct BackupResult {
    pub sentinel: BackupSentinel,
    pub stats: FinalizedBackupStats,
}

/// Takes a backup of `request.data_dir` and writes its sentinel.
///
/// Nothing marks the backup as complete unless every container and
/// metadata document was stored first.
pub async fn push_backup(request: BackupRequest) -> Result<BackupResult> {
    let BackupRequest {
        backup_name,
        data_dir,
        config,
        storage,
        base,
        delta_map,
        statistics,
        ao_storage_map,
    } = request;

    config.validate()?;
    let transform = config.compression.parse::<TransformKind>()?.build();
    let uploader = Uploader::new(storage.clone(), transform);

    let previous = match &base {
        Some(base) => Some(PreviousBackup::load(&storage, &base.name).await?),
        None => None,
    };
    let statistics = statistics.map(Arc::new);
    let (files, tar_file_sets) = bundle_files(&config, statistics.as_ref());

    let increment_lsn = base.as_ref().and_then(|base| base.increment_lsn);
    let increment_base = match (&previous, increment_lsn) {
        (Some(previous), Some(lsn)) => Some(IncrementBase {
            lsn,
            delta_map: Arc::new(delta_map),
            files: Some(Arc::new(previous.files().clone())),
        }),
        _ => None,
    };

    let fail_fast = FailFast::new();
    let stats = Arc::new(BackupStats::new());
    info!(
        "starting backup {} of {} at {} with the {} composer",
        format_key(&backup_name),
        format_path(&data_dir),
        format_time(&stats.start_time),
        config.composer
    );
    let queue = ContainerQueue::new(
        config.upload_concurrency,
        config.tar_size_threshold,
        &backup_name,
        uploader.clone(),
        fail_fast.clone(),
    )?;
    let packer = FilePacker::new(
        (&config).into(),
        increment_base,
        files.clone(),
        stats.clone(),
        fail_fast.clone(),
    );

    let segment_store = if config.composer == ComposerKind::Greenplum {
        let base_keys = load_base_segment_keys(&storage).await?;
        debug!("found {} stored segments", base_keys.len());
        Some(Arc::new(SegmentStore::new(
            &backup_name,
            uploader.clone(),
            Arc::new(ao_storage_map),
            base_keys,
            &packer,
            fail_fast.clone(),
        )))
    } else {
        None
    };

    let mut composer = new_composer(ComposeContext {
        backup_name: backup_name.clone(),
        config: config.clone(),
        queue: queue.clone(),
        packer: packer.clone(),
        tar_file_sets: tar_file_sets.clone(),
        previous: previous.clone(),
        statistics,
        segment_store,
    })?;

    let unchanged_since = previous
        .as_deref()
        .filter(|_| increment_lsn.is_some())
        .map(PreviousBackup::files);
    let walker = DataDirWalker::new(&data_dir, unchanged_since, fail_fast.clone());
    let walked = walker.walk(composer.as_mut()).await;
    if walked.is_err() {
        fail_fast.token().cancel();
    }

    let composed = composer.finish_composing().await;
    let summary = match (walked, composed) {
        (Ok(summary), Ok(_)) => summary,
        (Err(err), Err(composed_err)) if err.is_cancelled() => return Err(composed_err),
        (Err(err), _) | (Ok(_), Err(err)) => return Err(err),
    };

    let mut uncompressed_size = queue.all_containers_size();
    let mut containers_retired = queue.retired_containers().len();
    if let Some(info) = &summary.pg_control {
        let mut container = Container::named(PG_CONTROL_CONTAINER, &backup_name, uploader.clone());
        let outcome = match packer.pack(info, &mut container).await {
            Ok(outcome) => outcome,
            Err(err) => {
                container.abort();
                return Err(err);
            }
        };

        container.retire().await?;
        if outcome.is_packed() {
            tar_file_sets.add_file(container.name(), info.name());
            uncompressed_size += container.size();
            containers_retired += 1;
        }
    } else {
        warn!("{} has no {PG_CONTROL}", format_path(&data_dir));
    }

    let compressed_size = uploader.uploaded_size();
    let sentinel = BackupSentinel {
        tar_file_sets: tar_file_sets.files(),
        files: files.files(),
        uncompressed_size,
        compressed_size,
        increment_from: increment_lsn.and(base.map(|base| base.name)),
        increment_from_lsn: increment_lsn,
        start_time: stats.start_time,
        finish_time: Utc::now(),
        composer: config.composer,
    };

    let key = sentinel_path(&backup_name);
    uploader
        .clone_untracked()
        .upload_json(&key, &sentinel)
        .await?;

    let style = AnsiColor::Green.on_default();
    debug!("{style}uploaded sentinel{style:#} {}", format_key(&key));
    info!(
        "backup {} finished: {} in {} containers ({} stored)",
        format_key(&backup_name),
        format_size(uncompressed_size),
        containers_retired,
        format_size(compressed_size)
    );

    let stats = stats.finalize(compressed_size, containers_retired, storage.stats());
    Ok(BackupResult { sentinel, stats })
}

fn bundle_files(
    config: &BackupConfig,
    statistics: Option<&Arc<RelFileStatistics>>,
) -> (SharedBundleFiles, SharedTarFileSets) {
    if config.without_files_metadata {
        return (Arc::new(NopBundleFiles), Arc::new(NopTarFileSets));
    }

    let files: SharedBundleFiles = match (config.composer, statistics) {
        (ComposerKind::Rating, Some(statistics)) => {
            Arc::new(StatBundleFiles::new(statistics.clone()))
        }
        _ => Arc::new(RegularBundleFiles::new()),
    };

    (files, Arc::new(RegularTarFileSets::new()))
}
