use std::{collections::HashSet, sync::Arc};

use tempfile::tempdir;

use crate::{
    bundle::{
        BackupFileDescription, FileDescriptions, RegularBundleFiles, RegularTarFileSets,
        TarFileSetMap,
    },
    config::BackupConfig,
    container::ContainerQueue,
    error::Error,
    file::{ComposeFileInfo, EntryKind, FileHeader},
    packer::{FilePacker, IncrementBase},
    relation::{
        apply_increment, IncrementHeader, PagedFileDeltaMap, RelFileNode, RelFileStatistics,
        RelationStat,
    },
    segment::{
        metadata_path, segment_path, AoRelFileMetadata, AoRelFileStorageMap, AoStorageType,
        SegmentStore,
    },
    sentinel::{BackupSentinel, PreviousBackup},
    stats::BackupStats,
    storage::Storage,
    task::FailFast,
    testing::{
        file_header, memory_uploader, missing_file, mtime, tar_entries, valid_page, write_file,
    },
    upload::Uploader,
};

use super::{copy::copied_container_name, new_composer, rating, ComposeContext, ComposerKind};

const BACKUP: &str = "backup_2";

fn config(composer: ComposerKind) -> BackupConfig {
    BackupConfig {
        composer,
        upload_concurrency: 2,
        upload_disk_concurrency: 2,
        ..BackupConfig::default()
    }
}

fn context(uploader: Uploader, config: BackupConfig) -> ComposeContext {
    let fail_fast = FailFast::new();
    let queue = ContainerQueue::new(
        config.upload_concurrency,
        config.tar_size_threshold,
        BACKUP,
        uploader,
        fail_fast.clone(),
    )
    .unwrap();
    let packer = FilePacker::new(
        (&config).into(),
        None,
        Arc::new(RegularBundleFiles::new()),
        Arc::new(BackupStats::new()),
        fail_fast,
    );

    ComposeContext {
        backup_name: BACKUP.to_owned(),
        config,
        queue,
        packer,
        tar_file_sets: Arc::new(RegularTarFileSets::new()),
        previous: None,
        statistics: None,
        segment_store: None,
    }
}

fn directory(name: &str) -> FileHeader {
    FileHeader {
        kind: EntryKind::Directory,
        mode: 0o700,
        ..file_header(name, 0, mtime(1_700_000_000))
    }
}

fn container_holding<'a>(sets: &'a TarFileSetMap, path: &str) -> &'a str {
    sets.iter()
        .find(|(_, members)| members.iter().any(|member| member == path))
        .map(|(container, _)| container.as_str())
        .unwrap()
}

fn member_count(sets: &TarFileSetMap) -> usize {
    sets.values().map(Vec::len).sum()
}

#[test]
fn composer_kind_names() {
    assert_eq!("rating".parse::<ComposerKind>().unwrap(), ComposerKind::Rating);
    assert_eq!(
        "database".parse::<ComposerKind>().unwrap(),
        ComposerKind::Directory
    );
    assert_eq!(ComposerKind::Greenplum.to_string(), "greenplum");
    assert_eq!(
        "tarball".parse::<ComposerKind>().unwrap_err(),
        Error::UnknownComposer("tarball".to_owned())
    );
}

#[tokio::test]
async fn missing_inputs_are_rejected() {
    let (_storage, uploader) = memory_uploader();
    let err = new_composer(context(uploader.clone(), config(ComposerKind::Copy)))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::MissingComposerInput {
            composer: "copy",
            ..
        }
    ));

    let err = new_composer(context(uploader, config(ComposerKind::Greenplum)))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::MissingComposerInput {
            composer: "greenplum",
            ..
        }
    ));
}

#[tokio::test]
async fn regular_records_every_path_once() {
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();
    let mut composer = new_composer(context(uploader, config(ComposerKind::Regular))).unwrap();
    assert_eq!(composer.kind(), ComposerKind::Regular);

    composer.add_header(directory("base")).await.unwrap();
    for name in ["base/1/100", "base/1/101", "global/pg_control"] {
        let info = write_file(dir.path(), name, name.as_bytes());
        composer.add_file(info).await.unwrap();
    }

    let mut unreadable = write_file(dir.path(), "base/1/102", b"gone");
    unreadable.is_unreadable = true;
    composer.add_file(unreadable).await.unwrap();
    composer.skip_file(&file_header("postmaster.pid", 10, mtime(1_000)));

    let files = composer.files();
    let sets = composer.finish_composing().await.unwrap();
    let files = files.files();

    assert_eq!(files.len(), 6);
    assert!(files["base/1/102"].is_skipped);
    assert!(files["postmaster.pid"].is_skipped);
    assert!(!files["base/1/100"].is_skipped);
    assert_eq!(member_count(&sets), 4);

    let mut stored = HashSet::new();
    for container in sets.keys() {
        let bytes = storage
            .object(&format!("{BACKUP}/tar_partitions/{container}"))
            .unwrap();
        stored.extend(tar_entries(&bytes).into_iter().map(|(name, _)| name));
    }
    for name in ["base/1/100", "base/1/101", "global/pg_control"] {
        assert!(stored.contains(name), "{name} was not stored");
    }
    assert!(!stored.contains("base/1/102"));
}

#[tokio::test]
async fn regular_failure_publishes_nothing() {
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();
    let mut composer = new_composer(context(uploader, config(ComposerKind::Regular))).unwrap();

    composer
        .add_file(write_file(dir.path(), "base/1/100", &[1; 100]))
        .await
        .unwrap();
    std::fs::create_dir_all(dir.path().join("base/1/200")).unwrap();
    let broken = ComposeFileInfo::new(
        dir.path().join("base/1/200"),
        file_header("base/1/200", 100, mtime(1_000)),
        false,
    );
    composer.add_file(broken).await.unwrap();

    let err = composer.finish_composing().await.unwrap_err();
    assert!(matches!(err, Error::Other(_)));
    assert!(storage
        .keys()
        .iter()
        .all(|key| !key.contains("tar_partitions")));
}

#[tokio::test]
async fn failure_stops_retiring_containers() {
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();
    let config = BackupConfig {
        tar_size_threshold: 512,
        upload_concurrency: 1,
        upload_disk_concurrency: 1,
        ..config(ComposerKind::Directory)
    };
    let context = context(uploader, config);
    let queue = context.queue.clone();
    let mut composer = new_composer(context).unwrap();

    for number in 0..5 {
        let name = format!("base/1/{}", 100 + u32::from(number));
        composer
            .add_file(write_file(dir.path(), &name, &[number; 1024]))
            .await
            .unwrap();
    }

    std::fs::create_dir_all(dir.path().join("base/1/200")).unwrap();
    let broken = ComposeFileInfo::new(
        dir.path().join("base/1/200"),
        file_header("base/1/200", 1024, mtime(1_700_000_000)),
        false,
    );
    composer.add_file(broken).await.unwrap();

    for number in 0..6 {
        let name = format!("base/1/{}", 300 + u32::from(number));
        let err = composer
            .add_file(write_file(dir.path(), &name, &[number; 1024]))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
    }

    let files = composer.files();
    let err = composer.finish_composing().await.unwrap_err();
    assert!(matches!(err, Error::Other(_)));

    let retired: Vec<String> = (1..=5).map(|number| format!("part_{number:03}.tar")).collect();
    assert_eq!(queue.retired_containers(), retired);

    let stored: Vec<String> = storage
        .keys()
        .into_iter()
        .filter(|key| key.contains("tar_partitions"))
        .collect();
    let expected: Vec<String> = retired
        .iter()
        .map(|name| format!("{BACKUP}/tar_partitions/{name}"))
        .collect();
    assert_eq!(stored, expected);

    let packed: Vec<String> = files.files().into_keys().collect();
    let expected: Vec<String> = (100..105).map(|number| format!("base/1/{number}")).collect();
    assert_eq!(packed, expected);
}

#[tokio::test]
async fn directory_packs_only_its_subtree() {
    let dir = tempdir().unwrap();
    let (_storage, uploader) = memory_uploader();
    let mut composer = new_composer(context(uploader, config(ComposerKind::Directory))).unwrap();

    composer.add_header(directory("global")).await.unwrap();
    composer
        .add_file(write_file(dir.path(), "base/1/100", &[1; 10]))
        .await
        .unwrap();
    composer
        .add_file(write_file(dir.path(), "global/pg_control", &[2; 10]))
        .await
        .unwrap();
    composer
        .add_file(write_file(dir.path(), "basement/file", &[3; 10]))
        .await
        .unwrap();

    let files = composer.files();
    let sets = composer.finish_composing().await.unwrap();
    let files = files.files();

    assert!(!files["base/1/100"].is_skipped);
    assert!(files["global/pg_control"].is_skipped);
    assert!(files["basement/file"].is_skipped);
    assert!(!files["global"].is_skipped);

    let members: HashSet<&str> = sets.values().flatten().map(String::as_str).collect();
    assert_eq!(members, HashSet::from(["base/1/100", "global"]));
}

#[test]
fn rating_collections_split_on_size_and_first_change() {
    let dir = tempdir().unwrap();
    let file = |name: &str| missing_file(dir.path(), name, 0);
    let names = rating::collection_names(
        vec![
            (file("a"), 0, 600),
            (file("d"), 3, 10),
            (file("b"), 0, 600),
            (file("e"), 1, 10),
            (file("c"), 0, 600),
        ],
        1000,
    );

    assert_eq!(
        names,
        vec![
            vec!["a".to_owned(), "b".to_owned()],
            vec!["c".to_owned()],
            vec!["e".to_owned(), "d".to_owned()],
        ]
    );
}

#[tokio::test]
async fn rating_keeps_unchanged_relations_together() {
    let dir = tempdir().unwrap();
    let (_storage, uploader) = memory_uploader();
    let mut statistics = RelFileStatistics::new();
    statistics.insert(
        RelFileNode {
            spc_node: 1663,
            db_node: 16384,
            rel_node: 600,
        },
        RelationStat {
            inserted: 0,
            updated: 5,
            deleted: 0,
        },
    );

    let mut context = context(uploader, config(ComposerKind::Rating));
    context.statistics = Some(Arc::new(statistics));
    let mut composer = new_composer(context).unwrap();

    composer.add_header(directory("base/16384")).await.unwrap();
    for name in ["base/16384/600", "base/16384/500", "base/16384/501"] {
        composer
            .add_file(write_file(dir.path(), name, &[7; 100]))
            .await
            .unwrap();
    }

    let files = composer.files();
    let sets = composer.finish_composing().await.unwrap();

    assert_eq!(files.files().len(), 4);
    assert_eq!(member_count(&sets), 4);
    let unchanged = container_holding(&sets, "base/16384/500");
    assert_eq!(container_holding(&sets, "base/16384/501"), unchanged);
    assert_ne!(container_holding(&sets, "base/16384/600"), unchanged);
}

fn paths(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

fn previous_backup(tar_file_sets: TarFileSetMap, files: FileDescriptions) -> Arc<PreviousBackup> {
    Arc::new(PreviousBackup {
        name: "backup_1".to_owned(),
        sentinel: BackupSentinel {
            tar_file_sets,
            files,
            uncompressed_size: 0,
            compressed_size: 0,
            increment_from: None,
            increment_from_lsn: None,
            start_time: mtime(1_700_000_000),
            finish_time: mtime(1_700_000_100),
            composer: ComposerKind::Rating,
        },
    })
}

#[test]
fn copied_names_stay_distinct() {
    assert_eq!(copied_container_name("part_001.tar.zst"), "copy_part_001.tar.zst");
    assert_eq!(copied_container_name("copy_part_001.tar"), "copy_copy_part_001.tar");
}

#[tokio::test]
async fn copy_of_a_copy_keeps_its_own_key() {
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();
    for container in ["part_001.tar", "copy_part_001.tar"] {
        storage
            .put(&format!("backup_1/tar_partitions/{container}"), container.into())
            .await
            .unwrap();
    }

    let tar_file_sets = TarFileSetMap::from([
        ("part_001.tar".to_owned(), paths(&["base/1/10"])),
        ("copy_part_001.tar".to_owned(), paths(&["base/1/11"])),
    ]);
    let unchanged = BackupFileDescription::new(false, false, mtime(1_700_000_000));
    let files = FileDescriptions::from([
        ("base/1/10".to_owned(), unchanged.clone()),
        ("base/1/11".to_owned(), unchanged),
    ]);

    let mut context = context(uploader, config(ComposerKind::Copy));
    context.previous = Some(previous_backup(tar_file_sets, files));
    let mut composer = new_composer(context).unwrap();

    for name in ["base/1/10", "base/1/11"] {
        composer
            .add_file(write_file(dir.path(), name, name.as_bytes()))
            .await
            .unwrap();
    }

    let files = composer.files();
    let sets = composer.finish_composing().await.unwrap();

    assert_eq!(sets.len(), 2);
    assert_eq!(sets["copy_part_001.tar"], vec!["base/1/10".to_owned()]);
    assert_eq!(sets["copy_copy_part_001.tar"], vec!["base/1/11".to_owned()]);
    assert_eq!(
        storage
            .object("backup_2/tar_partitions/copy_part_001.tar")
            .unwrap(),
        b"part_001.tar"
    );
    assert_eq!(
        storage
            .object("backup_2/tar_partitions/copy_copy_part_001.tar")
            .unwrap(),
        b"copy_part_001.tar"
    );
    assert_eq!(files.files().len(), 2);
}

#[tokio::test]
async fn copy_reuses_only_untouched_containers() {
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();
    for container in ["part_001.tar", "part_002.tar", "part_003.tar"] {
        storage
            .put(&format!("backup_1/tar_partitions/{container}"), container.into())
            .await
            .unwrap();
    }

    let tar_file_sets = TarFileSetMap::from([
        ("part_001.tar".to_owned(), paths(&["base/1/10", "base/1/11"])),
        ("part_002.tar".to_owned(), paths(&["base/1/12"])),
        ("part_003.tar".to_owned(), paths(&["base/1/13", "base/1/14"])),
    ]);
    let unchanged = BackupFileDescription::new(false, false, mtime(1_700_000_000));
    let changed = BackupFileDescription::new(false, false, mtime(1_600_000_000));
    let files = FileDescriptions::from([
        ("base/1/10".to_owned(), unchanged.clone()),
        ("base/1/11".to_owned(), unchanged.clone()),
        ("base/1/12".to_owned(), changed),
        ("base/1/13".to_owned(), unchanged.clone()),
        ("base/1/14".to_owned(), unchanged),
    ]);

    let mut context = context(uploader, config(ComposerKind::Copy));
    context.previous = Some(previous_backup(tar_file_sets, files));
    let mut composer = new_composer(context).unwrap();

    for name in ["base/1/10", "base/1/11", "base/1/12", "base/1/13"] {
        composer
            .add_file(write_file(dir.path(), name, name.as_bytes()))
            .await
            .unwrap();
    }

    let files = composer.files();
    let sets = composer.finish_composing().await.unwrap();

    assert_eq!(
        storage
            .object("backup_2/tar_partitions/copy_part_001.tar")
            .unwrap(),
        b"part_001.tar"
    );
    assert_eq!(
        sets["copy_part_001.tar"],
        vec!["base/1/10".to_owned(), "base/1/11".to_owned()]
    );
    assert!(!container_holding(&sets, "base/1/12").starts_with("copy_"));
    assert!(!container_holding(&sets, "base/1/13").starts_with("copy_"));
    assert!(storage
        .object("backup_2/tar_partitions/copy_part_002.tar")
        .is_none());
    assert!(storage
        .object("backup_2/tar_partitions/copy_part_003.tar")
        .is_none());

    let files = files.files();
    assert_eq!(files.len(), 4);
    assert_eq!(files["base/1/10"].mtime, mtime(1_700_000_000));
}

#[tokio::test]
async fn greenplum_diverts_segments_to_the_store() {
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();

    let mut storage_map = AoRelFileStorageMap::new();
    let metadata = AoRelFileMetadata {
        relname_md5: "9f2a".to_owned(),
        storage_type: AoStorageType::Rows,
        eof: 64,
        mod_count: 2,
    };
    let node = RelFileNode {
        spc_node: 1663,
        db_node: 16384,
        rel_node: 500,
    };
    storage_map.insert(node, 1, metadata);

    let mut context = context(uploader, config(ComposerKind::Greenplum));
    let store = SegmentStore::new(
        BACKUP,
        context.queue.uploader().clone(),
        Arc::new(storage_map),
        HashSet::new(),
        &context.packer,
        context.fail_fast().clone(),
    );
    context.segment_store = Some(Arc::new(store));
    let mut composer = new_composer(context).unwrap();

    composer
        .add_file(write_file(dir.path(), "base/16384/500.1", &[5; 64]))
        .await
        .unwrap();
    composer
        .add_file(write_file(dir.path(), "base/16384/700", &[6; 64]))
        .await
        .unwrap();

    let files = composer.files();
    let sets = composer.finish_composing().await.unwrap();

    let key = "1663_16384_9f2a_500_1_2_aoseg";
    assert_eq!(storage.object(&segment_path(key)).unwrap(), vec![5; 64]);
    assert!(storage.object(&metadata_path(BACKUP)).is_some());
    assert_eq!(member_count(&sets), 1);
    assert_eq!(container_holding(&sets, "base/16384/700"), "part_001.tar");
    assert_eq!(files.files().len(), 2);
}

#[tokio::test]
async fn full_container_is_retired_before_the_next_file() {
    const BLOCK_SIZE: u32 = 512;
    let dir = tempdir().unwrap();
    let (storage, uploader) = memory_uploader();
    let config = BackupConfig {
        tar_size_threshold: 10240,
        upload_concurrency: 1,
        upload_disk_concurrency: 1,
        block_size: BLOCK_SIZE,
        ..BackupConfig::default()
    };

    let relation_700 = RelFileNode {
        spc_node: 1663,
        db_node: 16384,
        rel_node: 700,
    };
    let mut delta_map = PagedFileDeltaMap::new();
    delta_map.add_locations(relation_700, [2, 5]);
    let base_files = FileDescriptions::from([(
        "base/16384/700".to_owned(),
        BackupFileDescription::new(false, false, mtime(1_600_000_000)),
    )]);

    let mut context = context(uploader, config.clone());
    context.packer = FilePacker::new(
        (&config).into(),
        Some(IncrementBase {
            lsn: 100,
            delta_map: Arc::new(delta_map),
            files: Some(Arc::new(base_files)),
        }),
        context.packer.files().clone(),
        context.packer.stats().clone(),
        context.fail_fast().clone(),
    );

    let previous: Vec<u8> = (0..20)
        .flat_map(|_| valid_page(BLOCK_SIZE, 10, 1))
        .collect();
    let current: Vec<u8> = (0..20)
        .flat_map(|block_no| {
            let fill = if block_no == 2 || block_no == 5 { 9 } else { 1 };
            valid_page(BLOCK_SIZE, 10, fill)
        })
        .collect();

    let whole = write_file(dir.path(), "base/16384/600", &[4; 10240]);
    let changed = write_file(dir.path(), "base/16384/700", &current);
    let mut unreadable = write_file(dir.path(), "base/16384/800", &[5; 512]);
    unreadable.is_unreadable = true;

    context.pack_file(&whole).await.unwrap();
    assert_eq!(context.queue.retired_containers(), vec!["part_001.tar"]);
    context.pack_file(&changed).await.unwrap();
    context.pack_file(&unreadable).await.unwrap();
    let sets = context.finish(Ok(())).await.unwrap();

    assert_eq!(
        sets,
        TarFileSetMap::from([
            ("part_001.tar".to_owned(), paths(&["base/16384/600"])),
            ("part_002.tar".to_owned(), paths(&["base/16384/700"])),
        ])
    );

    let first = storage.object("backup_2/tar_partitions/part_001.tar").unwrap();
    let first = tar_entries(&first);
    assert_eq!(first, vec![("base/16384/600".to_owned(), vec![4; 10240])]);

    let second = storage.object("backup_2/tar_partitions/part_002.tar").unwrap();
    let second = tar_entries(&second);
    let (name, increment) = &second[0];
    assert_eq!(name, "base/16384/700");
    assert_eq!(
        increment.len() as u64,
        IncrementHeader::encoded_len(2) + 2 * u64::from(BLOCK_SIZE)
    );
    assert_eq!(apply_increment(&previous, increment, BLOCK_SIZE).unwrap(), current);

    let files = context.files().files();
    assert!(!files["base/16384/600"].is_incremented);
    assert!(files["base/16384/700"].is_incremented);
    assert!(files["base/16384/800"].is_skipped);
}

#[tokio::test]
async fn packing_never_holds_more_containers_than_the_pool() {
    let dir = tempdir().unwrap();
    let (_storage, uploader) = memory_uploader();
    let context = context(uploader, config(ComposerKind::Regular));
    let queue = context.queue.clone();
    let mut composer = new_composer(context).unwrap();

    for rel_node in 100..116 {
        let name = format!("base/1/{rel_node}");
        composer
            .add_file(write_file(dir.path(), &name, &[1; 4096]))
            .await
            .unwrap();
    }

    let sets = composer.finish_composing().await.unwrap();
    assert_eq!(member_count(&sets), 16);
    assert!(queue.peak_checked_out() <= 2);
    assert!(queue.peak_checked_out() >= 1);
}
