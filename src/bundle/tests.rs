use std::sync::Arc;

use crate::{
    relation::{RelFileNode, RelFileStatistics, RelationStat, DEFAULT_SPC_NODE},
    testing::{file_header, mtime},
};

use super::{
    BundleFiles, CorruptBlocksInfo, NopBundleFiles, NopTarFileSets, RegularBundleFiles,
    RegularTarFileSets, StatBundleFiles, TarFileSets, MAX_CORRUPT_BLOCKS_IN_FILE_DESC,
};

#[test]
fn regular_bundle_files_record_kind() {
    let files = RegularBundleFiles::new();
    files.add_file(&file_header("a", 1, mtime(10)), false);
    files.add_file(&file_header("b", 1, mtime(20)), true);
    files.add_skipped_file(&file_header("c", 1, mtime(30)));

    let snapshot = files.files();
    assert_eq!(snapshot.len(), 3);
    assert!(!snapshot["a"].is_incremented && !snapshot["a"].is_skipped);
    assert!(snapshot["b"].is_incremented);
    assert!(snapshot["c"].is_skipped);
    assert_eq!(snapshot["c"].mtime, mtime(30));
}

#[test]
fn corrupt_blocks_are_sampled_unless_storing_all() {
    let blocks: Vec<u32> = (0..25).collect();

    let sampled = CorruptBlocksInfo::new(&blocks, false);
    assert_eq!(sampled.corrupted_blocks_count, 25);
    assert_eq!(
        sampled.some_corrupted_blocks.len(),
        MAX_CORRUPT_BLOCKS_IN_FILE_DESC
    );

    let all = CorruptBlocksInfo::new(&blocks, true);
    assert_eq!(all.some_corrupted_blocks, blocks);
}

#[test]
fn corrupt_blocks_absent_when_clean() {
    let files = RegularBundleFiles::new();
    files.add_file_with_corrupt_blocks(&file_header("a", 1, mtime(0)), false, &[], false);
    files.add_file_with_corrupt_blocks(&file_header("b", 1, mtime(0)), false, &[3], false);

    let snapshot = files.files();
    assert_eq!(snapshot["a"].corrupt_blocks, None);
    assert_eq!(
        snapshot["b"].corrupt_blocks.as_ref().unwrap().some_corrupted_blocks,
        vec![3]
    );
}

#[test]
fn stat_bundle_files_attach_update_counts() {
    let mut statistics = RelFileStatistics::new();
    statistics.insert(
        RelFileNode {
            spc_node: DEFAULT_SPC_NODE,
            db_node: 1,
            rel_node: 2,
        },
        RelationStat {
            inserted: 4,
            updated: 0,
            deleted: 1,
        },
    );

    let files = StatBundleFiles::new(Arc::new(statistics));
    files.add_file(&file_header("base/1/2", 8192, mtime(0)), false);
    files.add_file(&file_header("base/1/3", 8192, mtime(0)), false);

    let snapshot = files.files();
    assert_eq!(snapshot["base/1/2"].updates_count, 5);
    assert_eq!(snapshot["base/1/3"].updates_count, 0);
}

#[test]
fn description_serializes_pascal_case() {
    let files = RegularBundleFiles::new();
    files.add_file(&file_header("a", 1, mtime(0)), true);
    let json = serde_json::to_value(files.files()).unwrap();
    assert_eq!(json["a"]["IsIncremented"], true);
    assert_eq!(json["a"]["IsSkipped"], false);
    assert!(json["a"].get("CorruptBlocks").is_none());
}

#[test]
fn tar_file_sets_append_in_order() {
    let sets = RegularTarFileSets::new();
    sets.add_file("part_001.tar", "a");
    sets.add_files("part_001.tar", &["b".to_owned(), "c".to_owned()]);
    sets.add_file("part_002.tar", "d");

    let snapshot = sets.files();
    assert_eq!(snapshot["part_001.tar"], vec!["a", "b", "c"]);
    assert_eq!(snapshot["part_002.tar"], vec!["d"]);
}

#[test]
fn nop_variants_stay_empty() {
    let sets = NopTarFileSets;
    sets.add_file("part_001.tar", "a");
    assert!(sets.files().is_empty());

    let files = NopBundleFiles;
    files.add_file(&file_header("a", 1, mtime(0)), false);
    assert!(files.files().is_empty());
}
