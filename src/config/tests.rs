use crate::{composer::ComposerKind, error::Error};

use super::BackupConfig;

#[test]
fn default_config_is_valid() {
    let config = BackupConfig::default();
    config.validate().unwrap();
    assert_eq!(config.composer, ComposerKind::Regular);
    assert!(config.upload_disk_concurrency >= 1);
}

#[test]
fn zero_concurrency_fails_fast() {
    let config = BackupConfig {
        upload_concurrency: 0,
        ..BackupConfig::default()
    };
    assert_eq!(
        config.validate(),
        Err(Error::InvalidConcurrency {
            name: "upload concurrency"
        })
    );

    let config = BackupConfig {
        upload_disk_concurrency: 0,
        ..BackupConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn bad_block_size_and_threshold_fail() {
    let config = BackupConfig {
        block_size: 1000,
        ..BackupConfig::default()
    };
    assert_eq!(config.validate(), Err(Error::InvalidBlockSize(1000)));

    let config = BackupConfig {
        tar_size_threshold: 0,
        ..BackupConfig::default()
    };
    assert_eq!(config.validate(), Err(Error::InvalidTarSizeThreshold));
}

#[test]
fn unknown_compression_fails() {
    let config = BackupConfig {
        compression: "brotli".to_owned(),
        ..BackupConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn deserializes_with_defaults() {
    let config: BackupConfig =
        serde_json::from_str(r#"{"composer": "rating", "tar_size_threshold": 1024}"#).unwrap();
    assert_eq!(config.composer, ComposerKind::Rating);
    assert_eq!(config.tar_size_threshold, 1024);
    assert_eq!(config.block_size, 8192);
}

#[test]
fn skipping_files_metadata_needs_regular_composer() {
    let config = BackupConfig {
        without_files_metadata: true,
        composer: ComposerKind::Copy,
        ..BackupConfig::default()
    };
    assert_eq!(
        config.validate(),
        Err(Error::FilesMetadataRequired("copy".to_owned()))
    );

    let config = BackupConfig {
        without_files_metadata: true,
        ..BackupConfig::default()
    };
    config.validate().unwrap();
}
