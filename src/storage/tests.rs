use crate::error::Error;

use super::{s3::next_part, LocalStorage, MemoryStorage, Storage, StorageUrl};

#[test]
fn storage_url_parse() {
    assert_eq!(
        "s3://bucket/backups".parse::<StorageUrl>().unwrap(),
        StorageUrl::S3("bucket/backups".to_owned())
    );
    assert_eq!(
        "file:///tmp/backups".parse::<StorageUrl>().unwrap(),
        StorageUrl::Local("/tmp/backups".into())
    );
    assert_eq!(
        "memory://".parse::<StorageUrl>().unwrap(),
        StorageUrl::Memory
    );
    assert!("ftp://host".parse::<StorageUrl>().is_err());
    assert!("s3://".parse::<StorageUrl>().is_err());
}

#[tokio::test]
async fn memory_list_filters_prefix() {
    let storage = MemoryStorage::new();
    storage.put("a/1", vec![1]).await.unwrap();
    storage.put("a/2", vec![2]).await.unwrap();
    storage.put("b/1", vec![3]).await.unwrap();

    let keys: Vec<_> = storage
        .list("a/")
        .await
        .unwrap()
        .into_iter()
        .map(|object| object.key)
        .collect();
    assert_eq!(keys, vec!["a/1", "a/2"]);
}

#[tokio::test]
async fn memory_get_missing() {
    let storage = MemoryStorage::new();
    assert_eq!(
        storage.get("missing").await,
        Err(Error::ItemNotFound("missing".to_owned()))
    );
    assert_eq!(storage.try_get("missing").await, Ok(None));
}

#[tokio::test]
async fn memory_failing_writes() {
    let storage = MemoryStorage::failing_writes("bad/");
    assert!(storage.put("bad/key", vec![]).await.is_err());
    storage.put("good/key", vec![]).await.unwrap();
    assert_eq!(storage.keys(), vec!["good/key"]);
}

#[tokio::test]
async fn memory_copy() {
    let storage = MemoryStorage::new();
    storage.put("from", vec![1, 2, 3]).await.unwrap();
    storage.copy("from", "to").await.unwrap();
    assert_eq!(storage.object("to"), Some(vec![1, 2, 3]));
    assert_eq!(storage.stats().copy_requests, 1);
}

#[tokio::test]
async fn local_put_stream_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().to_owned(), None);
    let (sender, receiver) = async_channel::bounded(2);

    let producer = tokio::spawn(async move {
        for chunk in [vec![1, 2], vec![3], vec![4, 5, 6]] {
            sender.send(chunk).await.unwrap();
        }
    });

    storage.put_stream("backup/part_001.tar", receiver).await.unwrap();
    producer.await.unwrap();

    assert_eq!(
        storage.get("backup/part_001.tar").await.unwrap(),
        vec![1, 2, 3, 4, 5, 6]
    );

    storage.put("backup/other", vec![]).await.unwrap();
    storage.put("elsewhere", vec![]).await.unwrap();
    let keys: Vec<_> = storage
        .list("backup/")
        .await
        .unwrap()
        .into_iter()
        .map(|object| object.key)
        .collect();
    assert_eq!(keys, vec!["backup/other", "backup/part_001.tar"]);
}

#[tokio::test]
async fn local_get_missing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().to_owned(), None);
    assert!(!storage.exists("nope").await.unwrap());
    assert_eq!(storage.try_get("nope").await, Ok(None));
}

#[tokio::test]
async fn stream_parts_fill_to_part_size() {
    let (sender, receiver) = async_channel::unbounded();
    for chunk in [vec![1; 3], vec![2; 3], vec![3; 3]] {
        sender.send(chunk).await.unwrap();
    }
    drop(sender);

    let first = next_part(&receiver, 5).await;
    assert_eq!(first, [vec![1; 3], vec![2; 3]].concat());
    assert_eq!(next_part(&receiver, 5).await, vec![3; 3]);
    assert!(next_part(&receiver, 5).await.is_empty());
}
