use std::io::{Read, Write};

use crate::testing::{file_header, mtime};

use super::{append_header, padding_len, EntryKind, FileHeader};

fn archive(entries: &[(FileHeader, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(vec![]);
    for (header, body) in entries {
        append_header(&mut builder, header, body.len() as u64).unwrap();
        let writer = builder.get_mut();
        writer.write_all(body).unwrap();
        writer.write_all(&vec![0; padding_len(body.len() as u64)]).unwrap();
    }
    builder.into_inner().unwrap()
}

fn read_back(bytes: &[u8]) -> Vec<(String, Option<String>, Vec<u8>)> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let target = entry
                .link_name()
                .unwrap()
                .map(|target| target.to_string_lossy().into_owned());
            let mut body = vec![];
            entry.read_to_end(&mut body).unwrap();
            (path, target, body)
        })
        .collect()
}

#[test]
fn padding_to_tar_blocks() {
    assert_eq!(padding_len(0), 0);
    assert_eq!(padding_len(1), 511);
    assert_eq!(padding_len(512), 0);
    assert_eq!(padding_len(1000), 24);
}

#[test]
fn header_is_one_block() {
    let header = file_header("base/1/1234", 5, mtime(1_000));
    let bytes = archive(&[(header, b"hello".to_vec())]);
    assert_eq!(bytes.len(), 512 + 512 + 1024);

    assert_eq!(
        read_back(&bytes),
        vec![("base/1/1234".to_owned(), None, b"hello".to_vec())]
    );
}

#[test]
fn long_names_use_gnu_records() {
    let name = format!("base/1/{}", "x".repeat(150));
    let header = file_header(&name, 3, mtime(1_000));
    let bytes = archive(&[(header, b"abc".to_vec())]);
    assert_eq!(bytes.len(), 512 * 3 + 512 + 1024);

    assert_eq!(read_back(&bytes), vec![(name, None, b"abc".to_vec())]);
}

#[test]
fn long_link_targets_use_gnu_records() {
    let target = format!("/mnt/tablespaces/{}", "t".repeat(120));
    let mut header = file_header("pg_tblspc/16384", 0, mtime(1_000));
    header.kind = EntryKind::Symlink;
    header.link_target = Some(target.clone());
    let bytes = archive(&[(header, vec![])]);
    assert_eq!(bytes.len(), 512 * 3 + 1024);

    assert_eq!(
        read_back(&bytes),
        vec![("pg_tblspc/16384".to_owned(), Some(target), vec![])]
    );
}

#[test]
fn directories_have_no_body() {
    let mut header = file_header("base/1", 4096, mtime(1_000));
    header.kind = EntryKind::Directory;
    let mut builder = tar::Builder::new(vec![]);
    append_header(&mut builder, &header, 4096).unwrap();
    let bytes = builder.into_inner().unwrap();

    assert_eq!(
        read_back(&bytes),
        vec![("base/1/".to_owned(), None, vec![])]
    );
}
