use std::io::Write;

use super::{Identity, Transform, TransformKind, Zstd};

fn transform_all(transform: &dyn Transform, pieces: &[&[u8]]) -> Vec<u8> {
    let mut writer = transform.wrap().unwrap();
    let mut output = vec![];
    for piece in pieces {
        writer.write_all(piece).unwrap();
        output.extend(writer.drain());
    }

    output.extend(writer.finish().unwrap());
    output
}

#[test]
fn identity_passes_bytes_through() {
    let output = transform_all(&Identity, &[b"abc", b"", b"def"]);
    assert_eq!(output, b"abcdef");
    assert_eq!(Identity.extension(), "");
}

#[test]
fn zstd_output_decodes_after_draining() {
    let input = vec![7u8; 64 * 1024];
    let output = transform_all(&Zstd { level: 3 }, &[&input[..1000], &input[1000..]]);
    assert!(output.len() < input.len());
    assert_eq!(zstd::decode_all(&output[..]).unwrap(), input);
}

#[test]
fn transform_kind_parse() {
    assert_eq!("none".parse::<TransformKind>().unwrap(), TransformKind::Identity);
    assert_eq!(
        "zstd".parse::<TransformKind>().unwrap(),
        TransformKind::Zstd { level: 3 }
    );
    assert!("lz4".parse::<TransformKind>().is_err());
}
