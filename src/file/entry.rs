use std::io::{self, Write};

use tar::{Builder, EntryType, Header};

use crate::error::Result;

use super::{EntryKind, FileHeader};

pub const TAR_BLOCK_SIZE: u64 = 512;

pub fn padding_len(size: u64) -> usize {
    ((TAR_BLOCK_SIZE - size % TAR_BLOCK_SIZE) % TAR_BLOCK_SIZE) as usize
}

/// Appends the header blocks for `header` declaring `size` body bytes. The
/// builder emits GNU long name and long link records when a path overflows;
/// the body and its padding are left to the caller.
pub fn append_header<W: Write>(
    builder: &mut Builder<W>,
    header: &FileHeader,
    size: u64,
) -> Result<()> {
    let mut name = header.name.clone();
    if header.kind == EntryKind::Directory && !name.ends_with('/') {
        name.push('/');
    }

    let (entry_type, entry_size) = match header.kind {
        EntryKind::File => (EntryType::Regular, size),
        EntryKind::Directory => (EntryType::Directory, 0),
        EntryKind::Symlink => (EntryType::Symlink, 0),
    };

    let mut tar_header = Header::new_gnu();
    tar_header.set_entry_type(entry_type);
    tar_header.set_size(entry_size);
    tar_header.set_mode(header.mode);
    tar_header.set_uid(header.uid.into());
    tar_header.set_gid(header.gid.into());
    tar_header.set_mtime(header.modified.timestamp().max(0).unsigned_abs());

    match &header.link_target {
        Some(target) => builder.append_link(&mut tar_header, &name, target)?,
        None => builder.append_data(&mut tar_header, &name, io::empty())?,
    }
    Ok(())
}
