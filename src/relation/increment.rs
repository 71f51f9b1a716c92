use crate::error::{Error, Result};

/// "wi" for increment, format version 1, then a signature byte.
pub const INCREMENT_MAGIC: [u8; 4] = [b'w', b'i', b'1', 0x55];

/// Header of a delta-packed file: the original file size and the block
/// numbers whose pages follow the header, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementHeader {
    pub file_size: u64,
    pub blocks: Vec<u32>,
}

impl IncrementHeader {
    pub fn encoded_len(block_count: usize) -> u64 {
        (INCREMENT_MAGIC.len() + 8 + 4 + 4 * block_count) as u64
    }

    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8])> {
        let (magic, rest) = split(bytes, INCREMENT_MAGIC.len())?;
        if magic != INCREMENT_MAGIC {
            return Err(Error::InvalidIncrementHeader);
        }

        let (file_size, rest) = split(rest, 8)?;
        let (count, mut rest) = split(rest, 4)?;
        let file_size = u64::from_le_bytes(file_size.try_into().map_err(|_| Error::InvalidIncrementHeader)?);
        let count = u32::from_le_bytes(count.try_into().map_err(|_| Error::InvalidIncrementHeader)?);

        let mut blocks = Vec::with_capacity((count as usize).min(rest.len() / 4));
        for _ in 0..count {
            let (block_no, next) = split(rest, 4)?;
            blocks.push(u32::from_le_bytes(
                block_no.try_into().map_err(|_| Error::InvalidIncrementHeader)?,
            ));
            rest = next;
        }

        Ok((IncrementHeader { file_size, blocks }, rest))
    }
}

fn split(bytes: &[u8], at: usize) -> Result<(&[u8], &[u8])> {
    if bytes.len() < at {
        Err(Error::InvalidIncrementHeader)
    } else {
        Ok(bytes.split_at(at))
    }
}

pub fn write_increment_header(file_size: u64, blocks: &[u32]) -> Vec<u8> {
    let mut header = Vec::with_capacity(IncrementHeader::encoded_len(blocks.len()) as usize);
    header.extend_from_slice(&INCREMENT_MAGIC);
    header.extend_from_slice(&file_size.to_le_bytes());
    header.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
    for block_no in blocks {
        header.extend_from_slice(&block_no.to_le_bytes());
    }

    header
}

/// Rebuilds a file by laying the pages of `increment` over `base`.
pub fn apply_increment(base: &[u8], increment: &[u8], block_size: u32) -> Result<Vec<u8>> {
    let (header, pages) = IncrementHeader::parse(increment)?;
    let block_size = block_size as usize;
    let expected = (header.blocks.len() * block_size) as u64;
    if (pages.len() as u64) < expected {
        return Err(Error::TruncatedIncrement {
            expected,
            actual: pages.len() as u64,
        });
    }

    let file_size = usize::try_from(header.file_size).map_err(Error::other)?;
    let mut file = base.to_vec();
    file.resize(file_size, 0);

    for (page, &block_no) in pages.chunks_exact(block_size).zip(&header.blocks) {
        let offset = block_no as usize * block_size;
        if offset + block_size > file.len() {
            file.resize(offset + block_size, 0);
        }

        file[offset..offset + block_size].copy_from_slice(page);
    }

    Ok(file)
}
