//! On-disk layout of relation files inside a data directory.

mod delta;
mod increment;
mod page;
mod statistics;

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use self::{
    delta::{DeltaEntry, PagedFileDeltaMap},
    increment::{apply_increment, write_increment_header, IncrementHeader, INCREMENT_MAGIC},
    page::{page_checksum, PageHeader, PAGE_HEADER_SIZE},
    statistics::{RelFileStatistics, RelationStat, RelationStatEntry},
};

pub const DEFAULT_BLOCK_SIZE: u32 = 8192;
pub const REL_FILE_SIZE_BOUND: u64 = 1 << 30;
pub const DEFAULT_SPC_NODE: u32 = 1663;
pub const DEFAULT_TABLESPACE: &str = "base";
pub const NON_DEFAULT_TABLESPACE: &str = "pg_tblspc";

static PAGED_FILE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)([.]\d+)?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelFileNode {
    pub spc_node: u32,
    pub db_node: u32,
    pub rel_node: u32,
}

impl fmt::Display for RelFileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.spc_node, self.db_node, self.rel_node)
    }
}

/// One segment file of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelFileSegment {
    pub node: RelFileNode,
    pub segment: u32,
}

impl RelFileSegment {
    /// Parses `base/<db>/<rel>[.<seg>]` or
    /// `pg_tblspc/<spc>/<version>/<db>/<rel>[.<seg>]`, relative to the data directory.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || Error::InvalidRelationPath(path.to_owned());
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let (&name, dirs) = parts.split_last().ok_or_else(invalid)?;
        let captures = PAGED_FILE_NAME.captures(name).ok_or_else(invalid)?;
        let rel_node = captures[1].parse().map_err(|_| invalid())?;
        let segment = match captures.get(2) {
            Some(suffix) => suffix.as_str()[1..].parse().map_err(|_| invalid())?,
            None => 0,
        };

        let (spc_node, db_dir) = match dirs {
            [.., tablespace, db] if *tablespace == DEFAULT_TABLESPACE => (DEFAULT_SPC_NODE, *db),
            [.., tablespaces, spc, _version, db] if *tablespaces == NON_DEFAULT_TABLESPACE => {
                (spc.parse().map_err(|_| invalid())?, *db)
            }
            _ => return Err(invalid()),
        };

        let db_node = db_dir.parse().map_err(|_| invalid())?;
        let node = RelFileNode {
            spc_node,
            db_node,
            rel_node,
        };

        Ok(RelFileSegment { node, segment })
    }
}

pub fn blocks_per_segment(block_size: u32) -> u32 {
    u32::try_from(REL_FILE_SIZE_BOUND / u64::from(block_size)).unwrap_or(u32::MAX)
}

/// Whether a regular file of `size` bytes at `path` holds whole pages of a relation.
pub fn is_paged_file(path: &str, size: u64, block_size: u32) -> bool {
    let in_tablespace = path
        .split('/')
        .any(|part| part == DEFAULT_TABLESPACE || part == NON_DEFAULT_TABLESPACE);
    let name = path.rsplit('/').next().unwrap_or(path);

    in_tablespace
        && size > 0
        && size % u64::from(block_size) == 0
        && PAGED_FILE_NAME.is_match(name)
}
