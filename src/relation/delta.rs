use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{RelFileNode, RelFileSegment};

/// Serialized form of one relation's changed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeltaEntry {
    #[serde(flatten)]
    pub node: RelFileNode,
    pub blocks: Vec<u32>,
}

/// Changed block numbers per relation since the previous backup started.
///
/// Block numbers are relative to the whole relation, not to a segment file.
#[derive(Debug, Clone, Default)]
pub struct PagedFileDeltaMap {
    blocks: HashMap<RelFileNode, BTreeSet<u32>>,
}

impl PagedFileDeltaMap {
    pub fn new() -> Self {
        PagedFileDeltaMap::default()
    }

    pub fn from_entries(entries: Vec<DeltaEntry>) -> Self {
        let mut delta_map = PagedFileDeltaMap::new();
        for entry in entries {
            delta_map.add_locations(entry.node, entry.blocks);
        }

        delta_map
    }

    pub fn add_location(&mut self, node: RelFileNode, block_no: u32) {
        self.blocks.entry(node).or_default().insert(block_no);
    }

    pub fn add_locations<I: IntoIterator<Item = u32>>(&mut self, node: RelFileNode, block_nos: I) {
        self.blocks.entry(node).or_default().extend(block_nos);
    }

    pub fn lookup(&self, node: &RelFileNode) -> Option<&BTreeSet<u32>> {
        self.blocks.get(node)
    }

    /// Changed blocks of one segment file, renumbered from the start of that file.
    pub fn blocks_for_segment(
        &self,
        segment: &RelFileSegment,
        blocks_per_segment: u32,
    ) -> Option<BTreeSet<u32>> {
        let blocks = self.lookup(&segment.node)?;
        let first = u64::from(segment.segment) * u64::from(blocks_per_segment);
        let last = first + u64::from(blocks_per_segment);
        let selected = blocks
            .iter()
            .map(|&block_no| u64::from(block_no))
            .filter(|block_no| (first..last).contains(block_no))
            .filter_map(|block_no| u32::try_from(block_no - first).ok())
            .collect();
        Some(selected)
    }
}
