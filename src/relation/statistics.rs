use std::collections::HashMap;

use log::trace;
use serde::{Deserialize, Serialize};

use super::{RelFileNode, RelFileSegment};

/// Tuple counters reported by the database for one relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelationStat {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl RelationStat {
    pub fn update_count(&self) -> u64 {
        self.inserted
            .saturating_add(self.updated)
            .saturating_add(self.deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelationStatEntry {
    #[serde(flatten)]
    pub node: RelFileNode,
    #[serde(flatten)]
    pub stat: RelationStat,
}

#[derive(Debug, Clone, Default)]
pub struct RelFileStatistics {
    stats: HashMap<RelFileNode, RelationStat>,
}

impl RelFileStatistics {
    pub fn new() -> Self {
        RelFileStatistics::default()
    }

    pub fn from_entries(entries: Vec<RelationStatEntry>) -> Self {
        let stats = entries
            .into_iter()
            .map(|entry| (entry.node, entry.stat))
            .collect();
        RelFileStatistics { stats }
    }

    pub fn insert(&mut self, node: RelFileNode, stat: RelationStat) {
        self.stats.insert(node, stat);
    }

    /// Number of tuple changes for the relation stored at `path`, or 0 if
    /// the path is not a relation file or the relation has no entry.
    pub fn file_update_count(&self, path: &str) -> u64 {
        let Ok(segment) = RelFileSegment::parse(path) else {
            return 0;
        };

        match self.stats.get(&segment.node) {
            Some(stat) => stat.update_count(),
            None => {
                trace!("no statistics for relation {}", segment.node);
                0
            }
        }
    }
}
