//! Query splitting types
//!
//! A full-table scan can be split into parts that cover disjoint key ranges
//! so the caller can run them in parallel. The backend owns the partitioning;
//! this layer only carries the parts.

use serde::{Deserialize, Serialize};

use crate::target::Target;
use crate::types::{BoundQuery, KeyRange};

/// One independently executable slice of a split query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPart {
    /// Query to run for this part
    pub query: BoundQuery,
    /// Keyspace the ranges belong to
    pub keyspace: String,
    /// Key ranges this part covers
    pub key_ranges: Vec<KeyRange>,
    /// Estimated number of rows in this part
    pub size: u64,
}

impl SplitPart {
    /// Key-range target to execute this part with
    pub fn target(&self) -> Target {
        Target::key_ranges(self.keyspace.clone(), self.key_ranges.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;

    #[test]
    fn test_part_target_is_key_ranges() {
        let part = SplitPart {
            query: BoundQuery::new("select * from t"),
            keyspace: "user".into(),
            key_ranges: vec![KeyRange::new(vec![], vec![0x80])],
            size: 12,
        };
        let target = part.target();
        assert_eq!(target.kind(), TargetKind::KeyRanges);
        assert_eq!(target.keyspace(), "user");
        assert_eq!(target.len(), 1);
    }
}
