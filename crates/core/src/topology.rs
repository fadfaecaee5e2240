//! Serving topology of a keyspace
//!
//! Returned by topology lookups: for each tablet role, the shards serving
//! that role and the key range each one owns.

use serde::{Deserialize, Serialize};

use crate::types::{KeyRange, TabletRole};

/// One shard and the key range it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReference {
    /// Shard name, e.g. `"-80"`
    pub name: String,
    /// Keyspace ids owned by this shard
    pub key_range: KeyRange,
}

/// Shards serving one tablet role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspacePartition {
    /// Role served
    pub role: TabletRole,
    /// Shards, ordered by key range
    pub shards: Vec<ShardReference>,
}

/// Serving graph of a keyspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvKeyspace {
    /// Keyspace name
    pub name: String,
    /// Column the keyspace is sharded by, if declared
    pub sharding_column: Option<String>,
    /// One partition per served role
    pub partitions: Vec<KeyspacePartition>,
}

impl SrvKeyspace {
    /// Shards serving `role`
    pub fn shards(&self, role: TabletRole) -> &[ShardReference] {
        self.partitions
            .iter()
            .find(|p| p.role == role)
            .map(|p| p.shards.as_slice())
            .unwrap_or(&[])
    }

    /// Shard serving `role` that owns `keyspace_id`
    pub fn shard_for(&self, role: TabletRole, keyspace_id: &[u8]) -> Option<&ShardReference> {
        self.shards(role)
            .iter()
            .find(|s| s.key_range.contains(keyspace_id))
    }
}
