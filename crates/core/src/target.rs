//! Targeting descriptors
//!
//! A [`Target`] says which shards of a keyspace a query runs against. The
//! four addressing strategies are mutually exclusive, so they form one enum
//! that the router dispatches on once.
//!
//! Empty target collections are legal: they address no shard and produce an
//! empty result without contacting the backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{KeyRange, KeyspaceId};

/// Which shards a query is routed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Explicit shard names
    Shards {
        /// Keyspace name
        keyspace: String,
        /// Shard names, in dispatch order. Duplicates issue redundant requests.
        shards: Vec<String>,
    },
    /// Keyspace ids, each owned by exactly one shard
    KeyspaceIds {
        /// Keyspace name
        keyspace: String,
        /// Keyspace ids, in dispatch order
        ids: Vec<KeyspaceId>,
    },
    /// Key ranges, each possibly spanning several shards
    KeyRanges {
        /// Keyspace name
        keyspace: String,
        /// Ranges, in dispatch order
        ranges: Vec<KeyRange>,
    },
    /// Entity ids mapped to the keyspace ids that route them
    EntityIds {
        /// Keyspace name
        keyspace: String,
        /// Column holding the entity id
        entity_column: String,
        /// Entity id to keyspace id; keys are unique
        #[serde(with = "entity_pairs")]
        mapping: BTreeMap<Vec<u8>, KeyspaceId>,
    },
}

// Byte-string map keys are not valid JSON object keys, so the mapping
// travels as a sequence of pairs.
mod entity_pairs {
    use super::KeyspaceId;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(map: &BTreeMap<Vec<u8>, KeyspaceId>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<BTreeMap<Vec<u8>, KeyspaceId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs: Vec<(Vec<u8>, KeyspaceId)> = Vec::deserialize(d)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Discriminant of a [`Target`], for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// [`Target::Shards`]
    Shards,
    /// [`Target::KeyspaceIds`]
    KeyspaceIds,
    /// [`Target::KeyRanges`]
    KeyRanges,
    /// [`Target::EntityIds`]
    EntityIds,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Shards => "shards",
            TargetKind::KeyspaceIds => "keyspace_ids",
            TargetKind::KeyRanges => "key_ranges",
            TargetKind::EntityIds => "entity_ids",
        };
        f.write_str(name)
    }
}

impl Target {
    /// Target explicit shards
    pub fn shards<I, S>(keyspace: impl Into<String>, shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::Shards {
            keyspace: keyspace.into(),
            shards: shards.into_iter().map(Into::into).collect(),
        }
    }

    /// Target the shards owning the given keyspace ids
    pub fn keyspace_ids<I, K>(keyspace: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyspaceId>,
    {
        Target::KeyspaceIds {
            keyspace: keyspace.into(),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Target the shards overlapping the given key ranges
    pub fn key_ranges(keyspace: impl Into<String>, ranges: impl IntoIterator<Item = KeyRange>) -> Self {
        Target::KeyRanges {
            keyspace: keyspace.into(),
            ranges: ranges.into_iter().collect(),
        }
    }

    /// Target entity ids through their keyspace ids
    pub fn entity_ids<I, E, K>(
        keyspace: impl Into<String>,
        entity_column: impl Into<String>,
        mapping: I,
    ) -> Self
    where
        I: IntoIterator<Item = (E, K)>,
        E: Into<Vec<u8>>,
        K: Into<KeyspaceId>,
    {
        Target::EntityIds {
            keyspace: keyspace.into(),
            entity_column: entity_column.into(),
            mapping: mapping
                .into_iter()
                .map(|(entity, ksid)| (entity.into(), ksid.into()))
                .collect(),
        }
    }

    /// Keyspace every variant carries
    pub fn keyspace(&self) -> &str {
        match self {
            Target::Shards { keyspace, .. }
            | Target::KeyspaceIds { keyspace, .. }
            | Target::KeyRanges { keyspace, .. }
            | Target::EntityIds { keyspace, .. } => keyspace,
        }
    }

    /// Variant discriminant
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Shards { .. } => TargetKind::Shards,
            Target::KeyspaceIds { .. } => TargetKind::KeyspaceIds,
            Target::KeyRanges { .. } => TargetKind::KeyRanges,
            Target::EntityIds { .. } => TargetKind::EntityIds,
        }
    }

    /// Number of addressed elements (shards, ids, ranges or entities)
    pub fn len(&self) -> usize {
        match self {
            Target::Shards { shards, .. } => shards.len(),
            Target::KeyspaceIds { ids, .. } => ids.len(),
            Target::KeyRanges { ranges, .. } => ranges.len(),
            Target::EntityIds { mapping, .. } => mapping.len(),
        }
    }

    /// Check if the target addresses nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject malformed descriptors before any network interaction
    pub fn validate(&self) -> Result<()> {
        if self.keyspace().trim().is_empty() {
            return Err(Error::caller(format!("{} target has an empty keyspace", self.kind())));
        }
        match self {
            Target::Shards { shards, .. } => {
                if let Some(pos) = shards.iter().position(|s| s.trim().is_empty()) {
                    return Err(Error::caller(format!("shard name at position {} is empty", pos)));
                }
            }
            Target::KeyspaceIds { .. } => {}
            Target::KeyRanges { ranges, .. } => {
                for range in ranges {
                    range.validate()?;
                }
            }
            Target::EntityIds { entity_column, .. } => {
                if entity_column.trim().is_empty() {
                    return Err(Error::caller("entity target has an empty entity column"));
                }
            }
        }
        Ok(())
    }
}
