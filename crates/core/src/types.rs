//! Core addressing types
//!
//! This module defines the leaf types every request is built from:
//! - TabletRole: which class of replica serves the query
//! - KeyspaceId: byte key deciding which shard owns a row
//! - KeyRange: half-open `[start, end)` range of keyspace ids
//! - BoundQuery: the query envelope (text, bind variables, role)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::value::Value;

/// Bind variables, keyed by parameter name
pub type Bindings = BTreeMap<String, Value>;

/// Read/write capability class of the targeted tablet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletRole {
    /// Read-write primary
    Primary,
    /// Read-only replica eligible for promotion
    Replica,
    /// Read-only replica for analytics and batch reads
    Rdonly,
}

impl TabletRole {
    /// All roles, in display order
    pub const ALL: [TabletRole; 3] = [TabletRole::Primary, TabletRole::Replica, TabletRole::Rdonly];

    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TabletRole::Primary => "primary",
            TabletRole::Replica => "replica",
            TabletRole::Rdonly => "rdonly",
        }
    }

    /// Whether the role accepts writes
    pub fn is_writable(&self) -> bool {
        matches!(self, TabletRole::Primary)
    }
}

impl Default for TabletRole {
    fn default() -> Self {
        TabletRole::Primary
    }
}

impl fmt::Display for TabletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TabletRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "master" => Ok(TabletRole::Primary),
            "replica" => Ok(TabletRole::Replica),
            "rdonly" => Ok(TabletRole::Rdonly),
            other => Err(Error::caller(format!(
                "unknown tablet role '{}', expected primary, replica or rdonly",
                other
            ))),
        }
    }
}

/// Byte-sequence key used to locate the shard owning a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyspaceId(Vec<u8>);

impl KeyspaceId {
    /// Wrap raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for KeyspaceId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for KeyspaceId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for KeyspaceId {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for KeyspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// Half-open range `[start, end)` of keyspace ids
///
/// An empty `start` means "from the lowest id", an empty `end` means
/// "to the end of the key space". `KeyRange::full()` covers everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive lower bound, empty for unbounded
    pub start: Vec<u8>,
    /// Exclusive upper bound, empty for unbounded
    pub end: Vec<u8>,
}

impl KeyRange {
    /// Create a range from raw bounds
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The range covering the whole key space
    pub fn full() -> Self {
        Self::default()
    }

    /// Check if both bounds are open
    pub fn is_full(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }

    /// Check if `id` falls inside this range
    pub fn contains(&self, id: &[u8]) -> bool {
        id >= self.start.as_slice() && (self.end.is_empty() || id < self.end.as_slice())
    }

    /// Check if two ranges share at least one keyspace id
    pub fn intersects(&self, other: &KeyRange) -> bool {
        let starts_before_other_ends = other.end.is_empty() || self.start < other.end;
        let other_starts_before_end = self.end.is_empty() || other.start < self.end;
        starts_before_other_ends && other_starts_before_end
    }

    /// Reject ranges whose bounded start is not below their bounded end
    pub fn validate(&self) -> Result<()> {
        if !self.end.is_empty() && self.start >= self.end {
            return Err(Error::caller(format!(
                "key range {} is empty or inverted",
                self
            )));
        }
        Ok(())
    }

    /// Parse a shard name such as `"-80"`, `"40-80"`, `"80-"` or `"-"`
    ///
    /// Each side is a hex-encoded bound; an empty side is unbounded. A name
    /// without a dash (an unsharded keyspace's `"0"`) covers the full range.
    pub fn from_shard_name(name: &str) -> Result<Self> {
        let Some((start, end)) = name.split_once('-') else {
            return Ok(KeyRange::full());
        };
        let range = KeyRange::new(unhex(start)?, unhex(end)?);
        range.validate()?;
        Ok(range)
    }

    /// Format as a shard name (inverse of [`KeyRange::from_shard_name`])
    pub fn shard_name(&self) -> String {
        format!("{}-{}", hex(&self.start), hex(&self.end))
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", hex(&self.start), hex(&self.end))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn unhex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::caller(format!(
            "shard bound '{}' has an odd number of hex digits",
            s
        )));
    }
    let digit = |b: u8| {
        char::from(b)
            .to_digit(16)
            .ok_or_else(|| Error::caller(format!("shard bound '{}' is not hex", s)))
    };
    s.as_bytes()
        .chunks(2)
        .map(|pair| Ok((digit(pair[0])? << 4 | digit(pair[1])?) as u8))
        .collect()
}

/// Query envelope: text, bind variables and target tablet role
///
/// Immutable once built; the builder methods consume and return `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundQuery {
    sql: String,
    bind_vars: Bindings,
    role: TabletRole,
}

impl BoundQuery {
    /// Create a query against the primary with no bind variables
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bind_vars: Bindings::new(),
            role: TabletRole::default(),
        }
    }

    /// Add (or replace) one bind variable
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind_vars.insert(name.into(), value.into());
        self
    }

    /// Replace all bind variables
    pub fn with_bindings(mut self, bind_vars: Bindings) -> Self {
        self.bind_vars = bind_vars;
        self
    }

    /// Set the tablet role
    pub fn with_role(mut self, role: TabletRole) -> Self {
        self.role = role;
        self
    }

    /// Query text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind variables
    pub fn bind_vars(&self) -> &Bindings {
        &self.bind_vars
    }

    /// Target tablet role
    pub fn role(&self) -> TabletRole {
        self.role
    }

    /// Reject envelopes with blank query text
    pub fn validate(&self) -> Result<()> {
        if self.sql.trim().is_empty() {
            return Err(Error::caller("query text is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("replica".parse::<TabletRole>().unwrap(), TabletRole::Replica);
        assert_eq!("MASTER".parse::<TabletRole>().unwrap(), TabletRole::Primary);
        assert_eq!(TabletRole::Rdonly.to_string(), "rdonly");
        assert!("spare".parse::<TabletRole>().is_err());
        assert!(TabletRole::Primary.is_writable());
        assert!(!TabletRole::Replica.is_writable());
    }

    #[test]
    fn test_shard_name_parsing() {
        assert_eq!(KeyRange::from_shard_name("-80").unwrap(), KeyRange::new(vec![], vec![0x80]));
        assert_eq!(KeyRange::from_shard_name("80-").unwrap(), KeyRange::new(vec![0x80], vec![]));
        assert_eq!(
            KeyRange::from_shard_name("40-80").unwrap(),
            KeyRange::new(vec![0x40], vec![0x80])
        );
        assert!(KeyRange::from_shard_name("-").unwrap().is_full());
        assert!(KeyRange::from_shard_name("0").unwrap().is_full());
    }

    #[test]
    fn test_shard_name_rejects_bad_bounds() {
        assert!(KeyRange::from_shard_name("8-").is_err());
        assert!(KeyRange::from_shard_name("zz-").is_err());
        assert!(KeyRange::from_shard_name("80-40").is_err());
        assert!(KeyRange::from_shard_name("+f-").is_err());
    }

    #[test]
    fn test_shard_name_rejects_non_ascii() {
        for name in ["€a-", "-€a", "4é-80"] {
            let err = KeyRange::from_shard_name(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Caller, "{}", name);
        }
    }

    #[test]
    fn test_contains_is_half_open() {
        let range = KeyRange::new(vec![0x40], vec![0x80]);
        assert!(range.contains(&[0x40]));
        assert!(range.contains(&[0x7f, 0xff]));
        assert!(!range.contains(&[0x80]));
        assert!(!range.contains(&[0x3f]));
        assert!(KeyRange::full().contains(&[]));
    }

    #[test]
    fn test_intersects() {
        let low = KeyRange::from_shard_name("-80").unwrap();
        let high = KeyRange::from_shard_name("80-").unwrap();
        let mid = KeyRange::from_shard_name("40-c0").unwrap();
        assert!(!low.intersects(&high));
        assert!(low.intersects(&mid));
        assert!(high.intersects(&mid));
        assert!(KeyRange::full().intersects(&low));
    }

    #[test]
    fn test_bound_query_builder() {
        let q = BoundQuery::new("select * from t where id = :id")
            .bind("id", 7i64)
            .with_role(TabletRole::Replica);
        assert_eq!(q.role(), TabletRole::Replica);
        assert_eq!(q.bind_vars().get("id"), Some(&Value::Int(7)));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_blank_query_is_caller_error() {
        let err = BoundQuery::new("   ").validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Caller);
    }

    proptest! {
        #[test]
        fn prop_shard_name_roundtrip(start in proptest::collection::vec(any::<u8>(), 0..4),
                                     end in proptest::collection::vec(any::<u8>(), 0..4)) {
            let range = KeyRange::new(start, end);
            prop_assume!(range.validate().is_ok());
            let parsed = KeyRange::from_shard_name(&range.shard_name()).unwrap();
            prop_assert_eq!(parsed, range);
        }

        #[test]
        fn prop_split_point_partitions_ids(split in 1u8..=255, id in proptest::collection::vec(any::<u8>(), 0..4)) {
            let low = KeyRange::new(vec![], vec![split]);
            let high = KeyRange::new(vec![split], vec![]);
            prop_assert!(low.contains(&id) ^ high.contains(&id));
        }
    }
}
