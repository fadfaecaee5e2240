//! Test modules for the executor crate.
//!
//! Every module runs against a [`MemoryPort`] laid out by [`memory_port`]:
//! keyspace `user` split into `-80` and `80-`, one `users (id, name)`
//! table, and one-row stream chunks.

use std::sync::Arc;

use crate::{MemoryPort, Router, Value};

pub mod split;
pub mod stream;

/// Users seeded by [`seeded`]: (id, name, keyspace id)
pub(crate) const USERS: [(i64, &str, u8); 4] = [
    (1, "ann", 0x10),
    (2, "bob", 0x50),
    (3, "cy", 0x90),
    (4, "di", 0xd0),
];

pub(crate) fn memory_port() -> MemoryPort {
    MemoryPort::builder()
        .keyspace("user", ["-80", "80-"])
        .sharding_column("user", "id")
        .table("user", "users", ["id", "name"])
        .stream_chunk_rows(1)
        .build()
        .unwrap()
}

/// A port holding [`USERS`] and a router over it
pub(crate) fn seeded() -> (MemoryPort, Router) {
    let port = memory_port();
    for (id, name, ksid) in USERS {
        port.seed("user", "users", [ksid], vec![Value::Int(id), Value::from(name)])
            .unwrap();
    }
    let router = Router::new(Arc::new(port.clone()));
    (port, router)
}

/// Ids of `rows`, sorted
pub(crate) fn ids(rows: &[crate::Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|row| match row[0] {
            Value::Int(id) => id,
            ref other => panic!("id is not an integer: {:?}", other),
        })
        .collect();
    ids.sort_unstable();
    ids
}
