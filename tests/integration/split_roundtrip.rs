//! Split parts executed one by one return the same rows as the whole query.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::common::*;
use proptest::prelude::*;
use shardgate::{BlockingConn, Value};

fn seeded_port(ksids: &BTreeSet<u8>) -> shardgate::MemoryPort {
    let port = memory_port();
    for (n, ksid) in ksids.iter().enumerate() {
        let id = n as i64 + 1;
        port.seed("user", "orders", [*ksid], vec![Value::Int(id), Value::Int(0), Value::Int(id)])
            .unwrap();
    }
    port
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn parts_partition_the_table(
        ksids in prop::collection::btree_set(any::<u8>(), 0..40),
        split_count in 1u32..8,
    ) {
        let port = seeded_port(&ksids);
        let conn = BlockingConn::new(Arc::new(port)).unwrap();
        let ctx = conn.context();
        let query = conn.query("select * from orders");

        let parts = conn.split_query(&ctx, "user", query.clone(), "id", split_count).unwrap();
        prop_assert!(!parts.is_empty());
        prop_assert!(parts.len() <= split_count as usize);
        prop_assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), ksids.len() as u64);

        let mut rows = Vec::new();
        for part in &parts {
            rows.extend(conn.execute(&ctx, part.query.clone(), part.target()).unwrap().rows);
        }
        let whole = conn
            .execute_shards(&ctx, query, "user", ["-40", "40-80", "80-c0", "c0-"])
            .unwrap();
        prop_assert_eq!(ids(&rows), ids(&whole.rows));
    }
}
