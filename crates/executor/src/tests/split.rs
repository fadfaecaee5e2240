//! Split query tests: parts partition the table.

use super::{ids, seeded};
use crate::{BoundQuery, Context, ErrorKind, RpcCode};

#[tokio::test]
async fn test_parts_cover_every_row_once() {
    let (_, router) = seeded();
    let ctx = Context::background();
    let query = BoundQuery::new("select * from users");

    let parts = router
        .split_query(&ctx, "user", query.clone(), "id", 3)
        .await
        .unwrap();
    assert!(!parts.is_empty());
    assert!(parts.len() <= 3);
    assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), 4);

    let mut rows = Vec::new();
    for part in &parts {
        assert_eq!(part.keyspace, "user");
        let result = router
            .execute(&ctx, part.query.clone(), part.target())
            .await
            .unwrap();
        assert_eq!(result.len() as u64, part.size);
        rows.extend(result.rows);
    }

    let whole = router
        .execute_shards(&ctx, query, "user", ["-80", "80-"])
        .await
        .unwrap();
    assert_eq!(ids(&rows), ids(&whole.rows));
}

#[tokio::test]
async fn test_split_of_empty_table_is_one_full_part() {
    let port = super::memory_port();
    let router = crate::Router::new(std::sync::Arc::new(port));

    let parts = router
        .split_query(&Context::background(), "user", BoundQuery::new("select * from users"), "", 4)
        .await
        .unwrap();
    assert_eq!(parts.len(), 1);
    assert!(parts[0].key_ranges[0].is_full());
    assert_eq!(parts[0].size, 0);
}

#[tokio::test]
async fn test_split_argument_errors() {
    let (port, router) = seeded();
    let ctx = Context::background();

    let err = router
        .split_query(&ctx, "user", BoundQuery::new("select * from users"), "id", 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Caller);

    let err = router
        .split_query(&ctx, "", BoundQuery::new("select * from users"), "id", 2)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Caller);
    assert_eq!(port.counters().submitted, 0);

    let err = router
        .split_query(&ctx, "user", BoundQuery::new("select * from users"), "age", 2)
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(RpcCode::BadInput));

    let err = router
        .split_query(&ctx, "user", BoundQuery::new("delete from users"), "id", 2)
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(RpcCode::BadInput));
}
