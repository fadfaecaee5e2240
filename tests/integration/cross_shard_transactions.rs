//! Transactions spanning several shards commit or vanish as a whole.

use crate::common::*;
use shardgate::{BoundQuery, Context, ErrorKind, KeyRange, RpcCode, ScopeState};

fn insert(id: i64) -> BoundQuery {
    BoundQuery::new("insert into orders (id, user_id, total) values (:id, 1, 5)").bind("id", id)
}

#[tokio::test]
async fn commit_publishes_every_shard() {
    init_tracing();
    let port = memory_port();
    let router = router_over(&port);
    let ctx = Context::background();

    let mut tx = router.begin(&ctx).await.unwrap();
    for (id, ksid) in [(1, 0x01u8), (2, 0x41), (3, 0x81), (4, 0xc1)] {
        tx.execute_keyspace_ids(&ctx, insert(id), "user", [[ksid]])
            .await
            .unwrap();
    }
    assert_eq!(tx.session().shard_count(), 4);
    assert_eq!(port.open_transactions(), 4);

    tx.commit(&ctx).await.unwrap();
    assert_eq!(ids(&port.rows("user", "orders").unwrap()), vec![1, 2, 3, 4]);
    assert_eq!(port.open_transactions(), 0);
}

#[tokio::test]
async fn failed_commit_publishes_nothing() {
    let port = memory_port();
    let router = router_over(&port);
    let ctx = Context::background();

    let mut tx = router.begin(&ctx).await.unwrap();
    for (id, ksid) in [(1, 0x01u8), (2, 0xc1)] {
        tx.execute_keyspace_ids(&ctx, insert(id), "user", [[ksid]])
            .await
            .unwrap();
    }
    port.inject_failure("user", "c0-", RpcCode::IntegrityError);

    let err = tx.commit(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert!(err.to_string().contains("commit"), "{}", err);
    assert_eq!(tx.state(), ScopeState::RolledBack);
    assert!(port.rows("user", "orders").unwrap().is_empty());
    eventually("shard transactions discarded", || port.open_transactions() == 0).await;
}

#[tokio::test]
async fn range_delete_inside_transaction() {
    let port = memory_port();
    seed_orders(&port, 12);
    let router = router_over(&port);
    let ctx = Context::background();

    let mut tx = router.begin(&ctx).await.unwrap();
    let deleted = tx
        .execute_key_ranges(
            &ctx,
            BoundQuery::new("delete from orders"),
            "user",
            [KeyRange::new(vec![0x40], vec![0xc0])],
        )
        .await
        .unwrap();
    assert!(deleted.rows_affected > 0);

    let remaining_inside = tx
        .execute_shards(&ctx, BoundQuery::new("select id from orders"), "user", ["-40", "40-80", "80-c0", "c0-"])
        .await
        .unwrap();
    assert_eq!(remaining_inside.len() as u64 + deleted.rows_affected, 12);
    assert_eq!(port.rows("user", "orders").unwrap().len(), 12);

    tx.commit(&ctx).await.unwrap();
    assert_eq!(port.rows("user", "orders").unwrap().len(), remaining_inside.len());
}

#[tokio::test]
async fn entity_targeted_write_in_transaction() {
    let port = memory_port();
    seed_orders(&port, 6);
    let router = router_over(&port);
    let ctx = Context::background();

    // Order 2 lives at keyspace id 37 and has user_id 2.
    let mut tx = router.begin(&ctx).await.unwrap();
    let deleted = tx
        .execute_entity_ids(
            &ctx,
            BoundQuery::new("delete from orders"),
            "user",
            "user_id",
            [(b"2".to_vec(), [37u8])],
        )
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, 1);
    tx.commit(&ctx).await.unwrap();

    assert_eq!(ids(&port.rows("user", "orders").unwrap()), vec![1, 3, 4, 5, 6]);
}
