//! Streams are released exactly once on every exit path.

use crate::common::*;
use shardgate::{BoundQuery, Context, ErrorKind};

const ALL_SHARDS: [&str; 4] = ["-40", "40-80", "80-c0", "c0-"];

#[tokio::test]
async fn full_read_matches_single_execution() {
    init_tracing();
    let port = memory_port();
    seed_orders(&port, 20);
    let router = router_over(&port);
    let ctx = Context::background();
    let query = BoundQuery::new("select id, total from orders");

    let streamed = router
        .stream_execute_shards(&ctx, query.clone(), "user", ALL_SHARDS)
        .await
        .unwrap()
        .collect(&ctx)
        .await
        .unwrap();
    let single = router
        .execute_shards(&ctx, query, "user", ALL_SHARDS)
        .await
        .unwrap();

    assert_eq!(streamed.fields, single.fields);
    assert_eq!(ids(&streamed.rows), ids(&single.rows));
    eventually("producer finished", || port.counters().open_streams == 0).await;
    assert_eq!(port.counters().cancels, 0);
}

#[tokio::test]
async fn early_close_cancels_once() {
    let port = memory_port();
    seed_orders(&port, 20);
    let router = router_over(&port);
    let ctx = Context::background();

    let mut cursor = router
        .stream_execute_shards(&ctx, BoundQuery::new("select * from orders"), "user", ALL_SHARDS)
        .await
        .unwrap();
    for _ in 0..3 {
        assert!(cursor.next_row(&ctx).await.unwrap().is_some());
    }
    cursor.close();
    cursor.close();
    drop(cursor);

    assert_eq!(port.counters().cancels, 1);
    assert_eq!(router.stats().streams_released, 1);
    eventually("producer aborted", || port.counters().open_streams == 0).await;
}

#[tokio::test]
async fn streams_refuse_writes() {
    let port = memory_port();
    let router = router_over(&port);

    let err = router
        .stream_execute_shards(&Context::background(), BoundQuery::new("delete from orders"), "user", ["-40"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(router.stats().streams_opened, 0);
}
