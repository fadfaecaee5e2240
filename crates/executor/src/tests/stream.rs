//! Stream tests: chunked delivery, release on every exit path.

use super::{ids, seeded};
use crate::{BoundQuery, Context, ErrorKind, RpcCode};

fn select_all() -> BoundQuery {
    BoundQuery::new("select * from users")
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_stream_yields_every_row() {
    let (port, router) = seeded();
    let ctx = Context::background();

    let cursor = router
        .stream_execute_shards(&ctx, select_all(), "user", ["-80", "80-"])
        .await
        .unwrap();
    assert_eq!(cursor.fields().len(), 2);

    let result = cursor.collect(&ctx).await.unwrap();
    assert_eq!(result.fields.len(), 2);
    assert_eq!(ids(&result.rows), vec![1, 2, 3, 4]);

    settle().await;
    assert_eq!(port.counters().open_streams, 0);
    let stats = router.stats();
    assert_eq!(stats.streams_opened, 1);
    assert_eq!(stats.streams_live(), 0);
}

#[tokio::test]
async fn test_stream_by_keyspace_ids_and_ranges() {
    let (_, router) = seeded();
    let ctx = Context::background();

    let by_ids = router
        .stream_execute_keyspace_ids(&ctx, select_all(), "user", [[0x90u8]])
        .await
        .unwrap()
        .collect(&ctx)
        .await
        .unwrap();
    assert_eq!(ids(&by_ids.rows), vec![3]);

    let by_range = router
        .stream_execute_key_ranges(&ctx, select_all(), "user", [crate::KeyRange::new(vec![], vec![0x60])])
        .await
        .unwrap()
        .collect(&ctx)
        .await
        .unwrap();
    assert_eq!(ids(&by_range.rows), vec![1, 2]);

    let by_entity = router
        .stream_execute_entity_ids(&ctx, select_all(), "user", "name", [(b"di".to_vec(), [0xd0u8])])
        .await
        .unwrap()
        .collect(&ctx)
        .await
        .unwrap();
    assert_eq!(ids(&by_entity.rows), vec![4]);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (port, router) = seeded();
    let ctx = Context::background();

    let mut cursor = router
        .stream_execute_shards(&ctx, select_all(), "user", ["-80", "80-"])
        .await
        .unwrap();
    assert!(cursor.next_row(&ctx).await.unwrap().is_some());

    cursor.close();
    cursor.close();
    assert!(cursor.is_closed());

    let err = cursor.next_row(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Programming);

    // Released once, and the unfinished stream was cancelled once
    assert_eq!(router.stats().streams_released, 1);
    assert_eq!(port.counters().cancels, 1);
    settle().await;
    assert_eq!(port.counters().open_streams, 0);
}

#[tokio::test]
async fn test_drop_releases_unfinished_stream() {
    let (port, router) = seeded();
    let ctx = Context::background();

    {
        let mut cursor = router
            .stream_execute_shards(&ctx, select_all(), "user", ["-80", "80-"])
            .await
            .unwrap();
        cursor.next_row(&ctx).await.unwrap();
    }
    settle().await;

    assert_eq!(port.counters().cancels, 1);
    assert_eq!(port.counters().open_streams, 0);
    assert_eq!(router.stats().streams_live(), 0);
}

#[tokio::test]
async fn test_finished_stream_is_not_cancelled() {
    let (port, router) = seeded();
    let ctx = Context::background();

    let mut cursor = router
        .stream_execute_shards(&ctx, select_all(), "user", ["-80"])
        .await
        .unwrap();
    while cursor.next_row(&ctx).await.unwrap().is_some() {}
    assert!(cursor.is_exhausted());
    cursor.close();

    assert_eq!(port.counters().cancels, 0);
}

#[tokio::test]
async fn test_empty_target_stream_makes_no_call() {
    let (port, router) = seeded();
    let ctx = Context::background();

    let mut cursor = router
        .stream_execute_shards(&ctx, select_all(), "user", Vec::<String>::new())
        .await
        .unwrap();
    assert!(cursor.is_exhausted());
    assert!(cursor.next_row(&ctx).await.unwrap().is_none());
    assert_eq!(port.counters().submitted, 0);
}

#[tokio::test]
async fn test_stream_open_failure() {
    let (port, router) = seeded();
    let err = router
        .stream_execute_shards(
            &Context::background(),
            BoundQuery::new("select * from missing"),
            "user",
            ["-80"],
        )
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(RpcCode::BadInput));
    assert_eq!(port.counters().open_streams, 0);
}

#[tokio::test]
async fn test_deadline_while_opening_cancels_request() {
    let (port, router) = seeded();
    port.stall_shard("user", "-80");
    let ctx = Context::background().with_timeout(std::time::Duration::from_millis(20));

    let err = router
        .stream_execute_shards(&ctx, select_all(), "user", ["-80"])
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(port.counters().cancels, 1);
    assert_eq!(router.stats().streams_opened, 0);
}
