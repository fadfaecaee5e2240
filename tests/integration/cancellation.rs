//! Cancellation reaches the port within bounded time.

use std::time::{Duration, Instant};

use crate::common::*;
use shardgate::{BoundQuery, Context, ErrorKind, Router};

#[tokio::test]
async fn deadline_cancels_in_flight_request() {
    init_tracing();
    let port = ScriptedPort::new();
    let router = Router::new(port.clone());
    let ctx = Context::background().with_timeout(Duration::from_millis(30));

    let started = Instant::now();
    let err = router
        .execute_shards(&ctx, BoundQuery::new("select 1"), "user", ["-80"])
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));
    let parked = port.take(1).await;
    assert_eq!(port.cancelled(), vec![parked[0].id]);
    // The port may still answer; nobody is listening.
    assert!(!parked.into_iter().next().unwrap().answer_tagged("late"));
}

#[tokio::test]
async fn cancel_from_another_task() {
    let port = ScriptedPort::new();
    let router = Router::new(port.clone());
    let ctx = Context::background();

    let call = tokio::spawn({
        let router = router.clone();
        let ctx = ctx.clone();
        async move {
            router
                .execute_shards(&ctx, BoundQuery::new("select 1"), "user", ["-80"])
                .await
        }
    });

    let parked = port.take(1).await;
    ctx.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(port.cancelled(), vec![parked[0].id]);
}

#[tokio::test]
async fn dropping_the_call_cancels_it() {
    let port = ScriptedPort::new();
    let router = Router::new(port.clone());

    let call = tokio::spawn({
        let router = router.clone();
        async move {
            router
                .execute_shards(&Context::background(), BoundQuery::new("select 1"), "user", ["-80"])
                .await
        }
    });
    let parked = port.take(1).await;
    call.abort();

    eventually("cancel after abort", || !port.cancelled().is_empty()).await;
    assert_eq!(port.cancelled(), vec![parked[0].id]);
}

#[tokio::test]
async fn stalled_memory_shard_is_released_by_deadline() {
    let port = memory_port();
    seed_orders(&port, 8);
    port.stall_shard("user", "c0-");
    let router = router_over(&port);

    let ctx = Context::background().with_timeout(Duration::from_millis(30));
    let err = router
        .execute_shards(&ctx, BoundQuery::new("select * from orders"), "user", ["-40", "c0-"])
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(port.counters().cancels, 1);

    port.unstall_shard("user", "c0-");
    let rows = router
        .execute_shards(&Context::background(), BoundQuery::new("select * from orders"), "user", ["-40", "c0-"])
        .await
        .unwrap();
    assert!(!rows.is_empty());
}
