//! Batch results under out-of-order completion.

use crate::common::*;
use shardgate::{BatchQuery, BoundQuery, Context, ErrorKind, Output, RpcCode, Target, Value};

fn element(tag: &str) -> BatchQuery {
    BatchQuery::new(BoundQuery::new(tag), Target::shards("user", ["-80"]))
}

#[tokio::test]
async fn results_follow_input_order_not_completion_order() {
    init_tracing();
    let port = ScriptedPort::new();
    let router = shardgate::Router::new(port.clone());

    let call = tokio::spawn({
        let router = router.clone();
        async move {
            router
                .execute_batch(&Context::background(), vec![element("a"), element("b"), element("c")], false)
                .await
        }
    });

    let mut parked = port.take(3).await;
    // Answer last-submitted first, each with its own SQL text.
    while let Some(request) = parked.pop() {
        let tag = request.sql();
        request.answer_tagged(&tag);
    }

    let results = call.await.unwrap().unwrap();
    let tags: Vec<Value> = results.iter().map(|r| r.rows[0][0].clone()).collect();
    assert_eq!(tags, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    assert!(port.cancelled().is_empty());
}

#[tokio::test]
async fn failure_leaves_independent_siblings_running() {
    init_tracing();
    let port = ScriptedPort::new();
    let router = shardgate::Router::new(port.clone());

    let call = tokio::spawn({
        let router = router.clone();
        async move {
            router
                .execute_batch(&Context::background(), vec![element("a"), element("b"), element("c")], false)
                .await
        }
    });

    let parked = port.take(3).await;
    let mut outstanding = Vec::new();
    for request in parked {
        if request.sql() == "b" {
            request.completer.complete(Err(shardgate::Error::shard(
                RpcCode::ResourceExhausted,
                "user",
                "-80",
                "pool full",
            )));
        } else {
            outstanding.push(request);
        }
    }

    // The failure alone does not finish the call or withdraw the others.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!call.is_finished());
    assert!(port.cancelled().is_empty());

    for request in outstanding {
        let tag = request.sql();
        assert!(request.answer_tagged(&tag), "sibling {} was dropped", tag);
    }

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.rpc_code(), Some(RpcCode::ResourceExhausted));
    assert!(err.to_string().contains("batch element 1"), "{}", err);
    assert!(port.cancelled().is_empty());
}

#[tokio::test]
async fn atomic_batch_is_one_request() {
    let port = ScriptedPort::new();
    let router = shardgate::Router::new(port.clone());

    let call = tokio::spawn({
        let router = router.clone();
        async move {
            router
                .execute_batch(&Context::background(), vec![element("a"), element("b")], true)
                .await
        }
    });

    let mut parked = port.take(1).await;
    assert_eq!(parked.len(), 1);
    let request = parked.remove(0);
    match &request.command {
        shardgate::Command::ExecuteBatch(batch) => {
            assert!(batch.as_transaction);
            assert_eq!(batch.queries.len(), 2);
        }
        other => panic!("expected ExecuteBatch, got {}", other.name()),
    }
    // A port answering with the wrong shape is reported, not trusted.
    request.completer.complete(Ok(Output::Unit));

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.rpc_code(), Some(RpcCode::InternalError));
}

#[tokio::test]
async fn lost_answer_is_a_transport_error() {
    let port = ScriptedPort::new();
    let router = shardgate::Router::new(port.clone());

    let call = tokio::spawn({
        let router = router.clone();
        async move {
            router
                .execute_shards(&Context::background(), BoundQuery::new("a"), "user", ["-80"])
                .await
        }
    });

    drop(port.take(1).await);
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
