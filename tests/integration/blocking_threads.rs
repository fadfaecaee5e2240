//! One blocking connection shared by several threads.

use std::sync::Arc;
use std::thread;

use crate::common::*;
use shardgate::{BlockingConn, Value};

#[test]
fn concurrent_writers_on_one_connection() {
    init_tracing();
    let port = memory_port();
    let conn = Arc::new(BlockingConn::new(Arc::new(port.clone())).unwrap());

    let handles: Vec<_> = (0..4u8)
        .map(|worker| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                let ctx = conn.context();
                for n in 0..10u8 {
                    let id = i64::from(worker) * 100 + i64::from(n);
                    let ksid = worker * 64 + n;
                    let query = conn
                        .query("insert into orders (id, user_id, total) values (:id, :user, 1)")
                        .bind("id", id)
                        .bind("user", i64::from(worker));
                    conn.execute_keyspace_ids(&ctx, query, "user", [[ksid]]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(port.rows("user", "orders").unwrap().len(), 40);
    assert_eq!(conn.stats().calls_succeeded, 40);
}

#[test]
fn transactions_on_separate_threads_stay_isolated() {
    let port = memory_port();
    let conn = Arc::new(BlockingConn::new(Arc::new(port.clone())).unwrap());

    let committed = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            let ctx = conn.context();
            let mut tx = conn.begin(&ctx).unwrap();
            tx.execute_keyspace_ids(
                &ctx,
                conn.query("insert into orders (id, user_id, total) values (1, 1, 1)"),
                "user",
                [[0x10u8]],
            )
            .unwrap();
            tx.commit(&ctx).unwrap();
        })
    };
    let rolled_back = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            let ctx = conn.context();
            let mut tx = conn.begin(&ctx).unwrap();
            tx.execute_keyspace_ids(
                &ctx,
                conn.query("insert into orders (id, user_id, total) values (2, 2, 2)"),
                "user",
                [[0x90u8]],
            )
            .unwrap();
            tx.rollback(&ctx).unwrap();
        })
    };
    committed.join().unwrap();
    rolled_back.join().unwrap();

    let rows = port.rows("user", "orders").unwrap();
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Int(1), Value::Int(1)]]);
    assert_eq!(port.open_transactions(), 0);
}
