//! Concurrent callers against one database file.
//!
//! Every task holds its own clone of the engine; writers serialize on the
//! SQLite write lock, so the checks here are about what survives that
//! serialization: no lost updates, no oversold stock, one open session.

mod common;

use common::{cash, impatient_engine, money, order, product, stock_of, temp_engine};
use std::sync::Arc;
use till_core::{CashSessionStatus, MovementType, OrderStatus, SaleStatus};
use till_engine::{EngineError, Worker};
use tokio::sync::Barrier;

const TASKS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalizes_never_oversell() {
    let (_dir, engine) = temp_engine().await;
    engine.sessions().open("U1", money(0)).await.unwrap();
    let p = product(&engine, 3, 500).await;
    let first = order(&engine, &[(&p, 2, 500)]).await;
    let second = order(&engine, &[(&p, 2, 500)]).await;

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for order_id in [first, second] {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.sales().finalize_sale(&order_id, cash(1_000, 1_000)).await
        }));
    }

    let mut sold = 0;
    let mut short = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(sale) => {
                assert_eq!(sale.status, SaleStatus::Completed);
                sold += 1;
            }
            Err(EngineError::InsufficientStock { available, requested, .. }) => {
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
                short += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!((sold, short), (1, 1));
    assert_eq!(stock_of(&engine, &p).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_opens_leave_one_session() {
    let (_dir, engine) = temp_engine().await;

    let barrier = Arc::new(Barrier::new(TASKS));
    let mut handles = Vec::new();
    for i in 0..TASKS {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.sessions().open(&format!("U{i}"), money(100)).await
        }));
    }

    let mut opened = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(opened, 1);
    assert_eq!(engine.db().cash_sessions().count_open().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_movements_lose_no_updates() {
    let (_dir, engine) = temp_engine().await;
    let session = engine.sessions().open("U1", money(1_000)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..TASKS * 4 {
        let engine = engine.clone();
        let session_id = session.id.clone();
        handles.push(tokio::spawn(async move {
            let (kind, amount) = if i % 2 == 0 {
                (MovementType::Entry, 300)
            } else {
                (MovementType::Exit, 100)
            };
            engine
                .sessions()
                .add_movement(&session_id, kind, money(amount), "drawer")
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 16 entries of 3.00, 16 exits of 1.00
    let reread = engine.sessions().get(&session.id).await.unwrap();
    assert_eq!(reread.current_balance_cents, 1_000 + 16 * 300 - 16 * 100);
    assert_eq!(engine.sessions().movements(&session.id).await.unwrap().len(), 32);

    let closed = engine.sessions().close(&session.id, None).await.unwrap();
    assert_eq!(closed.closing_balance_cents, Some(reread.current_balance_cents));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sales_and_close_race_keeps_journal_consistent() {
    let (_dir, engine) = temp_engine().await;
    let session = engine.sessions().open("U1", money(0)).await.unwrap();
    let p = product(&engine, 100, 250).await;

    let mut orders = Vec::new();
    for _ in 0..TASKS {
        orders.push(order(&engine, &[(&p, 1, 250)]).await);
    }

    let mut handles = Vec::new();
    for order_id in orders {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.sales().finalize_sale(&order_id, cash(250, 250)).await
        }));
    }
    let closer = {
        let engine = engine.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move { engine.sessions().close(&session_id, None).await })
    };

    let mut sold = 0_i64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => sold += 1,
            Err(EngineError::NoOpenSession) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    let closed = closer.await.unwrap().unwrap();

    // sales that beat the close are in its balance, the rest never happened
    assert_eq!(closed.closing_balance_cents, Some(sold * 250));
    assert_eq!(stock_of(&engine, &p).await, 100 - sold);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_runs_finalize_in_background() {
    let (_dir, engine) = temp_engine().await;
    engine.sessions().open("U1", money(0)).await.unwrap();
    let p = product(&engine, 5, 400).await;
    let order_id = order(&engine, &[(&p, 2, 400)]).await;

    let worker = Worker::on_current_runtime(engine.clone()).unwrap();
    let ticket = worker.submit(move |engine| async move {
        engine.sales().finalize_sale(&order_id, cash(800, 1_000)).await
    });

    let sale = ticket.wait().await.unwrap();
    assert_eq!(sale.change_due_cents, 200);
    assert_eq!(stock_of(&engine, &p).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_held_lock_exhausts_retries_and_changes_nothing() {
    let (_dir, engine) = impatient_engine().await;
    let session = engine.sessions().open("U1", money(100)).await.unwrap();
    let p = product(&engine, 4, 300).await;
    let order_id = order(&engine, &[(&p, 1, 300)]).await;

    // another writer sits on the database lock for the whole test
    let mut blocker = engine.db().begin_locked().await.unwrap();

    let err = engine
        .sessions()
        .add_movement(&session.id, MovementType::Entry, money(50), "float")
        .await
        .unwrap_err();
    assert_exhausted(err);

    let err = engine.sessions().close(&session.id, None).await.unwrap_err();
    assert_exhausted(err);

    let err = engine
        .sales()
        .finalize_sale(&order_id, cash(300, 300))
        .await
        .unwrap_err();
    assert_exhausted(err);

    blocker.rollback().await.unwrap();

    let reread = engine.sessions().get(&session.id).await.unwrap();
    assert_eq!(reread.status, CashSessionStatus::Open);
    assert_eq!(reread.current_balance_cents, 100);
    assert!(engine.sessions().movements(&session.id).await.unwrap().is_empty());
    assert_eq!(stock_of(&engine, &p).await, 4);
    let order = engine.db().orders().get_by_id(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Open);
    assert!(engine.sales().find_by_order(&order_id).await.unwrap().is_none());
}

fn assert_exhausted(err: EngineError) {
    match err {
        EngineError::RetryExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, EngineError::TransientContention(_)));
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
}
