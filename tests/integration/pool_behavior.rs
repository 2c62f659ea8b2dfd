//! Pool semantics against a fake store
//!
//! The pool is generic over its connector, so the whole
//! acquire/release/reinitialize lifecycle is testable without PostgreSQL.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bulkgres::error::PoolError;
use bulkgres::pool::{ConnectionPool, ManagedConnection, PoolState};

use crate::common::{FakeStore, fast_pool_settings};

#[tokio::test]
async fn warm_pool_reports_available_connections() {
    let pool = ConnectionPool::new(FakeStore::new(), fast_pool_settings(2, 5)).await;

    let status = pool.status().await;
    assert_eq!(status.active, 0);
    assert_eq!(status.available, 2);
    assert_eq!(status.state, PoolState::Ready);
}

#[tokio::test]
async fn acquire_probes_and_replaces_dead_connections() {
    let pool = ConnectionPool::new(FakeStore::new(), fast_pool_settings(1, 5)).await;

    // Hand the warm connection out and kill it before returning it healthy.
    // The pool must not trust our claim: the next borrower probes it.
    let conn = pool.acquire().await.expect("warm acquire");
    conn.kill();
    pool.release(conn, true).await;

    let replacement = pool.acquire().await.expect("acquire after dead idle");
    assert!(replacement.ping().await);
    pool.release(replacement, true).await;
}

#[tokio::test]
async fn reinitialize_zeroes_active_and_serves_again() {
    let pool = ConnectionPool::new(FakeStore::new(), fast_pool_settings(2, 5)).await;

    let held = pool.acquire().await.expect("acquire");
    assert_eq!(pool.status().await.active, 1);

    pool.reinitialize().await;

    let status = pool.status().await;
    assert_eq!(status.active, 0);
    assert_eq!(status.state, PoolState::Ready);

    // The pool serves fresh connections immediately after the rebuild
    let fresh = pool.acquire().await.expect("acquire after reinitialize");
    pool.release(fresh, true).await;

    // The connection orphaned by the rebuild never rejoins the idle set
    let available_before = pool.status().await.available;
    pool.release(held, true).await;
    assert_eq!(pool.status().await.available, available_before);
}

#[tokio::test]
async fn unreachable_store_surfaces_exhausted_after_retry_budget() {
    let store = FakeStore::new();
    store.unreachable.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new(store, fast_pool_settings(0, 2)).await;

    let err = pool.acquire().await.expect_err("store is unreachable");
    assert!(matches!(err, PoolError::Exhausted { attempts: 3 }));
}

#[tokio::test]
async fn acquire_blocks_at_capacity_until_release() {
    let pool = ConnectionPool::new(FakeStore::new(), fast_pool_settings(0, 1)).await;

    let held = pool.acquire().await.expect("first acquire");

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let conn = pool.acquire().await.expect("acquire after release");
            pool.release(conn, true).await;
        })
    };

    // The waiter must be parked, not failed
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    pool.release(held, true).await;
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter unblocked by release")
        .unwrap();
}

#[tokio::test]
async fn unhealthy_release_closes_instead_of_pooling() {
    let store = FakeStore::new();
    let closed = Arc::clone(&store.closed);
    let pool = ConnectionPool::new(store, fast_pool_settings(0, 2)).await;

    let conn = pool.acquire().await.expect("acquire");
    pool.release(conn, false).await;

    let status = pool.status().await;
    assert_eq!(status.active, 0);
    assert_eq!(status.available, 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
