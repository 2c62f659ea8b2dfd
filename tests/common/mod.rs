//! Common test utilities and helpers
//!
//! Shared infrastructure for integration tests: record builders, a mock
//! store for pool behavior tests, and the environment-gated connection
//! configuration for live-database tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bulkgres::config::{ConnectionConfig, PoolSettings};
use bulkgres::db::{FieldValue, Record};
use bulkgres::error::{PoolError, PoolResult};
use bulkgres::pool::{Connector, ManagedConnection};

/// Build one well-formed record
pub fn product_record(name: &str, price: f64, stock: i64) -> Record {
    let mut record = Record::new();
    record.push("name", FieldValue::Text(name.to_string()));
    record.push("price", FieldValue::Float(price));
    record.push("stock", FieldValue::Integer(stock));
    record
}

/// Build `n` well-formed records
pub fn product_records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| product_record(&format!("item-{}", i), i as f64 * 0.5, i as i64))
        .collect()
}

/// A record whose `name` field carries an unambiguous injection pattern
pub fn injection_record() -> Record {
    let mut record = Record::new();
    record.push(
        "name",
        FieldValue::Text("x'; DROP TABLE products".to_string()),
    );
    record.push("price", FieldValue::Float(1.0));
    record
}

/// Connection config for live tests, from TEST_DATABASE_URL
pub fn live_config() -> Option<ConnectionConfig> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    ConnectionConfig::from_url(&url).ok()
}

/// Small pool with short timeouts so failure tests stay fast
pub fn fast_pool_settings(min: usize, max: usize) -> PoolSettings {
    PoolSettings {
        min_connections: min,
        max_connections: max,
        acquire_timeout_secs: 1,
        acquire_attempts: 3,
        retry_backoff_ms: 1,
    }
}

/// A fake store connection for pool tests
pub struct FakeConn {
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicU32>,
}

impl FakeConn {
    /// Flip this connection dead so the next probe discards it
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManagedConnection for FakeConn {
    async fn ping(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A fake store the pool can be run against without a database
pub struct FakeStore {
    /// When set, new connections fail to open
    pub unreachable: AtomicBool,
    /// Connections opened so far
    pub opened: AtomicU32,
    /// Connections closed so far
    pub closed: Arc<AtomicU32>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            unreachable: AtomicBool::new(false),
            opened: AtomicU32::new(0),
            closed: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Connector for FakeStore {
    type Conn = FakeConn;

    async fn connect(&self) -> PoolResult<FakeConn> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionFailed("fake store unreachable".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConn {
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::clone(&self.closed),
        })
    }
}
