//! Resilient connection pool
//!
//! A bounded pool that probes connections before handing them out, retries
//! acquisition with linear backoff, and recovers from structural failures
//! (endpoint moved, network path down) by tearing the whole pool down and
//! rebuilding it, rather than patching connections one by one.
//!
//! The pool is generic over a [`Connector`] so tests can run it against a
//! fake store; production code plugs in the PostgreSQL connector from
//! [`crate::db::session`].

pub mod retry;

use async_trait::async_trait;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::PoolSettings;
use crate::error::{PoolError, PoolResult};
use retry::{LinearBackoff, with_retries};

/// A live store session the pool can manage
#[async_trait]
pub trait ManagedConnection: Send + 'static {
    /// Cheap liveness probe (a trivial round-trip query)
    async fn ping(&self) -> bool;

    /// Close the underlying session
    async fn close(&mut self);
}

/// Factory that opens new connections for the pool
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type this factory produces
    type Conn: ManagedConnection;

    /// Open a fresh connection
    async fn connect(&self) -> PoolResult<Self::Conn>;
}

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Ready,
    Reinitializing,
    Closed,
}

/// Diagnostic snapshot for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// Connections currently checked out
    pub active: usize,
    /// Idle connections ready to hand out
    pub available: usize,
    /// Pool lifecycle state
    pub state: PoolState,
}

struct PoolInner<C> {
    idle: Vec<C>,
    active: usize,
    generation: u64,
    state: PoolState,
}

/// Bounded, self-healing connection pool.
///
/// Invariant: checked-out + idle connections never exceed `max_connections`;
/// `min_connections` are kept warm. A reinitialization bumps the generation
/// counter, so connections handed out before it are discarded on release
/// instead of rejoining the pool.
pub struct ConnectionPool<F: Connector> {
    connector: F,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    inner: Mutex<PoolInner<F::Conn>>,
}

/// A connection checked out of the pool.
///
/// Release it with [`ConnectionPool::release`]; a guard dropped without an
/// explicit release is treated as unhealthy and discarded.
pub struct PooledConnection<F: Connector> {
    conn: Option<F::Conn>,
    generation: u64,
    permit: Option<OwnedSemaphorePermit>,
    pool: Weak<ConnectionPool<F>>,
}

impl<F: Connector> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("generation", &self.generation)
            .field("released", &self.conn.is_none())
            .finish()
    }
}

impl<F: Connector> Deref for PooledConnection<F> {
    type Target = F::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already released")
    }
}

impl<F: Connector> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already released")
    }
}

impl<F: Connector> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let permit = self.permit.take();
            let generation = self.generation;
            if let Some(pool) = self.pool.upgrade() {
                tokio::spawn(async move {
                    pool.discard(conn, generation).await;
                    drop(permit);
                });
            }
        }
    }
}

impl<F: Connector> ConnectionPool<F> {
    /// Create a pool and eagerly warm `min_connections` connections.
    ///
    /// Warm-up failures are logged, not fatal: the pool opens lazily on
    /// demand if the store is temporarily unreachable at startup.
    pub async fn new(connector: F, settings: PoolSettings) -> Arc<Self> {
        let max = settings.max_connections.max(1);
        let min = settings.min_connections.min(max);

        let pool = Arc::new(Self {
            connector,
            settings,
            semaphore: Arc::new(Semaphore::new(max)),
            inner: Mutex::new(PoolInner {
                idle: Vec::with_capacity(max),
                active: 0,
                generation: 0,
                state: PoolState::Ready,
            }),
        });

        let mut inner = pool.inner.lock().await;
        for _ in 0..min {
            match pool.connector.connect().await {
                Ok(conn) => inner.idle.push(conn),
                Err(e) => {
                    warn!("pool warm-up connection failed: {}", e);
                    break;
                }
            }
        }
        info!(
            warm = inner.idle.len(),
            max, "connection pool initialized"
        );
        drop(inner);

        pool
    }

    /// Borrow a validated connection.
    ///
    /// Blocks up to the configured acquire timeout for a free slot, probes
    /// idle connections before handing them out, and retries the whole
    /// open-or-reuse sequence with linear backoff. When the full retry
    /// budget fails the pool reinitializes itself and the call returns
    /// [`PoolError::Exhausted`].
    pub async fn acquire(self: &Arc<Self>) -> PoolResult<PooledConnection<F>> {
        let permit = tokio::time::timeout(
            self.settings.acquire_timeout(),
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            warn!(
                timeout_secs = self.settings.acquire_timeout_secs,
                "pool at capacity, acquire timed out"
            );
            PoolError::Exhausted {
                attempts: self.settings.acquire_attempts,
            }
        })?
        .map_err(|_| PoolError::Closed)?;

        let policy = LinearBackoff::new(
            self.settings.retry_backoff(),
            self.settings.acquire_attempts,
        );

        let attempt_result = with_retries(policy, |attempt| {
            let pool = Arc::clone(self);
            async move { pool.try_obtain(attempt).await }
        })
        .await;

        match attempt_result {
            Ok((conn, generation)) => Ok(PooledConnection {
                conn: Some(conn),
                generation,
                permit: Some(permit),
                pool: Arc::downgrade(self),
            }),
            Err(e) => {
                // Every attempt failed: that is a structural problem, not a
                // single bad connection. Rebuild the pool so later callers
                // get a fresh start.
                error!(
                    attempts = self.settings.acquire_attempts,
                    "acquire retry budget exhausted ({}), reinitializing pool", e
                );
                self.reinitialize().await;
                Err(PoolError::Exhausted {
                    attempts: self.settings.acquire_attempts,
                })
            }
        }
    }

    /// One acquire attempt: reuse a probed idle connection or open fresh
    async fn try_obtain(&self, attempt: u32) -> PoolResult<(F::Conn, u64)> {
        // Probe idle connections first, discarding the dead
        loop {
            let candidate = {
                let mut inner = self.inner.lock().await;
                if inner.state == PoolState::Closed {
                    return Err(PoolError::Closed);
                }
                inner.idle.pop()
            };
            let Some(mut conn) = candidate else { break };

            if conn.ping().await {
                let mut inner = self.inner.lock().await;
                inner.active += 1;
                return Ok((conn, inner.generation));
            }
            debug!(attempt, "idle connection failed liveness probe, discarding");
            conn.close().await;
        }

        // No idle connection survived; open a new one
        let conn = self.connector.connect().await?;
        let mut inner = self.inner.lock().await;
        inner.active += 1;
        Ok((conn, inner.generation))
    }

    /// Return a connection to the pool.
    ///
    /// Healthy connections from the current generation rejoin the idle set;
    /// anything else (unhealthy, or orphaned by a reinitialization) is
    /// closed and never handed out again.
    pub async fn release(&self, mut pooled: PooledConnection<F>, healthy: bool) {
        let Some(mut conn) = pooled.conn.take() else {
            return;
        };
        let permit = pooled.permit.take();

        let mut inner = self.inner.lock().await;
        let current = inner.generation == pooled.generation && inner.state == PoolState::Ready;
        if current {
            inner.active = inner.active.saturating_sub(1);
        }

        if healthy && current {
            inner.idle.push(conn);
        } else {
            drop(inner);
            debug!(healthy, current, "discarding connection on release");
            conn.close().await;
        }

        drop(permit);
    }

    /// Discard a connection that was dropped without an explicit release
    async fn discard(&self, mut conn: F::Conn, generation: u64) {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation && inner.state == PoolState::Ready {
                inner.active = inner.active.saturating_sub(1);
            }
        }
        conn.close().await;
    }

    /// Tear down and rebuild the whole pool.
    ///
    /// Stop-the-world under the pool lock: concurrent acquires wait until
    /// the new pool is warm. Idle connections are closed immediately;
    /// in-flight connections belong to the old generation and are discarded
    /// when their holders release them.
    pub async fn reinitialize(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == PoolState::Closed {
            return;
        }
        inner.state = PoolState::Reinitializing;
        info!(
            dropped_idle = inner.idle.len(),
            orphaned_active = inner.active,
            "reinitializing connection pool"
        );

        let old: Vec<F::Conn> = inner.idle.drain(..).collect();
        for mut conn in old {
            conn.close().await;
        }
        inner.generation += 1;
        inner.active = 0;

        let min = self
            .settings
            .min_connections
            .min(self.settings.max_connections.max(1));
        for _ in 0..min {
            match self.connector.connect().await {
                Ok(conn) => inner.idle.push(conn),
                Err(e) => {
                    warn!("pool rebuild connection failed: {}", e);
                    break;
                }
            }
        }
        inner.state = PoolState::Ready;
        info!(warm = inner.idle.len(), "connection pool rebuilt");
    }

    /// Close the pool; all idle connections are shut down and subsequent
    /// acquires fail with [`PoolError::Closed`].
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = PoolState::Closed;
        let old: Vec<F::Conn> = inner.idle.drain(..).collect();
        for mut conn in old {
            conn.close().await;
        }
        self.semaphore.close();
    }

    /// Diagnostic snapshot for health endpoints
    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        PoolStatus {
            active: inner.active,
            available: inner.idle.len(),
            state: inner.state,
        }
    }

    /// Liveness probe: can a validated connection be obtained right now?
    pub async fn test_connection(self: &Arc<Self>) -> bool {
        match self.acquire().await {
            Ok(conn) => {
                self.release(conn, true).await;
                true
            }
            Err(e) => {
                warn!("connection test failed: {}", e);
                false
            }
        }
    }
}
