//! PostgreSQL session handling
//!
//! A [`PgSession`] owns a tokio-postgres client plus the background task
//! that drives its socket. [`PgConnector`] is the factory the connection
//! pool uses to open sessions.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::Client;
use tracing::debug;

use crate::config::{ConnectionConfig, SslMode};
use crate::error::{DbError, DbResult, PoolError, PoolResult};
use crate::pool::{Connector, ManagedConnection};

/// A live PostgreSQL session
pub struct PgSession {
    /// The tokio-postgres client
    client: Client,
    /// Background task driving the socket
    driver: JoinHandle<()>,
}

impl PgSession {
    /// Connect to PostgreSQL with the configured TLS mode and keepalives.
    pub async fn connect(config: &ConnectionConfig) -> DbResult<Self> {
        let pg_config = config.pg_config();

        let (client, driver) = match config.ssl_mode {
            SslMode::Disable => {
                let (client, connection) = pg_config
                    .connect(tokio_postgres::NoTls)
                    .await
                    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("postgres connection terminated: {}", e);
                    }
                });
                (client, driver)
            }
            SslMode::Prefer | SslMode::Require => {
                let tls_config = make_tls_config();
                let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
                let (client, connection) = pg_config
                    .connect(tls)
                    .await
                    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("postgres connection terminated: {}", e);
                    }
                });
                (client, driver)
            }
        };

        Ok(Self { client, driver })
    }

    /// The underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Mutable client access (required for transactions)
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

#[async_trait]
impl ManagedConnection for PgSession {
    async fn ping(&self) -> bool {
        if self.client.is_closed() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&mut self) {
        // Tearing down the driver closes the socket; the client becomes
        // unusable and is dropped with the session.
        self.driver.abort();
    }
}

/// Factory opening [`PgSession`]s for the pool
pub struct PgConnector {
    config: ConnectionConfig,
}

impl PgConnector {
    /// Create a connector for the given target
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// The connection configuration this factory uses
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgSession;

    async fn connect(&self) -> PoolResult<PgSession> {
        PgSession::connect(&self.config)
            .await
            .map_err(|e| PoolError::ConnectionFailed(e.to_string()))
    }
}

/// Build a rustls ClientConfig that trusts OS certificates (with Mozilla roots as fallback)
fn make_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    let mut loaded = 0;
    for cert in native_certs.certs {
        if root_store.add(cert).is_ok() {
            loaded += 1;
        }
    }
    if loaded == 0 {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
