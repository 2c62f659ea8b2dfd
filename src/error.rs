//! Error types for bulkgres
//!
//! This module defines the error hierarchy used throughout the application.
//! We use `thiserror` for library-style errors with clear error chains.

use std::io;

/// Main error type for the bulkgres application
#[derive(Debug, thiserror::Error)]
pub enum BulkgresError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Connection pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Import pipeline errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Failed to establish connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Schema introspection failed
    #[error("Schema loading failed: {0}")]
    SchemaLoadFailed(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

/// Connection pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No healthy connection could be obtained within the retry budget.
    /// The pool has already reinitialized itself; the call is retryable.
    #[error("Connection pool exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// Opening a fresh connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The pool has been shut down
    #[error("Pool is closed")]
    Closed,
}

/// Import pipeline errors
///
/// Per-record validation failures are *not* errors: they are absorbed into
/// the import report counters. Only call-level failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The destination table or its columns could not be resolved.
    /// Fatal for the call; retrying without fixing the destination is futile.
    #[error("Destination error: {0}")]
    Destination(String),

    /// The connection died mid-call. The transaction was rolled back and
    /// nothing was committed, so an idempotent retry is safe.
    #[error("Transient connection failure: {0}")]
    TransientConnection(String),

    /// No connection could be acquired (propagated from the pool; retry
    /// policy lives there, not here)
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A non-connection database failure (bad statement, constraint, ...)
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Configuration loading/parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Config file not found
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Specialized Result type for bulkgres operations
pub type Result<T> = std::result::Result<T, BulkgresError>;

/// Specialized Result type for database operations
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Specialized Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Specialized Result type for import operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Specialized Result type for config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
