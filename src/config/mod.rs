//! Configuration management
//!
//! Connection parameters and application settings.

pub mod connections;
pub mod settings;

pub use connections::{ConnectionConfig, SslMode};
pub use settings::{ImportSettings, PoolSettings, SecuritySettings, Settings, load_settings};
