//! Database layer
//!
//! PostgreSQL sessions, destination schema resolution, and the value types
//! records are coerced into at bind time.

pub mod schema;
pub mod session;
pub mod types;

// Re-export main types
pub use schema::{ColumnInfo, Destination};
pub use session::{PgConnector, PgSession};
pub use types::{DataType, FieldValue, Record};
