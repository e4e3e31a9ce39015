//! Database access layer.
//!
//! This module provides:
//! - The connection handle with its slot and transaction bookkeeping
//! - The driver seam the handle is written against
//! - A PostgreSQL/Greenplum driver built on `sqlx`
//! - Column type classification used when decoding rows

pub mod conn;
pub mod driver;
pub mod postgres;
pub mod types;

pub use conn::{DEFAULT_BEGIN_STATEMENT, DbConn};
pub use driver::{Driver, DriverConnection};
pub use postgres::{PgDriver, PgDriverConnection};
pub use types::{TypeCategory, categorize_type};
