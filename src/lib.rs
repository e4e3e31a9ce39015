//! pg-dbconn Library
//!
//! A connection handle for PostgreSQL and Greenplum that keeps a fixed pool
//! of numbered connections and at most one open transaction.

pub mod config;
pub mod db;
pub mod error;
pub mod fatal;
pub mod models;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use db::{DbConn, PgDriver};
pub use error::{DbError, DbResult};
pub use fatal::{ExitOnFatal, FatalHandler, PanicOnFatal};
