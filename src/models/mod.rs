//! Data models shared by the connection handle and its drivers.

pub mod connection;
pub mod row;

// Re-export commonly used types
pub use connection::{ConnectionInfo, ExecResult, TransactionInfo};
pub use row::{FromRow, FromValue, Row, Value};
