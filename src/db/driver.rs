//! The seam between the connection handle and a database client.
//!
//! A [`Driver`] opens connections; each [`DriverConnection`] executes
//! statements, returns decoded rows and drives transactions on itself. The
//! handle never talks to the network directly.

use crate::error::DbResult;
use crate::models::{ConnectionInfo, ExecResult, Row};
use std::future::Future;

/// Opens low-level connections for a connection handle.
pub trait Driver: Send + Sync {
    type Connection: DriverConnection;

    /// Open one connection. Errors are reported as the client produced them;
    /// the handle classifies them.
    fn connect(
        &self,
        info: &ConnectionInfo,
    ) -> impl Future<Output = DbResult<Self::Connection>> + Send;
}

/// One open connection.
pub trait DriverConnection: Send {
    /// Run a statement that returns no rows.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DbResult<ExecResult>> + Send;

    /// Run a query and decode every row.
    fn fetch_all(&mut self, sql: &str) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Role the server authenticated this connection as.
    fn current_user(&mut self) -> impl Future<Output = DbResult<String>> + Send;

    fn close(self) -> impl Future<Output = DbResult<()>> + Send;
}
