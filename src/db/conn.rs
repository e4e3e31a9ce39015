//! The connection handle.
//!
//! A [`DbConn`] owns a fixed, ordered set of connections to one database and
//! at most one open transaction shared by all of them. Operations pick a
//! connection by slot number; while a transaction is open they always run on
//! the transaction's connection instead.
//!
//! Every operation returns a [`DbResult`]. The `must_*` variants hand errors
//! to the handle's [`FatalHandler`] for callers that cannot continue.

use crate::db::driver::{Driver, DriverConnection};
use crate::error::{DbError, DbResult};
use crate::fatal::{ExitOnFatal, FatalHandler};
use crate::models::{ConnectionInfo, ExecResult, FromRow, Row, TransactionInfo};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Statement run at the start of every transaction unless overridden.
pub const DEFAULT_BEGIN_STATEMENT: &str = "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE";

/// The open transaction, bound to one pool slot.
#[derive(Debug)]
struct Transaction {
    id: Uuid,
    slot: usize,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Transaction {
    fn new(slot: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub struct DbConn<D: Driver> {
    driver: D,
    info: ConnectionInfo,
    conns: Vec<D::Connection>,
    tx: Option<Transaction>,
    begin_statement: Option<String>,
    fatal: Arc<dyn FatalHandler>,
}

impl<D: Driver> std::fmt::Debug for DbConn<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConn")
            .field("info", &self.info)
            .field("num_conns", &self.conns.len())
            .field("tx", &self.tx)
            .field("begin_statement", &self.begin_statement)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> DbConn<D> {
    /// Create an unconnected handle. Fails if no database name is given.
    pub fn new(driver: D, info: ConnectionInfo) -> DbResult<Self> {
        if info.dbname.is_empty() {
            return Err(DbError::NoDatabase);
        }
        Ok(Self {
            driver,
            info,
            conns: Vec::new(),
            tx: None,
            begin_statement: Some(DEFAULT_BEGIN_STATEMENT.to_string()),
            fatal: Arc::new(ExitOnFatal::default()),
        })
    }

    /// Like [`new`](Self::new), reporting failure through `fatal`.
    pub fn must_new(driver: D, info: ConnectionInfo, fatal: Arc<dyn FatalHandler>) -> Self {
        match Self::new(driver, info) {
            Ok(conn) => conn.with_fatal_handler(fatal),
            Err(e) => fatal.fatal(&e),
        }
    }

    pub fn with_fatal_handler(mut self, fatal: Arc<dyn FatalHandler>) -> Self {
        self.fatal = fatal;
        self
    }

    /// Statement run inside every new transaction; `None` runs nothing.
    pub fn with_begin_statement(mut self, statement: Option<String>) -> Self {
        self.begin_statement = statement;
        self
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn db_name(&self) -> &str {
        &self.info.dbname
    }

    pub fn user(&self) -> &str {
        &self.info.user
    }

    pub fn num_conns(&self) -> usize {
        self.conns.len()
    }

    pub fn is_connected(&self) -> bool {
        !self.conns.is_empty()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn transaction(&self) -> Option<TransactionInfo> {
        self.tx.as_ref().map(|tx| TransactionInfo {
            id: tx.id.to_string(),
            slot: tx.slot,
            started_at: tx.started_at,
        })
    }

    fn or_fatal<T>(&self, result: DbResult<T>) -> T {
        match result {
            Ok(v) => v,
            Err(e) => self.fatal.fatal(&e),
        }
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Open `num_conns` connections, one after another.
    ///
    /// Either all of them open or none stay open. A handle that is already
    /// connected is closed first.
    pub async fn connect(&mut self, num_conns: i64) -> DbResult<()> {
        if num_conns < 1 {
            return Err(DbError::InvalidPoolSize {
                requested: num_conns,
            });
        }
        if self.is_connected() {
            warn!(
                database = %self.info.dbname,
                num_conns = self.conns.len(),
                "Already connected, closing existing connections"
            );
            self.close().await;
        }

        info!(
            url = %self.info.connection_url(),
            num_conns = num_conns,
            "Connecting to database"
        );

        let mut conns = Vec::new();
        for slot in 0..num_conns {
            match self.driver.connect(&self.info).await {
                Ok(conn) => {
                    debug!(slot = slot, "Connection opened");
                    conns.push(conn);
                }
                Err(e) => {
                    close_all(conns).await;
                    return Err(e.classify_connect(&self.info));
                }
            }
        }

        let user = match conns[0].current_user().await {
            Ok(user) => user,
            Err(e) => {
                close_all(conns).await;
                return Err(e);
            }
        };

        self.info.user = user;
        self.conns = conns;

        info!(
            database = %self.info.dbname,
            user = %self.info.user,
            num_conns = self.conns.len(),
            "Connected successfully"
        );
        Ok(())
    }

    pub async fn must_connect(&mut self, num_conns: i64) {
        let result = self.connect(num_conns).await;
        self.or_fatal(result)
    }

    /// Close every connection. Does nothing if none are open.
    ///
    /// An open transaction is abandoned; the server rolls it back when its
    /// connection goes away.
    pub async fn close(&mut self) {
        if self.conns.is_empty() {
            return;
        }
        if let Some(tx) = self.tx.take() {
            warn!(
                transaction_id = %tx.id,
                "Closing connections with a transaction in progress"
            );
        }
        let count = self.conns.len();
        close_all(std::mem::take(&mut self.conns)).await;
        info!(database = %self.info.dbname, num_conns = count, "All connections closed");
    }

    // =========================================================================
    // Slot Selection
    // =========================================================================

    /// Validate an optional connection number, defaulting to slot 0.
    pub fn validate_conn_num(&self, which: &[i64]) -> DbResult<usize> {
        match which {
            [] => Ok(0),
            [n] => {
                if *n < 0 || *n as usize >= self.conns.len() {
                    Err(DbError::InvalidConnNum(*n))
                } else {
                    Ok(*n as usize)
                }
            }
            _ => Err(DbError::TooManyConnNums { given: which.len() }),
        }
    }

    /// Connection an operation should run on: the transaction's while one is
    /// open, otherwise the validated slot.
    fn target(&mut self, which: Option<i64>) -> DbResult<&mut D::Connection> {
        let slot = match &self.tx {
            Some(tx) => tx.slot,
            None => self.validate_conn_num(which.as_slice())?,
        };
        let database = &self.info.dbname;
        self.conns
            .get_mut(slot)
            .ok_or_else(|| DbError::not_connected(database.as_str()))
    }

    // =========================================================================
    // Statements and Queries
    // =========================================================================

    /// Run a statement that returns no rows.
    pub async fn exec(&mut self, query: &str, which: Option<i64>) -> DbResult<ExecResult> {
        debug!(
            sql = %query,
            which = ?which,
            in_transaction = self.tx.is_some(),
            "Executing statement"
        );
        self.target(which)?.execute(query).await
    }

    pub async fn must_exec(&mut self, query: &str, which: Option<i64>) -> ExecResult {
        let result = self.exec(query, which).await;
        self.or_fatal(result)
    }

    /// Run a query and return the decoded rows as they are.
    pub async fn query(&mut self, query: &str, which: Option<i64>) -> DbResult<Vec<Row>> {
        debug!(
            sql = %query,
            which = ?which,
            in_transaction = self.tx.is_some(),
            "Executing query"
        );
        self.target(which)?.fetch_all(query).await
    }

    /// Decode the first row of the result into `T`.
    pub async fn get<T: FromRow>(&mut self, query: &str, which: Option<i64>) -> DbResult<T> {
        let rows = self.query(query, which).await?;
        let row = rows.first().ok_or(DbError::RowNotFound)?;
        T::from_row(row)
    }

    /// Decode every row of the result into `T`, keeping their order.
    pub async fn select<T: FromRow>(
        &mut self,
        query: &str,
        which: Option<i64>,
    ) -> DbResult<Vec<T>> {
        let rows = self.query(query, which).await?;
        rows.iter().map(T::from_row).collect()
    }

    /// Value of a single-column query expected to return at most one row.
    /// No rows yield an empty string.
    pub async fn select_string(&mut self, query: &str, which: Option<i64>) -> DbResult<String> {
        let mut values = self.select_string_slice(query, which).await?;
        match values.len() {
            0 => Ok(String::new()),
            1 => Ok(values.swap_remove(0)),
            got => Err(DbError::TooManyRows { got }),
        }
    }

    pub async fn must_select_string(&mut self, query: &str, which: Option<i64>) -> String {
        let result = self.select_string(query, which).await;
        self.or_fatal(result)
    }

    /// Every value of a single-column query, in result order.
    pub async fn select_string_slice(
        &mut self,
        query: &str,
        which: Option<i64>,
    ) -> DbResult<Vec<String>> {
        let rows = self.query(query, which).await?;
        rows.iter().map(Row::single::<String>).collect()
    }

    pub async fn must_select_string_slice(
        &mut self,
        query: &str,
        which: Option<i64>,
    ) -> Vec<String> {
        let result = self.select_string_slice(query, which).await;
        self.or_fatal(result)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a transaction on the chosen slot and run the begin statement in it.
    pub async fn begin(&mut self, which: Option<i64>) -> DbResult<()> {
        if self.tx.is_some() {
            return Err(DbError::TransactionInProgress);
        }
        let slot = self.validate_conn_num(which.as_slice())?;
        let begin_statement = self.begin_statement.clone();
        let conn = self.target(Some(slot as i64))?;

        conn.begin().await?;
        if let Some(statement) = begin_statement {
            if let Err(e) = conn.execute(&statement).await {
                if let Err(rollback_err) = conn.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed begin statement failed");
                }
                return Err(e);
            }
        }

        let tx = Transaction::new(slot);
        info!(transaction_id = %tx.id, slot = slot, "Transaction started");
        self.tx = Some(tx);
        Ok(())
    }

    pub async fn must_begin(&mut self, which: Option<i64>) {
        let result = self.begin(which).await;
        self.or_fatal(result)
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self, which: Option<i64>) -> DbResult<()> {
        self.finish(which, "commit").await
    }

    pub async fn must_commit(&mut self, which: Option<i64>) {
        let result = self.commit(which).await;
        self.or_fatal(result)
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self, which: Option<i64>) -> DbResult<()> {
        self.finish(which, "rollback").await
    }

    pub async fn must_rollback(&mut self, which: Option<i64>) {
        let result = self.rollback(which).await;
        self.or_fatal(result)
    }

    /// The transaction is gone afterwards even if the server reports an error.
    async fn finish(&mut self, which: Option<i64>, action: &'static str) -> DbResult<()> {
        self.validate_conn_num(which.as_slice())?;
        let tx = self.tx.take().ok_or(DbError::NoTransaction { action })?;
        let database = &self.info.dbname;
        let conn = self
            .conns
            .get_mut(tx.slot)
            .ok_or_else(|| DbError::not_connected(database.as_str()))?;

        let result = if action == "commit" {
            conn.commit().await
        } else {
            conn.rollback().await
        };

        info!(
            transaction_id = %tx.id,
            action = action,
            elapsed_ms = tx.started.elapsed().as_millis() as u64,
            success = result.is_ok(),
            "Transaction finished"
        );
        result
    }
}

async fn close_all<C: DriverConnection>(conns: Vec<C>) {
    for (slot, conn) in conns.into_iter().enumerate() {
        if let Err(e) = conn.close().await {
            warn!(slot = slot, error = %e, "Failed to close connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal::PanicOnFatal;
    use crate::testing::{MockDriver, MockRows};

    fn info() -> ConnectionInfo {
        ConnectionInfo::new("testdb", "testrole", "localhost", 5432)
    }

    async fn connected(n: i64) -> (DbConn<MockDriver>, MockDriver) {
        let driver = MockDriver::new();
        let mut conn = DbConn::new(driver.clone(), info())
            .unwrap()
            .with_fatal_handler(Arc::new(PanicOnFatal));
        conn.connect(n).await.unwrap();
        (conn, driver)
    }

    #[test]
    fn test_new_requires_database() {
        let result = DbConn::new(MockDriver::new(), ConnectionInfo::new("", "u", "h", 1));
        assert!(matches!(result, Err(DbError::NoDatabase)));
    }

    #[tokio::test]
    async fn test_validate_conn_num() {
        let (conn, _) = connected(3).await;
        assert_eq!(conn.validate_conn_num(&[]).unwrap(), 0);
        assert_eq!(conn.validate_conn_num(&[2]).unwrap(), 2);
        assert!(matches!(
            conn.validate_conn_num(&[3]),
            Err(DbError::InvalidConnNum(3))
        ));
        assert!(matches!(
            conn.validate_conn_num(&[0, 1]),
            Err(DbError::TooManyConnNums { given: 2 })
        ));
    }

    #[tokio::test]
    async fn test_operations_on_closed_handle() {
        let mut conn = DbConn::new(MockDriver::new(), info()).unwrap();
        let err = conn.exec("SELECT 1", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Not connected to database \"testdb\"");
    }

    #[tokio::test]
    async fn test_failed_begin_statement_rolls_back() {
        let (mut conn, driver) = connected(1).await;
        driver.expect_begin();
        driver.expect_exec_error("SET TRANSACTION(.*)", "permission denied");
        driver.expect_rollback();

        let err = conn.begin(None).await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        assert!(!conn.in_transaction());
        driver.expectations_met().unwrap();
    }

    #[tokio::test]
    async fn test_connect_closes_existing_pool() {
        let (mut conn, driver) = connected(2).await;
        conn.connect(1).await.unwrap();
        assert_eq!(conn.num_conns(), 1);
        assert_eq!(driver.opened(), 3);
        assert_eq!(driver.closed(), 2);
    }

    #[tokio::test]
    async fn test_transaction_info() {
        let driver = MockDriver::new();
        let mut conn = DbConn::new(driver.clone(), info())
            .unwrap()
            .with_begin_statement(None);
        conn.connect(1).await.unwrap();
        assert!(conn.transaction().is_none());

        driver.expect_begin();
        conn.begin(None).await.unwrap();
        let tx = conn.transaction().unwrap();
        assert_eq!(tx.slot, 0);
        assert!(!tx.id.is_empty());
        driver.expectations_met().unwrap();
    }

    #[tokio::test]
    async fn test_rows_decode_through_from_row() {
        let (mut conn, driver) = connected(1).await;
        driver.expect_query(
            "SELECT (.*)",
            MockRows::new(&["schemaname", "tablename"]).row(["schema1", "table1"]),
        );
        let (schema, table): (String, String) = conn
            .get("SELECT schemaname, tablename FROM two_columns", None)
            .await
            .unwrap();
        assert_eq!(schema, "schema1");
        assert_eq!(table, "table1");
    }
}
