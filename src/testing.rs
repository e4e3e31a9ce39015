//! Scripted driver for exercising a connection handle without a server.
//!
//! [`MockDriver`] keeps an ordered queue of expected calls shared by every
//! connection it opens. Each call pops the next expectation and must match its
//! kind and, for statements, its regular expression; anything else fails with
//! a database error naming the call.
//!
//! ```ignore
//! let driver = MockDriver::new().with_user("testrole");
//! driver.expect_begin();
//! driver.expect_exec("SET TRANSACTION(.*)", 0);
//! driver.expect_query("SELECT (.*)", MockRows::new(&["string"]).row(["one"]));
//! driver.expect_commit();
//! ```

use crate::db::driver::{Driver, DriverConnection};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, ExecResult, Row, Value};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Result rows handed out by a query expectation.
#[derive(Debug, Clone)]
pub struct MockRows {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl MockRows {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; it must have one value per column.
    pub fn row<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        assert_eq!(
            values.len(),
            self.columns.len(),
            "mock row width does not match columns"
        );
        self.rows.push(values);
        self
    }

    fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect()
    }
}

#[derive(Debug)]
enum Expectation {
    Exec {
        pattern: String,
        result: Result<u64, String>,
    },
    Query {
        pattern: String,
        result: Result<MockRows, String>,
    },
    Begin,
    Commit,
    Rollback,
}

impl Expectation {
    fn describe(&self) -> String {
        match self {
            Self::Exec { pattern, .. } => format!("exec matching '{}'", pattern),
            Self::Query { pattern, .. } => format!("query matching '{}'", pattern),
            Self::Begin => "begin".to_string(),
            Self::Commit => "commit".to_string(),
            Self::Rollback => "rollback".to_string(),
        }
    }
}

/// A call observed by the mock, tagged with the connection that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub conn_id: usize,
    pub call: String,
}

#[derive(Debug)]
struct MockState {
    user: String,
    connect_error: Option<String>,
    expectations: VecDeque<Expectation>,
    calls: Vec<MockCall>,
    opened: usize,
    closed: usize,
}

/// Driver whose connections replay scripted expectations.
#[derive(Debug, Clone)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                user: "testrole".to_string(),
                connect_error: None,
                expectations: VecDeque::new(),
                calls: Vec::new(),
                opened: 0,
                closed: 0,
            })),
        }
    }

    /// Role reported by `current_user`.
    pub fn with_user(self, user: impl Into<String>) -> Self {
        self.state.lock().user = user.into();
        self
    }

    /// Make every connection attempt fail with `message`.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.state.lock().connect_error = Some(message.into());
        self
    }

    pub fn expect_exec(&self, pattern: &str, rows_affected: u64) {
        self.push(Expectation::Exec {
            pattern: pattern.to_string(),
            result: Ok(rows_affected),
        });
    }

    pub fn expect_exec_error(&self, pattern: &str, message: &str) {
        self.push(Expectation::Exec {
            pattern: pattern.to_string(),
            result: Err(message.to_string()),
        });
    }

    pub fn expect_query(&self, pattern: &str, rows: MockRows) {
        self.push(Expectation::Query {
            pattern: pattern.to_string(),
            result: Ok(rows),
        });
    }

    pub fn expect_query_error(&self, pattern: &str, message: &str) {
        self.push(Expectation::Query {
            pattern: pattern.to_string(),
            result: Err(message.to_string()),
        });
    }

    pub fn expect_begin(&self) {
        self.push(Expectation::Begin);
    }

    pub fn expect_commit(&self) {
        self.push(Expectation::Commit);
    }

    pub fn expect_rollback(&self) {
        self.push(Expectation::Rollback);
    }

    /// Connections opened so far.
    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Connections closed so far.
    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Fails with the first unconsumed expectation, if any.
    pub fn expectations_met(&self) -> Result<(), String> {
        match self.state.lock().expectations.front() {
            Some(next) => Err(format!("unmet expectation: {}", next.describe())),
            None => Ok(()),
        }
    }

    fn push(&self, expectation: Expectation) {
        self.state.lock().expectations.push_back(expectation);
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self, _info: &ConnectionInfo) -> DbResult<MockConnection> {
        let mut state = self.state.lock();
        if let Some(message) = &state.connect_error {
            return Err(DbError::connection(message.clone()));
        }
        let id = state.opened;
        state.opened += 1;
        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
        })
    }
}

/// A connection opened by [`MockDriver`].
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn next(&self, call: String) -> DbResult<Expectation> {
        let mut state = self.state.lock();
        state.calls.push(MockCall {
            conn_id: self.id,
            call: call.clone(),
        });
        state
            .expectations
            .pop_front()
            .ok_or_else(|| DbError::database(format!("unexpected call: {}", call), None))
    }

    fn mismatch(call: &str, expected: &Expectation) -> DbError {
        DbError::database(
            format!("call '{}' does not match {}", call, expected.describe()),
            None,
        )
    }

    fn control(&self, name: &str) -> DbResult<()> {
        let expected = self.next(name.to_string())?;
        match (name, &expected) {
            ("begin", Expectation::Begin)
            | ("commit", Expectation::Commit)
            | ("rollback", Expectation::Rollback) => Ok(()),
            _ => Err(Self::mismatch(name, &expected)),
        }
    }

    fn run_exec(&self, sql: &str) -> DbResult<ExecResult> {
        let expected = self.next(format!("exec {}", sql))?;
        match expected {
            Expectation::Exec { pattern, result } if pattern_matches(&pattern, sql)? => result
                .map(ExecResult::new)
                .map_err(|message| DbError::database(message, None)),
            other => Err(Self::mismatch(sql, &other)),
        }
    }

    fn run_query(&self, sql: &str) -> DbResult<Vec<Row>> {
        let expected = self.next(format!("query {}", sql))?;
        match expected {
            Expectation::Query { pattern, result } if pattern_matches(&pattern, sql)? => result
                .map(MockRows::into_rows)
                .map_err(|message| DbError::database(message, None)),
            other => Err(Self::mismatch(sql, &other)),
        }
    }
}

fn pattern_matches(pattern: &str, sql: &str) -> DbResult<bool> {
    let re = Regex::new(pattern).map_err(|e| {
        DbError::database(format!("invalid expectation pattern '{}': {}", pattern, e), None)
    })?;
    Ok(re.is_match(sql))
}

impl DriverConnection for MockConnection {
    async fn execute(&mut self, sql: &str) -> DbResult<ExecResult> {
        self.run_exec(sql)
    }

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.run_query(sql)
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.control("begin")
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.control("commit")
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.control("rollback")
    }

    async fn current_user(&mut self) -> DbResult<String> {
        Ok(self.state.lock().user.clone())
    }

    async fn close(self) -> DbResult<()> {
        self.state.lock().closed += 1;
        Ok(())
    }
}
