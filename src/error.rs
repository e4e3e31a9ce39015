//! Error types for the connection handle.
//!
//! Every operation returns a [`DbResult`]. The message of each variant is what
//! ends up in the log when the error is handed to a
//! [`FatalHandler`](crate::fatal::FatalHandler), so the wording is kept stable.

use crate::models::ConnectionInfo;
use thiserror::Error;

/// SQLSTATE raised when the target database does not exist.
const SQLSTATE_INVALID_CATALOG_NAME: &str = "3D000";

/// SQLSTATE raised when the authenticating role does not exist.
const SQLSTATE_INVALID_AUTHORIZATION: &str = "28000";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("No database provided")]
    NoDatabase,

    #[error("Must specify a connection pool size that is a positive integer")]
    InvalidPoolSize { requested: i64 },

    #[error("At most one connection number may be specified for a given connection")]
    TooManyConnNums { given: usize },

    #[error("Invalid connection number: {0}")]
    InvalidConnNum(i64),

    #[error("Not connected to database \"{database}\"")]
    NotConnected { database: String },

    #[error("could not connect to server: Connection refused")]
    ConnectionRefused,

    #[error("Database \"{database}\" does not exist, exiting")]
    DatabaseMissing { database: String },

    #[error("Role \"{user}\" does not exist, exiting")]
    RoleMissing { user: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Cannot begin transaction; there is already a transaction in progress")]
    TransactionInProgress,

    #[error("Cannot {action} transaction; there is no transaction in progress")]
    NoTransaction { action: &'static str },

    #[error("Too many rows returned from query: got {got} rows, expected 1 row")]
    TooManyRows { got: usize },

    #[error("No rows returned from query")]
    RowNotFound,

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Failed to decode column {column}: {message}")]
    Decode { column: String, message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },
}

impl DbError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a decode error for the named column.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn not_connected(database: impl Into<String>) -> Self {
        Self::NotConnected {
            database: database.into(),
        }
    }

    /// SQLSTATE code reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// True for errors detected from local configuration before any I/O.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::NoDatabase
                | Self::InvalidPoolSize { .. }
                | Self::TooManyConnNums { .. }
                | Self::InvalidConnNum(_)
        )
    }

    /// Map a failure to open a connection onto one of the well-known causes.
    ///
    /// The server's SQLSTATE is checked first; drivers that only surface text
    /// are matched on the message. Anything unrecognised is returned unchanged.
    pub fn classify_connect(self, info: &ConnectionInfo) -> Self {
        match self.sql_state() {
            Some(SQLSTATE_INVALID_CATALOG_NAME) => {
                return Self::DatabaseMissing {
                    database: info.dbname.clone(),
                };
            }
            Some(SQLSTATE_INVALID_AUTHORIZATION) if mentions_missing(&self, "role") => {
                return Self::RoleMissing {
                    user: info.user.clone(),
                };
            }
            _ => {}
        }

        let message = self.to_string().to_lowercase();
        if message.contains("connection refused") {
            Self::ConnectionRefused
        } else if mentions_missing(&self, "database") {
            Self::DatabaseMissing {
                database: info.dbname.clone(),
            }
        } else if mentions_missing(&self, "role") {
            Self::RoleMissing {
                user: info.user.clone(),
            }
        } else {
            self
        }
    }
}

fn mentions_missing(err: &DbError, object: &str) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains(object) && message.contains("does not exist")
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::RowNotFound,
            sqlx::Error::Io(io_err) => DbError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DbError::connection(format!("Protocol error: {}", msg)),
            sqlx::Error::ColumnNotFound(col) => DbError::ColumnNotFound(col),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::ColumnNotFound(
                format!("index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(index.to_string(), source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::decode("?", source.to_string()),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::decode("?", format!("type not found: {}", type_name))
            }
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 0),
            sqlx::Error::WorkerCrashed => DbError::connection("Database worker crashed"),
            _ => DbError::database(format!("Unknown database error: {}", err), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
