//! Connection-related data models.
//!
//! This module defines the connection target and the state snapshots handed
//! out by the connection handle.

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";

/// Where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub dbname: String,
    /// Replaced by the role the server reports once connected.
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl ConnectionInfo {
    pub fn new(
        dbname: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            dbname: dbname.into(),
            user: user.into(),
            host: host.into(),
            port,
        }
    }

    /// Build connection info from the standard libpq environment.
    ///
    /// `PGUSER` falls back to `USER` and then `postgres`, `PGHOST` to
    /// `localhost` and `PGPORT` to 5432.
    pub fn from_env(dbname: impl Into<String>) -> Self {
        Self::from_lookup(dbname, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup<F>(dbname: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let user = non_empty("PGUSER")
            .or_else(|| non_empty("USER"))
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let host = non_empty("PGHOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = non_empty("PGPORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            dbname: dbname.into(),
            user,
            host,
            port,
        }
    }

    /// Connection URL without credentials, safe to log.
    pub fn connection_url(&self) -> String {
        let base = format!("postgres://{}:{}", self.host, self.port);
        match Url::parse(&base) {
            Ok(mut url) => {
                // set_username only fails for cannot-be-a-base URLs
                let _ = url.set_username(&self.user);
                url.set_path(&self.dbname);
                url.to_string()
            }
            Err(_) => format!("{}/{}", base, self.dbname),
        }
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}

/// Snapshot of the transaction currently open on a connection handle.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub id: String,
    /// Pool slot the transaction is bound to.
    pub slot: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
