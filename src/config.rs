//! Configuration handling for the command-line tool.
//!
//! Options come from CLI arguments, with environment variables as fallback.
//! Connection details not given either way are resolved from the libpq
//! environment by [`ConnectionInfo::from_env`].

use crate::db::DEFAULT_BEGIN_STATEMENT;
use crate::models::ConnectionInfo;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: i64 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration for the pg-dbconn tool.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pg-dbconn",
    about = "Open a fixed pool of PostgreSQL connections and run queries against it",
    version,
    author
)]
pub struct Config {
    /// Database to connect to
    #[arg(short = 'd', long = "dbname", env = "PGDATABASE")]
    pub dbname: Option<String>,

    /// Database server host
    #[arg(long, env = "PGHOST")]
    pub host: Option<String>,

    /// Database server port
    #[arg(short, long, env = "PGPORT")]
    pub port: Option<u16>,

    /// Role to connect as
    #[arg(short = 'U', long, env = "PGUSER")]
    pub user: Option<String>,

    /// Number of connections to open
    #[arg(
        short = 'n',
        long = "pool-size",
        default_value_t = DEFAULT_POOL_SIZE,
        allow_negative_numbers = true,
        env = "DBCONN_POOL_SIZE"
    )]
    pub pool_size: i64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "DBCONN_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Statement run at the start of every transaction
    #[arg(long, value_name = "SQL", conflicts_with = "no_begin_statement")]
    pub begin_statement: Option<String>,

    /// Do not run any statement when a transaction starts
    #[arg(long)]
    pub no_begin_statement: bool,

    /// Run all queries inside a single transaction
    #[arg(long)]
    pub transaction: bool,

    /// Connection slot to run the queries on
    #[arg(long, allow_negative_numbers = true)]
    pub slot: Option<i64>,

    /// Single-column queries to run; each value is printed on its own line.
    /// Can be specified multiple times.
    #[arg(short = 'q', long = "query", value_name = "SQL")]
    pub queries: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DBCONN_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBCONN_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            dbname: None,
            host: None,
            port: None,
            user: None,
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            begin_statement: None,
            no_begin_statement: false,
            transaction: false,
            slot: None,
            queries: Vec::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }

    /// Resolve the connection target, falling back to the environment.
    pub fn connection_info(&self) -> ConnectionInfo {
        self.connection_info_with(|key| std::env::var(key).ok())
    }

    /// Same as [`connection_info`](Self::connection_info) with a caller-supplied lookup.
    pub fn connection_info_with<F>(&self, lookup: F) -> ConnectionInfo
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut info =
            ConnectionInfo::from_lookup(self.dbname.clone().unwrap_or_default(), lookup);
        if let Some(host) = &self.host {
            info.host = host.clone();
        }
        if let Some(port) = self.port {
            info.port = port;
        }
        if let Some(user) = &self.user {
            info.user = user.clone();
        }
        info
    }

    /// Statement to run when a transaction starts, if any.
    pub fn begin_statement(&self) -> Option<String> {
        if self.no_begin_statement {
            None
        } else {
            Some(
                self.begin_statement
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BEGIN_STATEMENT.to_string()),
            )
        }
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.queries.is_empty());
        assert_eq!(
            config.begin_statement().as_deref(),
            Some(DEFAULT_BEGIN_STATEMENT)
        );
    }

    #[test]
    fn test_parse_args() {
        let config = Config::try_parse_from([
            "pg-dbconn",
            "-d",
            "testdb",
            "--host",
            "mdw",
            "-n",
            "3",
            "-q",
            "SELECT 1",
            "-q",
            "SELECT 2",
        ])
        .unwrap();
        assert_eq!(config.dbname.as_deref(), Some("testdb"));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.queries, vec!["SELECT 1", "SELECT 2"]);

        let info = config.connection_info_with(no_env);
        assert_eq!(info.dbname, "testdb");
        assert_eq!(info.host, "mdw");
    }

    #[test]
    fn test_negative_pool_size_is_accepted_by_parser() {
        let config = Config::try_parse_from(["pg-dbconn", "-d", "testdb", "-n", "-1"]).unwrap();
        assert_eq!(config.pool_size, -1);
    }

    #[test]
    fn test_flags_override_environment() {
        let config = Config {
            user: Some("gpadmin".to_string()),
            port: Some(6000),
            ..Config::default()
        };
        let info = config.connection_info_with(|key| match key {
            "PGUSER" => Some("someone".to_string()),
            "PGHOST" => Some("envhost".to_string()),
            _ => None,
        });
        assert_eq!(info.user, "gpadmin");
        assert_eq!(info.port, 6000);
        assert_eq!(info.host, "envhost");
        assert_eq!(info.dbname, "");
    }

    #[test]
    fn test_begin_statement_options() {
        let custom = Config {
            begin_statement: Some("SET TRANSACTION READ ONLY".to_string()),
            ..Config::default()
        };
        assert_eq!(
            custom.begin_statement().as_deref(),
            Some("SET TRANSACTION READ ONLY")
        );

        let disabled = Config {
            no_begin_statement: true,
            ..Config::default()
        };
        assert!(disabled.begin_statement().is_none());
    }

    #[test]
    fn test_begin_statement_flags_conflict() {
        let result = Config::try_parse_from([
            "pg-dbconn",
            "--begin-statement",
            "SET x",
            "--no-begin-statement",
        ]);
        assert!(result.is_err());
    }
}
