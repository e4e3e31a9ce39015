//! pg-dbconn - Main entry point.
//!
//! Opens a pool of connections, runs each single-column `--query` and prints
//! its values one per line. Any failure ends the process, including a query
//! that returns more than one column.

use pg_dbconn::config::Config;
use pg_dbconn::db::{DbConn, PgDriver};
use pg_dbconn::fatal::ExitOnFatal;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr so query output on stdout stays clean
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() {
    let config = Config::parse_args();

    init_tracing(&config);

    info!("Starting pg-dbconn v{}", env!("CARGO_PKG_VERSION"));

    let driver = PgDriver::new().with_connect_timeout(config.connect_timeout_duration());
    let mut conn = DbConn::must_new(
        driver,
        config.connection_info(),
        Arc::new(ExitOnFatal::default()),
    )
    .with_begin_statement(config.begin_statement());

    conn.must_connect(config.pool_size).await;

    if config.transaction {
        conn.must_begin(config.slot).await;
    }

    for query in &config.queries {
        for value in conn.must_select_string_slice(query, config.slot).await {
            println!("{}", value);
        }
    }

    if config.transaction {
        conn.must_commit(config.slot).await;
    }

    conn.close().await;
    info!("Done");
}
