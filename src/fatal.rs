//! Handling of unrecoverable errors.
//!
//! The `must_*` operations on [`DbConn`](crate::db::DbConn) do not return
//! errors; they hand them to a [`FatalHandler`] carried by the connection
//! handle. Production code exits the process, tests panic so the message can
//! be asserted with `#[should_panic]`.

use crate::error::DbError;
use tracing::error;

/// Receives errors that the caller chose not to recover from.
pub trait FatalHandler: Send + Sync {
    fn fatal(&self, err: &DbError) -> !;
}

/// Logs the error and exits the process.
#[derive(Debug, Clone, Copy)]
pub struct ExitOnFatal {
    exit_code: i32,
}

impl ExitOnFatal {
    pub fn new(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

impl Default for ExitOnFatal {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FatalHandler for ExitOnFatal {
    fn fatal(&self, err: &DbError) -> ! {
        error!(error = ?err, "{}", err);
        std::process::exit(self.exit_code)
    }
}

/// Panics with the error message.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicOnFatal;

impl FatalHandler for PanicOnFatal {
    fn fatal(&self, err: &DbError) -> ! {
        error!(error = ?err, "{}", err);
        panic!("{}", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "Invalid connection number: 4")]
    fn test_panic_on_fatal_uses_error_message() {
        PanicOnFatal.fatal(&DbError::InvalidConnNum(4));
    }

    #[test]
    fn test_exit_on_fatal_default_code() {
        assert_eq!(ExitOnFatal::default().exit_code, 1);
    }
}
