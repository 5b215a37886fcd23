use std::time::Duration;

use crate::memory::FaultPoint;

/// Errors from gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The operation's deadline passed before it could finish.
    #[error("deadline of {budget:?} exceeded")]
    Timeout { budget: Duration },

    /// A row with this identity already exists.
    #[error("duplicate {what}: {id}")]
    Duplicate { what: &'static str, id: String },

    /// A referenced row does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A write touched an unexpected number of rows.
    #[error("{what}: expected 1 row affected, got {actual}")]
    RowCount { what: &'static str, actual: u64 },

    /// A stored row could not be read back into its typed form.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// An in-process lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// A test-armed fault fired.
    #[error("injected fault at {0:?}")]
    Injected(FaultPoint),

    /// Error reported by SQLite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error while preparing the storage location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Returns `true` if the failure was a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
