//! Error types for the RAVN pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not legal in state {0}")]
    InvalidState(&'static str),

    #[error("not found")]
    NotFound,

    #[error("store is busy")]
    Busy,

    #[error("queue is full")]
    Full,

    #[error("interrupted")]
    Interrupted,

    #[error("malformed record")]
    Malformed,

    #[error("probe fault: {0}")]
    ProbeFault(String),

    #[error("store schema is missing")]
    Schema,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("timed out")]
    Timeout,

    #[error("shutting down")]
    ShuttingDown,

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
            if matches!(
                ffi_err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Error::Busy;
            }
        }
        // SQLite reports a missing table as a generic error whose message is
        // the only marker; statement preparation and execution both surface
        // it this way.
        if e.to_string().contains("no such table") {
            return Error::Schema;
        }
        Error::Storage(e.to_string())
    }
}
