//! Top-level error for a ranking pass.
//!
//! Each collaborator keeps its own error type; `RankError` wraps them so the
//! caller can decide whether to retry or fall back to frecency order.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::cache::CacheError;
use crate::compute::ComputeError;
use crate::history::HistoryError;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("History query failed: {0}")]
    History(#[from] HistoryError),

    #[error("Compute service failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("Ranker cache failed: {0}")]
    Cache(#[from] CacheError),
}

impl RankError {
    /// Returns true if running the same pass again may succeed: a busy or
    /// locked history database, a dropped connection, cache I/O, or a worker
    /// failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            RankError::History(HistoryError::Sqlite(e)) => is_busy(e),
            RankError::History(HistoryError::Connection(e)) => match e {
                tokio_rusqlite::Error::Rusqlite(e) => is_busy(e),
                tokio_rusqlite::Error::ConnectionClosed => true,
                _ => false,
            },
            RankError::History(HistoryError::MalformedRow(_)) => false,
            RankError::Compute(ComputeError::Worker(_)) => true,
            RankError::Compute(ComputeError::InvalidInput(_)) => false,
            RankError::Cache(CacheError::Io(_)) => true,
            RankError::Cache(_) => false,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
