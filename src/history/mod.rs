//! Interaction and visit history: the query seam and the aggregates built on it.
//!
//! `QueryExecutor` is the raw SQL boundary to the history store. `InteractionSource`
//! is what the ranker consumes: per-item counts and histograms, global histograms
//! for seasonality priors, and the incremental interactions since the last update.

pub mod aggregator;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::InteractionCounts;

pub use aggregator::InteractionAggregator;
pub use rusqlite::types::Value as SqlValue;
pub use sqlite::SqliteExecutor;

/// Stored timestamps above this are assumed to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;
/// The incremental update never looks back further than this.
const MAX_UPDATE_WINDOW_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("History connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("Malformed history row: {0}")]
    MalformedRow(String),
}

/// Executes an aggregate query against the history store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Vec<SqlValue>>, HistoryError>;
}

/// Aggregated history the ranker needs. Every per-item map has an entry for
/// each requested identifier, zero-filled when the store has no history.
#[async_trait]
pub trait InteractionSource: Send + Sync {
    /// Clicks and impressions over the recent per-item window.
    async fn fetch_interaction_counts(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, InteractionCounts>, HistoryError>;

    /// Hour-of-day visit histogram (24 buckets) per item.
    async fn fetch_hourly_histogram(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError>;

    /// Day-of-week visit histogram (7 buckets, Sunday first) per item.
    async fn fetch_daily_histogram(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError>;

    /// Hour-of-day histogram over all visits in the long window.
    async fn fetch_global_hourly_histogram(&self) -> Result<Vec<f64>, HistoryError>;

    /// Day-of-week histogram over all visits in the long window.
    async fn fetch_global_daily_histogram(&self) -> Result<Vec<f64>, HistoryError>;

    /// Interactions recorded at or after `since`, clamped to the last 24 hours
    /// before `now`.
    async fn fetch_recent_interactions(
        &self,
        since: UnixSeconds,
        now: UnixSeconds,
    ) -> Result<BTreeMap<String, InteractionCounts>, HistoryError>;
}

/// A timestamp in whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnixSeconds(pub i64);

impl UnixSeconds {
    /// Interpret a persisted timestamp whose unit is not recorded.
    ///
    /// Values above 1e11 are treated as milliseconds. That cutoff is year 5138
    /// in seconds but 1973 in milliseconds, so it only misfires for stored
    /// second values in the far future.
    pub fn from_stored(raw: i64) -> Self {
        if raw > MILLIS_THRESHOLD {
            Self(raw / 1000)
        } else {
            Self(raw)
        }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

/// Start of the incremental interaction window: the later of `since` and
/// 24 hours before `now`.
pub fn update_window_start(since: UnixSeconds, now: UnixSeconds) -> UnixSeconds {
    since.max(UnixSeconds(now.0 - MAX_UPDATE_WINDOW_SECS))
}
