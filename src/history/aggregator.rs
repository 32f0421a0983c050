//! Aggregate history queries over the Places tables.
//!
//! Identifiers are always bound as parameters. Duplicate identifiers are queried
//! once, and every requested identifier gets an entry in the result.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::{
    update_window_start, HistoryError, InteractionSource, QueryExecutor, SqlValue, UnixSeconds,
};
use crate::types::{InteractionCounts, Period};

/// Per-item histories and interaction counts look back this far.
const ITEM_LOOKBACK: &str = "-2 months";
/// Global seasonality histograms look back this far.
const GLOBAL_LOOKBACK: &str = "-6 months";

/// Table names the aggregate queries read from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HistoryTables {
    places: String,
    visits: String,
    interactions: String,
}

impl Default for HistoryTables {
    fn default() -> Self {
        Self {
            places: "moz_places".to_string(),
            visits: "moz_historyvisits".to_string(),
            interactions: "moz_newtab_shortcuts_interaction".to_string(),
        }
    }
}

pub struct InteractionAggregator<E> {
    executor: E,
    tables: HistoryTables,
}

impl<E: QueryExecutor> InteractionAggregator<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            tables: HistoryTables::default(),
        }
    }

    async fn fetch_item_histograms(
        &self,
        guids: &[String],
        period: Period,
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError> {
        if guids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let unique = unique_guids(guids);
        let sql = format!(
            "WITH input_keys(guid) AS (VALUES {values}),
             place_ids AS (
               SELECT input_keys.guid, p.id AS place_id
               FROM input_keys
               LEFT JOIN {places} AS p ON p.guid = input_keys.guid
             )
             SELECT
               place_ids.guid AS key,
               {bucket} AS bucket,
               COUNT(v.visit_date) AS visit_count
             FROM place_ids
             LEFT JOIN {visits} AS v
               ON v.place_id = place_ids.place_id
               AND v.visit_date >= 1000000 * CAST(strftime('%s', 'now', '{lookback}') AS INTEGER)
             GROUP BY place_ids.guid, bucket
             ORDER BY place_ids.guid, bucket",
            values = values_clause(unique.len()),
            places = self.tables.places,
            visits = self.tables.visits,
            bucket = bucket_expr(period, "v.visit_date"),
            lookback = ITEM_LOOKBACK,
        );

        let rows = self.executor.execute(&sql, text_params(&unique)).await?;

        let mut histograms: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in &rows {
            let key = row_text(row, 0)?;
            let hist = histograms
                .entry(key)
                .or_insert_with(|| vec![0.0; period.len()]);
            // A place with no visits in the window yields one NULL-bucket row
            if let Some(bucket) = row_int(row, 1) {
                if let Some(slot) = usize::try_from(bucket).ok().and_then(|b| hist.get_mut(b)) {
                    *slot = row_int(row, 2).unwrap_or(0) as f64;
                }
            }
        }
        for guid in unique {
            histograms
                .entry(guid)
                .or_insert_with(|| vec![0.0; period.len()]);
        }
        Ok(histograms)
    }

    async fn fetch_global_histogram(&self, period: Period) -> Result<Vec<f64>, HistoryError> {
        let sql = format!(
            "SELECT {bucket} AS bucket, COUNT(*) AS visit_count
             FROM {visits}
             WHERE visit_date >= 1000000 * CAST(strftime('%s', 'now', '{lookback}') AS INTEGER)
             GROUP BY bucket
             ORDER BY bucket",
            bucket = bucket_expr(period, "visit_date"),
            visits = self.tables.visits,
            lookback = GLOBAL_LOOKBACK,
        );

        let rows = self.executor.execute(&sql, Vec::new()).await?;

        let mut histogram = vec![0.0; period.len()];
        for row in &rows {
            if let Some(bucket) = row_int(row, 0) {
                if let Some(slot) = usize::try_from(bucket).ok().and_then(|b| histogram.get_mut(b)) {
                    *slot = row_int(row, 1).unwrap_or(0) as f64;
                }
            }
        }
        Ok(histogram)
    }
}

#[async_trait]
impl<E: QueryExecutor> InteractionSource for InteractionAggregator<E> {
    async fn fetch_interaction_counts(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, InteractionCounts>, HistoryError> {
        if guids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let unique = unique_guids(guids);
        let sql = format!(
            "WITH input_keys(guid) AS (VALUES {values}),
             place_ids AS (
               SELECT input_keys.guid, p.id AS place_id
               FROM input_keys
               JOIN {places} AS p ON p.guid = input_keys.guid
             )
             SELECT
               place_ids.guid AS key,
               COALESCE(SUM(e.event_type), 0) AS total_clicks,
               COALESCE(SUM(1 - e.event_type), 0) AS total_impressions
             FROM place_ids
             LEFT JOIN {interactions} AS e
               ON e.place_id = place_ids.place_id
               AND e.timestamp_s >= CAST(strftime('%s', 'now', '{lookback}') AS INTEGER)
             GROUP BY place_ids.guid",
            values = values_clause(unique.len()),
            places = self.tables.places,
            interactions = self.tables.interactions,
            lookback = ITEM_LOOKBACK,
        );

        let rows = self.executor.execute(&sql, text_params(&unique)).await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            counts.insert(row_text(row, 0)?, row_counts(row));
        }
        for guid in unique {
            counts.entry(guid).or_insert_with(InteractionCounts::default);
        }
        Ok(counts)
    }

    async fn fetch_hourly_histogram(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError> {
        self.fetch_item_histograms(guids, Period::Hourly).await
    }

    async fn fetch_daily_histogram(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError> {
        self.fetch_item_histograms(guids, Period::Daily).await
    }

    async fn fetch_global_hourly_histogram(&self) -> Result<Vec<f64>, HistoryError> {
        self.fetch_global_histogram(Period::Hourly).await
    }

    async fn fetch_global_daily_histogram(&self) -> Result<Vec<f64>, HistoryError> {
        self.fetch_global_histogram(Period::Daily).await
    }

    async fn fetch_recent_interactions(
        &self,
        since: UnixSeconds,
        now: UnixSeconds,
    ) -> Result<BTreeMap<String, InteractionCounts>, HistoryError> {
        let start = update_window_start(since, now);
        let sql = format!(
            "SELECT
               p.guid AS guid,
               SUM(CASE WHEN e.event_type = 1 THEN 1 ELSE 0 END) AS clicks,
               SUM(CASE WHEN e.event_type = 0 THEN 1 ELSE 0 END) AS impressions
             FROM {interactions} AS e
             JOIN {places} AS p ON p.id = e.place_id
             WHERE e.timestamp_s >= ?1
             GROUP BY p.guid",
            interactions = self.tables.interactions,
            places = self.tables.places,
        );

        let rows = self
            .executor
            .execute(&sql, vec![SqlValue::Integer(start.as_i64())])
            .await?;

        let mut recent = BTreeMap::new();
        for row in &rows {
            // Places rows without a guid cannot be matched to a score entry
            match row.first() {
                Some(SqlValue::Text(guid)) if !guid.is_empty() => {
                    recent.insert(guid.clone(), row_counts(row));
                }
                _ => continue,
            }
        }
        Ok(recent)
    }
}

// ---------------------------------------------------------------------------
// SQL helpers
// ---------------------------------------------------------------------------

fn unique_guids(guids: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    guids
        .iter()
        .filter(|g| seen.insert(g.as_str()))
        .cloned()
        .collect()
}

/// `(?1), (?2), ...` for a VALUES list of `n` bound identifiers.
fn values_clause(n: usize) -> String {
    (1..=n)
        .map(|i| format!("(?{})", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn text_params(guids: &[String]) -> Vec<SqlValue> {
    guids.iter().map(|g| SqlValue::Text(g.clone())).collect()
}

/// Local-time bucket for a visit_date column stored in microseconds.
fn bucket_expr(period: Period, column: &str) -> String {
    let format = match period {
        Period::Hourly => "%H",
        Period::Daily => "%w",
    };
    format!(
        "CAST(strftime('{}', {} / 1000000, 'unixepoch', 'localtime') AS INTEGER)",
        format, column
    )
}

fn row_text(row: &[SqlValue], index: usize) -> Result<String, HistoryError> {
    match row.get(index) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        other => Err(HistoryError::MalformedRow(format!(
            "expected text in column {}, got {:?}",
            index, other
        ))),
    }
}

fn row_int(row: &[SqlValue], index: usize) -> Option<i64> {
    match row.get(index) {
        Some(SqlValue::Integer(i)) => Some(*i),
        Some(SqlValue::Real(f)) if f.is_finite() => Some(*f as i64),
        _ => None,
    }
}

fn row_counts(row: &[SqlValue]) -> InteractionCounts {
    InteractionCounts {
        clicks: row_int(row, 1).unwrap_or(0).max(0) as u64,
        impressions: row_int(row, 2).unwrap_or(0).max(0) as u64,
    }
}
