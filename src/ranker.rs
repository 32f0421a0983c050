//! Ranking orchestrator.
//!
//! One `rank` pass:
//! 1. split candidates into identified and unranked items
//! 2. load the cache snapshot and resolve weights (drift-checked)
//! 3. apply one online weight update from the interactions since the last pass
//! 4. fetch interaction counts and both seasonality bundles concurrently
//! 5. score, persist norms and scores, and sort
//!
//! A NaN anywhere in the final scores invalidates the whole batch and the
//! identified items are ordered by frecency instead. Unranked items always
//! follow the ranked ones in input order.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::cache::{CacheError, CacheKey, CacheStore};
use crate::compute::{ComputeService, ScoringInput, UpdateWeightsInput};
use crate::config::{RankerConfig, SEASONALITY_TAU};
use crate::error::RankError;
use crate::history::{InteractionSource, UnixSeconds};
use crate::seasonality::SeasonalityCache;
use crate::types::{empty_norms, RankableItem};
use crate::weights;

pub struct ShortcutRanker {
    history: Arc<dyn InteractionSource>,
    compute: Arc<dyn ComputeService>,
    cache: Arc<dyn CacheStore>,
    // One pass at a time per ranker, so weight updates are never lost
    rank_lock: Mutex<()>,
}

impl ShortcutRanker {
    pub fn new(
        history: Arc<dyn InteractionSource>,
        compute: Arc<dyn ComputeService>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            history,
            compute,
            cache,
            rank_lock: Mutex::new(()),
        }
    }

    /// Rank `items` with the current preferences.
    ///
    /// On a startup pass stale seasonality priors are used as-is (or left out)
    /// rather than recomputed.
    pub async fn rank(
        &self,
        items: Vec<RankableItem>,
        config: &RankerConfig,
        is_startup: bool,
    ) -> Result<Vec<RankableItem>, RankError> {
        self.rank_at(items, config, is_startup, Utc::now()).await
    }

    /// `rank` with ranking errors absorbed: any failure yields the frecency order.
    pub async fn rank_or_fallback(
        &self,
        items: Vec<RankableItem>,
        config: &RankerConfig,
        is_startup: bool,
    ) -> Vec<RankableItem> {
        match self.rank(items.clone(), config, is_startup).await {
            Ok(ranked) => ranked,
            Err(e) => {
                log::warn!(
                    "Shortcut ranking failed (retryable: {}), using frecency order: {}",
                    e.is_retryable(),
                    e
                );
                frecency_order(items)
            }
        }
    }

    pub(crate) async fn rank_at(
        &self,
        items: Vec<RankableItem>,
        config: &RankerConfig,
        is_startup: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankableItem>, RankError> {
        let _guard = self.rank_lock.lock().await;

        let features = config.features();
        let (ranked, unranked): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|item| item.rank_key().is_some());
        let guids: Vec<String> = ranked
            .iter()
            .filter_map(|item| item.rank_key().map(str::to_string))
            .collect();

        let snapshot = self.cache.load().await?;
        let loaded = weights::load_weights(&snapshot, config, features);

        // Online update from interactions since the previous pass
        let now_s = UnixSeconds::from_datetime(now);
        let since = UnixSeconds::from_stored(snapshot.time_last_update.unwrap_or(0));
        let recent = self.history.fetch_recent_interactions(since, now_s).await?;
        let updated = self
            .compute
            .update_weights(UpdateWeightsInput {
                data: recent,
                scores: snapshot.score_map.clone(),
                features: features.to_vec(),
                weights: loaded.weights,
                eta: config.eta(),
                click_bonus: config.click_bonus(),
            })
            .await?;
        weights::persist_weights(self.cache.as_ref(), &updated, &loaded.init_weights, now_s).await?;

        let seasonality =
            SeasonalityCache::new(self.history.as_ref(), self.compute.as_ref(), self.cache.as_ref());
        let (counts, hourly, daily) = tokio::try_join!(
            async {
                self.history
                    .fetch_interaction_counts(&guids)
                    .await
                    .map_err(RankError::from)
            },
            seasonality.get_hourly(&guids, &snapshot, is_startup, now),
            seasonality.get_daily(&guids, &snapshot, is_startup, now),
        )?;

        let (clicks, impressions): (Vec<u64>, Vec<u64>) = guids
            .iter()
            .map(|g| {
                let c = counts.get(g).copied().unwrap_or_default();
                (c.clicks, c.impressions)
            })
            .unzip();
        let frecency: Vec<f64> = ranked.iter().map(|item| item.frecency).collect();

        let output = self
            .compute
            .weighted_sample_top_sites(ScoringInput {
                features: features.to_vec(),
                alpha: config.positive_prior(),
                beta: config.negative_prior(),
                tau: SEASONALITY_TAU,
                guids: guids.clone(),
                clicks,
                impressions,
                norms: snapshot.norms.clone().unwrap_or_else(|| empty_norms(features)),
                weights: updated,
                frecency: frecency.clone(),
                hourly_seasonality: hourly,
                daily_seasonality: daily,
            })
            .await?;

        self.cache
            .set_many(vec![
                (
                    CacheKey::Norms,
                    serde_json::to_value(&output.norms).map_err(CacheError::from)?,
                ),
                (
                    CacheKey::ScoreMap,
                    serde_json::to_value(&output.score_map).map_err(CacheError::from)?,
                ),
            ])
            .await?;

        let mut scores: Vec<f64> = guids
            .iter()
            .map(|g| output.score_map.get(g).map_or(f64::NAN, |e| e.final_score))
            .collect();
        let nan_count = scores.iter().filter(|s| s.is_nan()).count();
        if nan_count > 0 {
            log::warn!(
                "{} of {} shortcut scores are NaN, ranking by frecency",
                nan_count,
                scores.len()
            );
            scores = frecency;
        }

        let mut ordered = sort_descending(ranked, &scores);
        ordered.extend(unranked);
        Ok(ordered)
    }
}

/// Identified items by frecency, highest first, then unranked items in input order.
pub fn frecency_order(items: Vec<RankableItem>) -> Vec<RankableItem> {
    let (ranked, unranked): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|item| item.rank_key().is_some());
    let frecency: Vec<f64> = ranked.iter().map(|item| item.frecency).collect();
    let mut ordered = sort_descending(ranked, &frecency);
    ordered.extend(unranked);
    ordered
}

/// Stable sort of `items` by `keys` descending. Ties keep input order.
fn sort_descending(items: Vec<RankableItem>, keys: &[f64]) -> Vec<RankableItem> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|a, b| keys[*b].partial_cmp(&keys[*a]).unwrap_or(Ordering::Equal));

    let mut slots: Vec<Option<RankableItem>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect()
}
