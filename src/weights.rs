//! Weight store: configuration-derived initial weights and drift detection.
//!
//! Learned weights persist alongside the init snapshot they started from. When
//! the configured percentages for any active feature change, or the learned
//! weights go non-finite, both are reset to the fresh init values.

use serde_json::json;

use crate::cache::{CacheError, CacheKey, CacheSnapshot, CacheStore};
use crate::config::RankerConfig;
use crate::history::UnixSeconds;
use crate::types::{Feature, FeatureWeights};

/// Weights resolved for one ranking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedWeights {
    /// Weights to feed into the update step.
    pub weights: FeatureWeights,
    /// Baseline to persist next to the weights for the next drift check.
    pub init_weights: FeatureWeights,
    /// True when the persisted state was discarded.
    pub reset: bool,
}

/// Weights derived purely from configuration: percent / 100 per active feature.
pub fn init_weights(config: &RankerConfig, features: &[Feature]) -> FeatureWeights {
    features
        .iter()
        .map(|f| (*f, config.weight_percent(*f) / 100.0))
        .collect()
}

/// Resolve weights from the persisted snapshot, resetting on drift.
///
/// Only features in `features` take part in the comparison, so switching the
/// active set back and forth keeps learned weights as long as the shared
/// features still match.
pub fn load_weights(
    snapshot: &CacheSnapshot,
    config: &RankerConfig,
    features: &[Feature],
) -> LoadedWeights {
    let new_init = init_weights(config, features);

    let reset_reason = match (&snapshot.weights, &snapshot.init_weights) {
        (None, _) => Some("no persisted weights"),
        (Some(current), _) if current.is_empty() => Some("no persisted weights"),
        (_, None) => Some("no init snapshot"),
        (Some(current), Some(old_init)) => features.iter().find_map(|f| {
            if !current.get(*f).is_some_and(f64::is_finite) {
                Some("non-finite weight")
            } else if old_init.get(*f) != new_init.get(*f) {
                Some("configuration changed")
            } else {
                None
            }
        }),
    };

    match (reset_reason, &snapshot.weights, &snapshot.init_weights) {
        (None, Some(current), Some(old_init)) => LoadedWeights {
            weights: current.clone(),
            init_weights: old_init.clone(),
            reset: false,
        },
        (reason, _, _) => {
            // First run has nothing to reset; only log when state was discarded
            if snapshot.weights.is_some() {
                log::info!(
                    "Resetting shortcut weights ({})",
                    reason.unwrap_or("unknown")
                );
            }
            LoadedWeights {
                weights: new_init.clone(),
                init_weights: new_init,
                reset: true,
            }
        }
    }
}

/// Persist weights, their init snapshot and the update time in one write.
pub async fn persist_weights(
    cache: &dyn CacheStore,
    weights: &FeatureWeights,
    init_weights: &FeatureWeights,
    updated_at: UnixSeconds,
) -> Result<(), CacheError> {
    cache
        .set_many(vec![
            (CacheKey::Weights, serde_json::to_value(weights)?),
            (CacheKey::InitWeights, serde_json::to_value(init_weights)?),
            (CacheKey::TimeLastUpdate, json!(updated_at.as_i64())),
        ])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::types::{FeatureMap, FeatureSet};

    fn all() -> &'static [Feature] {
        FeatureSet::All.features()
    }

    fn snapshot_with(weights: FeatureMap, init: FeatureMap) -> CacheSnapshot {
        CacheSnapshot {
            weights: Some(weights),
            init_weights: Some(init),
            ..Default::default()
        }
    }

    #[test]
    fn test_init_weights_from_config() {
        let cfg = RankerConfig {
            thom_weight: Some(40.0),
            ..Default::default()
        };
        let w = init_weights(&cfg, FeatureSet::FrecThomBias.features());
        assert_eq!(w.len(), 3);
        assert_eq!(w.get(Feature::Thom), Some(0.4));
        assert_eq!(w.get(Feature::Frec), Some(0.7));
        assert_eq!(w.get(Feature::Bias), Some(0.01));
        assert!(!w.contains(Feature::Hour));
    }

    #[test]
    fn test_first_run_uses_init() {
        let cfg = RankerConfig::default();
        let loaded = load_weights(&CacheSnapshot::default(), &cfg, all());
        assert!(loaded.reset);
        assert_eq!(loaded.weights, init_weights(&cfg, all()));
        assert_eq!(loaded.init_weights, loaded.weights);
    }

    #[test]
    fn test_matching_snapshot_keeps_learned_weights() {
        let cfg = RankerConfig::default();
        let init = init_weights(&cfg, all());
        let mut learned = init.clone();
        learned.insert(Feature::Frec, 0.93);

        let loaded = load_weights(&snapshot_with(learned.clone(), init.clone()), &cfg, all());
        assert!(!loaded.reset);
        assert_eq!(loaded.weights, learned);
        assert_eq!(loaded.init_weights, init);
    }

    #[test]
    fn test_config_drift_resets_to_fresh_init() {
        let cfg = RankerConfig::default();
        let init = init_weights(&cfg, all());
        let mut learned = init.clone();
        learned.insert(Feature::Frec, 0.93);

        let changed = RankerConfig {
            hour_weight: Some(15.0),
            ..Default::default()
        };
        let loaded = load_weights(&snapshot_with(learned, init), &changed, all());
        assert!(loaded.reset);
        assert_eq!(loaded.weights, init_weights(&changed, all()));
        assert_eq!(loaded.weights.get(Feature::Hour), Some(0.15));
        assert_eq!(loaded.init_weights, loaded.weights);
    }

    #[test]
    fn test_drift_outside_active_set_is_ignored() {
        let cfg = RankerConfig::default();
        let active = FeatureSet::FrecencyOnly.features();
        let init = init_weights(&cfg, all());
        let mut learned = init.clone();
        learned.insert(Feature::Frec, 0.5);
        learned.insert(Feature::Hour, f64::NAN);

        let changed = RankerConfig {
            thom_weight: Some(90.0),
            ..Default::default()
        };
        let loaded = load_weights(&snapshot_with(learned.clone(), init), &changed, active);
        assert!(!loaded.reset);
        assert_eq!(loaded.weights.get(Feature::Frec), Some(0.5));
    }

    #[test]
    fn test_non_finite_weight_resets() {
        let cfg = RankerConfig::default();
        let init = init_weights(&cfg, all());
        let mut learned = init.clone();
        learned.insert(Feature::Thom, f64::NAN);

        let loaded = load_weights(&snapshot_with(learned, init.clone()), &cfg, all());
        assert!(loaded.reset);
        assert_eq!(loaded.weights, init);
    }

    #[test]
    fn test_empty_or_missing_pieces_reset() {
        let cfg = RankerConfig::default();
        let init = init_weights(&cfg, all());

        let loaded = load_weights(&snapshot_with(FeatureMap::new(), init.clone()), &cfg, all());
        assert!(loaded.reset);

        let no_init = CacheSnapshot {
            weights: Some(init.clone()),
            ..Default::default()
        };
        assert!(load_weights(&no_init, &cfg, all()).reset);

        // Active feature missing from the learned weights
        let partial: FeatureMap = [(Feature::Frec, 0.7)].into_iter().collect();
        assert!(load_weights(&snapshot_with(partial, init), &cfg, all()).reset);
    }

    #[tokio::test]
    async fn test_persist_weights_is_one_write() {
        let cache = MemoryCache::new();
        let cfg = RankerConfig::default();
        let w = init_weights(&cfg, all());

        persist_weights(&cache, &w, &w, UnixSeconds(1_700_000_000))
            .await
            .unwrap();

        assert_eq!(
            cache.write_log(),
            vec![vec![
                CacheKey::Weights,
                CacheKey::InitWeights,
                CacheKey::TimeLastUpdate
            ]]
        );
        let snapshot = cache.load().await.unwrap();
        assert_eq!(snapshot.weights, Some(w.clone()));
        assert_eq!(snapshot.init_weights, Some(w));
        assert_eq!(snapshot.time_last_update, Some(1_700_000_000));
    }
}
