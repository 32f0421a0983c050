//! Pure numeric kernels behind `LocalCompute`.
//!
//! Everything here is deterministic except `thompson_sample`, which draws from
//! the RNG it is handed.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand_distr::{Beta, Distribution};

use super::{ScoringInput, ScoringOutput, UpdateWeightsInput};
use crate::types::{Feature, FeatureMap, FeatureWeights, NormState, ScoreEntry, SeasonalityData};

/// Smoothing factor for the running mean and variance.
pub const NORM_BETA: f64 = 1e-3;
/// Variance floor, keeps the standardization finite for constant features.
const MIN_VARIANCE: f64 = 1e-8;
/// Learned weights are rescaled to at most this L2 norm.
pub const MAX_WEIGHT_NORM: f64 = 100.0;

// =============================================================================
// Vector helpers
// =============================================================================

/// Divide by the sum. Empty and zero-sum vectors are returned unchanged.
pub fn sum_norm(vec: &[f64]) -> Vec<f64> {
    let total: f64 = vec.iter().sum();
    if total.is_finite() && total == 0.0 {
        return vec.to_vec();
    }
    vec.iter().map(|v| v / total).collect()
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Standardize `vals` against a running mean/variance, updating it with each value.
///
/// Missing or non-finite state is re-seeded from the first value. An empty
/// input leaves the state untouched.
pub fn norm_update(vals: &[f64], state: Option<NormState>) -> (Vec<f64>, Option<NormState>) {
    let Some(first) = vals.first() else {
        return (Vec::new(), state);
    };

    let mut norm = match state {
        Some(s) if s.mean.is_finite() && s.var.is_finite() => s,
        _ => NormState {
            beta: NORM_BETA,
            mean: *first,
            var: 1.0,
        },
    };

    for v in vals {
        let delta = v - norm.mean;
        norm.mean += norm.beta * delta;
        norm.var = (1.0 - norm.beta) * norm.var + norm.beta * delta * delta;
    }
    if norm.var <= MIN_VARIANCE {
        norm.var = MIN_VARIANCE;
    }

    let std = norm.var.sqrt();
    let out = vals.iter().map(|v| (v - norm.mean) / std).collect();
    (out, Some(norm))
}

// =============================================================================
// Seasonality
// =============================================================================

/// Pull a sparse histogram toward the prior: `(h + tau * p) / (sum(h) + tau)`.
pub fn bayes_hist(hist: &[f64], prior: Option<&[f64]>, tau: f64) -> Vec<f64> {
    let Some(prior) = prior else {
        return hist.to_vec();
    };
    if hist.is_empty() || hist.len() != prior.len() {
        return hist.to_vec();
    }
    let total: f64 = hist.iter().sum();
    if total + tau == 0.0 {
        return hist.to_vec();
    }
    hist.iter()
        .zip(prior)
        .map(|(h, p)| (h + tau * p) / (total + tau))
        .collect()
}

/// Turn per-item P(time | item) rows into P(item | time) by squaring and
/// normalizing each column across items. Empty columns become 0.
pub fn norm_hist_dict(hists: &BTreeMap<String, Vec<f64>>) -> BTreeMap<String, Vec<f64>> {
    let width = hists.values().map(Vec::len).max().unwrap_or(0);

    let squared: BTreeMap<&String, Vec<f64>> = hists
        .iter()
        .map(|(key, hist)| (key, hist.iter().map(|v| v * v).collect()))
        .collect();

    let mut col_sums = vec![0.0; width];
    for row in squared.values() {
        for (j, v) in row.iter().enumerate() {
            col_sums[j] += v;
        }
    }

    squared
        .into_iter()
        .map(|(key, row)| {
            let normalized = row
                .iter()
                .zip(&col_sums)
                .map(|(v, sum)| if *sum != 0.0 { v / sum } else { 0.0 })
                .collect();
            (key.clone(), normalized)
        })
        .collect()
}

/// Linear interpolation at position `t`, wrapping from the last bucket to the first.
pub fn interpolate_wrapped(hist: &[f64], t: f64) -> f64 {
    let n = hist.len();
    if n == 0 {
        return 0.0;
    }
    let floor = t.floor();
    let frac = t - floor;
    let lo = (floor as i64).rem_euclid(n as i64) as usize;
    let hi = (lo + 1) % n;
    (1.0 - frac) * hist[lo] + frac * hist[hi]
}

/// Seasonality weight per identifier at time position `at`, summing to 1
/// across `guids` unless every weight is 0.
pub fn process_seasonality(guids: &[String], data: &SeasonalityData, tau: f64, at: f64) -> Vec<f64> {
    let prior = data.pvec.as_deref();
    let time_given_item: BTreeMap<String, Vec<f64>> = data
        .hists
        .iter()
        .map(|(guid, hist)| (guid.clone(), sum_norm(&bayes_hist(hist, prior, tau))))
        .collect();

    let item_given_time = norm_hist_dict(&time_given_item);

    let weights: Vec<f64> = guids
        .iter()
        .map(|guid| {
            item_given_time
                .get(guid)
                .map(|hist| interpolate_wrapped(hist, at))
                .unwrap_or(0.0)
        })
        .collect();

    sum_norm(&weights)
}

// =============================================================================
// Scoring
// =============================================================================

/// Draw one CTR sample per item from `Beta(clicks + alpha, non-clicks + beta)`.
pub fn thompson_sample(
    clicks: &[u64],
    impressions: &[u64],
    alpha: f64,
    beta: f64,
    rng: &mut StdRng,
) -> Vec<f64> {
    clicks
        .iter()
        .zip(impressions)
        .map(|(c, i)| {
            let a = (*c as f64 + alpha).max(0.01);
            let b = (i.saturating_sub(*c) as f64 + beta).max(0.01);
            match Beta::new(a, b) {
                Ok(dist) => dist.sample(rng),
                Err(_) => a / (a + b),
            }
        })
        .collect()
}

/// `sum(weight * score)` over every weight; missing scores count as 0.
pub fn linear_score(scores: &FeatureMap, weights: &FeatureWeights) -> f64 {
    weights
        .iter()
        .map(|(feature, weight)| scores.get(feature).unwrap_or(0.0) * weight)
        .sum()
}

/// Score every candidate. `hour` is fractional local hour of day, `weekday`
/// counts from Sunday = 0.
pub fn weighted_sample_top_sites(
    input: &ScoringInput,
    rng: &mut StdRng,
    hour: f64,
    weekday: f64,
) -> ScoringOutput {
    let mut rows: Vec<FeatureMap> = input
        .guids
        .iter()
        .map(|_| input.features.iter().map(|f| (*f, 0.0)).collect())
        .collect();
    let mut norms = BTreeMap::new();

    for feature in &input.features {
        let raw = match feature {
            Feature::Thom => thompson_sample(
                &input.clicks,
                &input.impressions,
                input.alpha,
                input.beta,
                rng,
            ),
            Feature::Frec => input.frecency.clone(),
            Feature::Hour => {
                process_seasonality(&input.guids, &input.hourly_seasonality, input.tau, hour)
            }
            Feature::Daily => {
                process_seasonality(&input.guids, &input.daily_seasonality, input.tau, weekday)
            }
            Feature::Bias => {
                for row in rows.iter_mut() {
                    row.insert(Feature::Bias, 1.0);
                }
                continue;
            }
        };

        let previous = input.norms.get(feature).copied().flatten();
        let (scores, state) = norm_update(&raw, previous);
        norms.insert(*feature, state);
        for (row, score) in rows.iter_mut().zip(scores) {
            row.insert(*feature, score);
        }
    }

    let score_map = input
        .guids
        .iter()
        .zip(rows)
        .map(|(guid, features)| {
            let final_score = linear_score(&features, &input.weights);
            (
                guid.clone(),
                ScoreEntry {
                    features,
                    final_score,
                },
            )
        })
        .collect();

    ScoringOutput { score_map, norms }
}

// =============================================================================
// Weight update
// =============================================================================

/// Rescale so the L2 norm over all entries is at most `max_norm`.
pub fn clamp_weights(mut weights: FeatureWeights, max_norm: f64) -> FeatureWeights {
    let norm = weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        for w in weights.values_mut() {
            *w *= scale;
        }
    }
    weights
}

/// One logistic-regression gradient step over the interactions since the last
/// update, using each item's previous feature scores as inputs.
pub fn update_weights(input: &UpdateWeightsInput) -> FeatureWeights {
    let mut grads: BTreeMap<Feature, f64> = input.features.iter().map(|f| (*f, 0.0)).collect();
    let mut total = 0.0;

    if let Some(scores) = &input.scores {
        for (guid, counts) in &input.data {
            let Some(entry) = scores.get(guid) else {
                continue;
            };
            // A corrupted score would poison every weight
            if !entry.final_score.is_finite() {
                continue;
            }
            let clicks = counts.clicks as f64 * input.click_bonus;
            let impressions = counts.impressions as f64;
            if clicks == 0.0 && impressions == 0.0 {
                continue;
            }

            let p = sigmoid(entry.final_score);
            let factor = clicks * (p - 1.0) + impressions * p;
            for (feature, grad) in grads.iter_mut() {
                let value = entry.features.get(*feature).filter(|v| !v.is_nan()).unwrap_or(0.0);
                *grad += factor * value;
            }
            total += clicks + impressions;
        }
    }

    let mut weights = input.weights.clone();
    if total > 0.0 {
        let scale = input.eta / total;
        for (feature, grad) in grads {
            let current = weights.get(feature).unwrap_or(f64::NAN);
            weights.insert(feature, current - scale * grad);
        }
    }
    clamp_weights(weights, MAX_WEIGHT_NORM)
}
