//! Scripted collaborators for orchestration tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::compute::{ComputeError, ComputeService, ScoringInput, ScoringOutput, UpdateWeightsInput};
use crate::history::{HistoryError, InteractionSource, UnixSeconds};
use crate::types::{FeatureWeights, InteractionCounts, NormState, ScoreEntry, ScoreMap};

#[derive(Default)]
struct HistoryCalls {
    counts: usize,
    hourly: usize,
    daily: usize,
    global_hourly: usize,
    global_daily: usize,
    recent_since: Vec<(UnixSeconds, UnixSeconds)>,
}

/// In-memory history with call counters.
#[derive(Default)]
pub struct FakeHistory {
    counts: BTreeMap<String, InteractionCounts>,
    recent: BTreeMap<String, InteractionCounts>,
    global_hourly: Option<Vec<f64>>,
    global_daily: Option<Vec<f64>>,
    fail_counts: bool,
    calls: Mutex<HistoryCalls>,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counts(mut self, guid: &str, clicks: u64, impressions: u64) -> Self {
        self.counts
            .insert(guid.to_string(), InteractionCounts { clicks, impressions });
        self
    }

    pub fn with_recent(mut self, guid: &str, clicks: u64, impressions: u64) -> Self {
        self.recent
            .insert(guid.to_string(), InteractionCounts { clicks, impressions });
        self
    }

    pub fn with_global_hourly(mut self, hist: Vec<f64>) -> Self {
        self.global_hourly = Some(hist);
        self
    }

    /// Make the interaction-count query fail.
    pub fn failing(mut self) -> Self {
        self.fail_counts = true;
        self
    }

    pub fn counts_calls(&self) -> usize {
        self.calls.lock().counts
    }

    pub fn hourly_calls(&self) -> usize {
        self.calls.lock().hourly
    }

    pub fn daily_calls(&self) -> usize {
        self.calls.lock().daily
    }

    pub fn global_hourly_calls(&self) -> usize {
        self.calls.lock().global_hourly
    }

    pub fn global_daily_calls(&self) -> usize {
        self.calls.lock().global_daily
    }

    /// `(since, now)` for every recent-interactions query.
    pub fn recent_queries(&self) -> Vec<(UnixSeconds, UnixSeconds)> {
        self.calls.lock().recent_since.clone()
    }

    fn histograms(guids: &[String], len: usize) -> BTreeMap<String, Vec<f64>> {
        guids.iter().map(|g| (g.clone(), vec![0.0; len])).collect()
    }
}

#[async_trait]
impl InteractionSource for FakeHistory {
    async fn fetch_interaction_counts(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, InteractionCounts>, HistoryError> {
        self.calls.lock().counts += 1;
        if self.fail_counts {
            return Err(HistoryError::MalformedRow("scripted failure".to_string()));
        }
        Ok(guids
            .iter()
            .map(|g| (g.clone(), self.counts.get(g).copied().unwrap_or_default()))
            .collect())
    }

    async fn fetch_hourly_histogram(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError> {
        self.calls.lock().hourly += 1;
        Ok(Self::histograms(guids, 24))
    }

    async fn fetch_daily_histogram(
        &self,
        guids: &[String],
    ) -> Result<BTreeMap<String, Vec<f64>>, HistoryError> {
        self.calls.lock().daily += 1;
        Ok(Self::histograms(guids, 7))
    }

    async fn fetch_global_hourly_histogram(&self) -> Result<Vec<f64>, HistoryError> {
        self.calls.lock().global_hourly += 1;
        Ok(self.global_hourly.clone().unwrap_or_else(|| vec![0.0; 24]))
    }

    async fn fetch_global_daily_histogram(&self) -> Result<Vec<f64>, HistoryError> {
        self.calls.lock().global_daily += 1;
        Ok(self.global_daily.clone().unwrap_or_else(|| vec![0.0; 7]))
    }

    async fn fetch_recent_interactions(
        &self,
        since: UnixSeconds,
        now: UnixSeconds,
    ) -> Result<BTreeMap<String, InteractionCounts>, HistoryError> {
        self.calls.lock().recent_since.push((since, now));
        Ok(self.recent.clone())
    }
}

/// Compute service that returns scripted final scores and records its inputs.
#[derive(Default)]
pub struct FakeCompute {
    finals: BTreeMap<String, f64>,
    next_weights: Option<FeatureWeights>,
    step_weights: bool,
    updates: Mutex<Vec<UpdateWeightsInput>>,
    scorings: Mutex<Vec<ScoringInput>>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final score for `guid`. Identifiers without one score NaN.
    pub fn with_final(mut self, guid: &str, score: f64) -> Self {
        self.finals.insert(guid.to_string(), score);
        self
    }

    /// Weights returned by the update step instead of echoing the input.
    pub fn with_next_weights(mut self, weights: FeatureWeights) -> Self {
        self.next_weights = Some(weights);
        self
    }

    /// Update step adds 1 to every weight and yields once before returning.
    pub fn with_weight_step(mut self) -> Self {
        self.step_weights = true;
        self
    }

    pub fn updates(&self) -> Vec<UpdateWeightsInput> {
        self.updates.lock().clone()
    }

    pub fn scorings(&self) -> Vec<ScoringInput> {
        self.scorings.lock().clone()
    }
}

#[async_trait]
impl ComputeService for FakeCompute {
    async fn sum_norm(&self, vec: Vec<f64>) -> Result<Vec<f64>, ComputeError> {
        Ok(crate::compute::kernels::sum_norm(&vec))
    }

    async fn update_weights(&self, input: UpdateWeightsInput) -> Result<FeatureWeights, ComputeError> {
        let weights = if self.step_weights {
            input.weights.iter().map(|(f, w)| (f, w + 1.0)).collect()
        } else {
            self.next_weights.clone().unwrap_or_else(|| input.weights.clone())
        };
        self.updates.lock().push(input);
        if self.step_weights {
            tokio::task::yield_now().await;
        }
        Ok(weights)
    }

    async fn weighted_sample_top_sites(
        &self,
        input: ScoringInput,
    ) -> Result<ScoringOutput, ComputeError> {
        let score_map: ScoreMap = input
            .guids
            .iter()
            .map(|guid| {
                let entry = ScoreEntry {
                    features: input.features.iter().map(|f| (*f, 0.0)).collect(),
                    final_score: self.finals.get(guid).copied().unwrap_or(f64::NAN),
                };
                (guid.clone(), entry)
            })
            .collect();
        let norms = input
            .features
            .iter()
            .map(|f| {
                (
                    *f,
                    Some(NormState {
                        beta: 1e-3,
                        mean: 0.0,
                        var: 1.0,
                    }),
                )
            })
            .collect();
        self.scorings.lock().push(input);
        Ok(ScoringOutput { score_map, norms })
    }
}
