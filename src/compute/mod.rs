//! Compute service: the numeric side of ranking.
//!
//! The orchestrator only talks to `ComputeService`, so the kernels can run in
//! process (`LocalCompute`) or behind any isolated worker that speaks the same
//! three operations.

pub mod kernels;
pub mod local;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Feature, FeatureWeights, InteractionCounts, Norms, ScoreMap, SeasonalityData};

pub use local::LocalCompute;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid compute input: {0}")]
    InvalidInput(String),

    #[error("Compute worker failed: {0}")]
    Worker(String),
}

/// Arguments for the online weight update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateWeightsInput {
    /// Interactions recorded since the last update, by identifier.
    pub data: BTreeMap<String, InteractionCounts>,
    /// Score map from the previous ranking pass, if any.
    pub scores: Option<ScoreMap>,
    pub features: Vec<Feature>,
    pub weights: FeatureWeights,
    pub eta: f64,
    pub click_bonus: f64,
}

/// Arguments for scoring. `guids`, `clicks`, `impressions` and `frecency` are
/// parallel arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringInput {
    pub features: Vec<Feature>,
    pub alpha: f64,
    pub beta: f64,
    pub tau: f64,
    pub guids: Vec<String>,
    pub clicks: Vec<u64>,
    pub impressions: Vec<u64>,
    pub norms: Norms,
    pub weights: FeatureWeights,
    pub frecency: Vec<f64>,
    pub hourly_seasonality: SeasonalityData,
    pub daily_seasonality: SeasonalityData,
}

impl ScoringInput {
    pub fn validate(&self) -> Result<(), ComputeError> {
        let n = self.guids.len();
        let lengths = [
            ("clicks", self.clicks.len()),
            ("impressions", self.impressions.len()),
            ("frecency", self.frecency.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(ComputeError::InvalidInput(format!(
                    "{} has {} entries for {} identifiers",
                    name, len, n
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutput {
    pub score_map: ScoreMap,
    /// Updated normalization state for the features that were computed.
    pub norms: Norms,
}

/// The three named operations the ranker needs. Implementations must be
/// free of side effects other than their return values.
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Divide a vector by its sum. Empty and all-zero vectors come back unchanged.
    async fn sum_norm(&self, vec: Vec<f64>) -> Result<Vec<f64>, ComputeError>;

    /// One gradient step of the logistic model over recent interactions.
    async fn update_weights(&self, input: UpdateWeightsInput) -> Result<FeatureWeights, ComputeError>;

    /// Score every candidate and return the per-feature breakdown.
    async fn weighted_sample_top_sites(
        &self,
        input: ScoringInput,
    ) -> Result<ScoringOutput, ComputeError>;
}
