//! Persistent key/value cache for ranker state.
//!
//! The ranker reads the whole snapshot once per invocation and writes related
//! keys together with `set_many`, so a crash never leaves weights without their
//! init snapshot or norms without the score map they produced.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::{norms_from_json, FeatureMap, Norms, ScoreMap, SeasonalityPrior};

pub use file::JsonFileCache;
pub use memory::MemoryCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not find home directory")]
    HomeDirNotFound,
}

/// Keys the ranker persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    Weights,
    InitWeights,
    ScoreMap,
    Norms,
    HourlySeasonality,
    DailySeasonality,
    TimeLastUpdate,
}

impl CacheKey {
    pub const ALL: [CacheKey; 7] = [
        CacheKey::Weights,
        CacheKey::InitWeights,
        CacheKey::ScoreMap,
        CacheKey::Norms,
        CacheKey::HourlySeasonality,
        CacheKey::DailySeasonality,
        CacheKey::TimeLastUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::Weights => "weights",
            CacheKey::InitWeights => "init_weights",
            CacheKey::ScoreMap => "score_map",
            CacheKey::Norms => "norms",
            CacheKey::HourlySeasonality => "hourly_seasonality",
            CacheKey::DailySeasonality => "daily_seasonality",
            CacheKey::TimeLastUpdate => "time_last_update",
        }
    }
}

/// Typed view of everything the cache holds. Entries that are missing or fail
/// to parse are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub weights: Option<FeatureMap>,
    pub init_weights: Option<FeatureMap>,
    pub score_map: Option<ScoreMap>,
    pub norms: Option<Norms>,
    pub hourly_seasonality: Option<SeasonalityPrior>,
    pub daily_seasonality: Option<SeasonalityPrior>,
    /// Seconds or milliseconds since epoch, depending on who wrote it.
    pub time_last_update: Option<i64>,
}

impl CacheSnapshot {
    /// Build a snapshot from a raw JSON object, one key at a time.
    pub fn from_object(object: &serde_json::Map<String, Value>) -> Self {
        let get = |key: CacheKey| object.get(key.as_str()).filter(|v| !v.is_null());

        Self {
            weights: get(CacheKey::Weights).and_then(parse_lenient),
            init_weights: get(CacheKey::InitWeights).and_then(parse_lenient),
            score_map: get(CacheKey::ScoreMap).and_then(parse_lenient),
            norms: get(CacheKey::Norms).and_then(norms_from_json),
            hourly_seasonality: get(CacheKey::HourlySeasonality).and_then(parse_lenient),
            daily_seasonality: get(CacheKey::DailySeasonality).and_then(parse_lenient),
            time_last_update: get(CacheKey::TimeLastUpdate).and_then(|v| {
                v.as_i64().or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            }),
        }
    }
}

fn parse_lenient<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

/// Storage for ranker state.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read every key. A missing store is an empty snapshot.
    async fn load(&self) -> Result<CacheSnapshot, CacheError>;

    /// Write several keys as one durable update. Other keys are preserved.
    async fn set_many(&self, entries: Vec<(CacheKey, Value)>) -> Result<(), CacheError>;

    async fn set(&self, key: CacheKey, value: Value) -> Result<(), CacheError> {
        self.set_many(vec![(key, value)]).await
    }
}
