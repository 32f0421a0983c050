//! Core types shared by the ranking pipeline.
//!
//! Persisted shapes (`FeatureMap`, `ScoreMap`, `Norms`, `SeasonalityPrior`) read
//! leniently: unknown keys are dropped and non-numeric values become NaN, so a
//! corrupted cache entry shows up as non-finite state instead of a parse error.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Features
// =============================================================================

/// A signal the linear model can weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// Thompson-sampled click-through rate.
    Thom,
    /// Externally computed frecency.
    Frec,
    /// Hour-of-day seasonality match.
    Hour,
    /// Day-of-week seasonality match.
    Daily,
    /// Constant bias term.
    Bias,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Thom,
        Feature::Frec,
        Feature::Hour,
        Feature::Daily,
        Feature::Bias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Thom => "thom",
            Feature::Frec => "frec",
            Feature::Hour => "hour",
            Feature::Daily => "daily",
            Feature::Bias => "bias",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thom" => Ok(Feature::Thom),
            "frec" => Ok(Feature::Frec),
            "hour" => Ok(Feature::Hour),
            "daily" => Ok(Feature::Daily),
            "bias" => Ok(Feature::Bias),
            other => Err(format!("Unknown feature: {}", other)),
        }
    }
}

/// Pref-selected subset of features, addressed by the `fset` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSet {
    FrecencyOnly,
    FrecThomBias,
    FrecThomHourBias,
    FrecThomDailyBias,
    FrecHourDailyBias,
    ThomHourDailyBias,
    All,
}

impl FeatureSet {
    pub const DEFAULT_INDEX: i64 = 6;

    /// Map a pref index to a feature set. Unknown indices yield `None`.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(FeatureSet::FrecencyOnly),
            1 => Some(FeatureSet::FrecThomBias),
            2 => Some(FeatureSet::FrecThomHourBias),
            3 => Some(FeatureSet::FrecThomDailyBias),
            4 => Some(FeatureSet::FrecHourDailyBias),
            5 => Some(FeatureSet::ThomHourDailyBias),
            6 => Some(FeatureSet::All),
            _ => None,
        }
    }

    /// Resolve an optional pref index: absent means the default set, unknown
    /// means frecency only.
    pub fn resolve(index: Option<i64>) -> Self {
        Self::from_index(index.unwrap_or(Self::DEFAULT_INDEX)).unwrap_or(FeatureSet::FrecencyOnly)
    }

    pub fn features(&self) -> &'static [Feature] {
        use Feature::*;
        match self {
            FeatureSet::FrecencyOnly => &[Frec],
            FeatureSet::FrecThomBias => &[Frec, Thom, Bias],
            FeatureSet::FrecThomHourBias => &[Frec, Thom, Hour, Bias],
            FeatureSet::FrecThomDailyBias => &[Frec, Thom, Daily, Bias],
            FeatureSet::FrecHourDailyBias => &[Frec, Hour, Daily, Bias],
            FeatureSet::ThomHourDailyBias => &[Thom, Hour, Daily, Bias],
            FeatureSet::All => &[Frec, Thom, Hour, Daily, Bias],
        }
    }
}

// =============================================================================
// Feature maps (weights and per-item contributions)
// =============================================================================

/// Numeric value per feature. Used for weights, init snapshots and per-item
/// feature contributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "BTreeMap<Feature, f64>", from = "BTreeMap<String, serde_json::Value>")]
pub struct FeatureMap(BTreeMap<Feature, f64>);

/// Learned or configured weight per feature.
pub type FeatureWeights = FeatureMap;

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.0.get(&feature).copied()
    }

    pub fn insert(&mut self, feature: Feature, value: f64) {
        self.0.insert(feature, value);
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains_key(&feature)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.0.values_mut()
    }
}

impl FromIterator<(Feature, f64)> for FeatureMap {
    fn from_iter<I: IntoIterator<Item = (Feature, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<FeatureMap> for BTreeMap<Feature, f64> {
    fn from(map: FeatureMap) -> Self {
        map.0
    }
}

impl From<BTreeMap<String, serde_json::Value>> for FeatureMap {
    fn from(raw: BTreeMap<String, serde_json::Value>) -> Self {
        raw.into_iter()
            .filter_map(|(key, value)| {
                let feature = key.parse::<Feature>().ok()?;
                Some((feature, value.as_f64().unwrap_or(f64::NAN)))
            })
            .collect()
    }
}

// =============================================================================
// Scores and normalization state
// =============================================================================

/// Per-item scoring result: the feature contributions plus the weighted total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    #[serde(flatten)]
    pub features: FeatureMap,
    #[serde(rename = "final", default = "nan", deserialize_with = "lenient_f64")]
    pub final_score: f64,
}

/// Identifier -> score entry, persisted between invocations.
pub type ScoreMap = BTreeMap<String, ScoreEntry>;

/// Running mean/variance used to standardize one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormState {
    pub beta: f64,
    pub mean: f64,
    pub var: f64,
}

/// Per-feature normalization state. `None` asks the compute step to initialize.
pub type Norms = BTreeMap<Feature, Option<NormState>>;

/// Parse a persisted norms object, dropping unknown features and malformed states.
pub fn norms_from_json(value: &serde_json::Value) -> Option<Norms> {
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(key, state)| {
                let feature = key.parse::<Feature>().ok()?;
                Some((feature, serde_json::from_value::<NormState>(state.clone()).ok()))
            })
            .collect(),
    )
}

/// A fresh norms map: every active feature present, none initialized.
pub fn empty_norms(features: &[Feature]) -> Norms {
    features.iter().map(|f| (*f, None)).collect()
}

// =============================================================================
// Interactions and seasonality
// =============================================================================

/// Click and impression totals for one identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionCounts {
    pub clicks: u64,
    pub impressions: u64,
}

/// Which discrete time domain a histogram covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hourly,
    Daily,
}

impl Period {
    /// Number of buckets: 24 hours or 7 weekdays.
    pub fn len(&self) -> usize {
        match self {
            Period::Hourly => 24,
            Period::Daily => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hourly => "hourly",
            Period::Daily => "daily",
        }
    }
}

/// Global visit-timing distribution plus the time it was computed (ms since epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityPrior {
    pub pvec: Vec<f64>,
    #[serde(default)]
    pub timestamp: i64,
}

/// Seasonality arguments for scoring: the global prior (possibly absent) and
/// every candidate's own histogram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityData {
    pub pvec: Option<Vec<f64>>,
    pub hists: BTreeMap<String, Vec<f64>>,
}

// =============================================================================
// Rankable items
// =============================================================================

/// A candidate tile. Only `guid` and `frecency` are read; every other field is
/// carried through untouched.
///
/// A `guid` that is not a string, or a `frecency` that is not a number, is kept
/// verbatim in `extra` and re-emitted as it came in. For ranking such an item
/// has no identifier, or a frecency of 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ItemRepr", into = "ItemRepr")]
pub struct RankableItem {
    pub guid: Option<String>,
    pub frecency: f64,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Wire shape of a `RankableItem`.
#[derive(Serialize, Deserialize)]
struct ItemRepr {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    guid: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    frecency: Option<serde_json::Value>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<ItemRepr> for RankableItem {
    fn from(repr: ItemRepr) -> Self {
        let mut extra = repr.extra;
        let guid = match repr.guid {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => {
                extra.insert("guid".to_string(), other);
                None
            }
            None => None,
        };
        let frecency = match repr.frecency {
            Some(value) => match value.as_f64() {
                Some(f) => f,
                None => {
                    extra.insert("frecency".to_string(), value);
                    0.0
                }
            },
            None => 0.0,
        };
        Self {
            guid,
            frecency,
            extra,
        }
    }
}

impl From<RankableItem> for ItemRepr {
    fn from(item: RankableItem) -> Self {
        let mut extra = item.extra;
        let guid = item
            .guid
            .map(serde_json::Value::String)
            .or_else(|| extra.remove("guid"));
        let frecency = extra
            .remove("frecency")
            .unwrap_or_else(|| serde_json::Value::from(item.frecency));
        Self {
            guid,
            frecency: Some(frecency),
            extra,
        }
    }
}

impl RankableItem {
    pub fn new(guid: impl Into<String>, frecency: f64) -> Self {
        Self {
            guid: Some(guid.into()),
            frecency,
            extra: serde_json::Map::new(),
        }
    }

    /// An item with no identifier; it is never ranked.
    pub fn unidentified(frecency: f64) -> Self {
        Self {
            guid: None,
            frecency,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// The identifier if it is usable as a ranking key.
    pub fn rank_key(&self) -> Option<&str> {
        self.guid.as_deref().filter(|g| !g.is_empty())
    }
}

// -----------------------------------------------------------------------------
// Serde helpers
// -----------------------------------------------------------------------------

fn nan() -> f64 {
    f64::NAN
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(f64::NAN))
}

/// Keeps an explicit `null` as `Some(Value::Null)` so it can be re-emitted.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}
