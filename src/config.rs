//! Ranker preferences (`smartShortcutsConfig`) and profile locations.
//!
//! Every key is optional. Feature weights are percentages, the learning rate is
//! expressed in 1/10000 units and the click bonus in tenths, mirroring how the
//! values are stored as integer prefs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::CacheError;
use crate::types::{Feature, FeatureSet};

/// Default learning rate numerator (divided by 10000).
pub const DEFAULT_ETA: f64 = 100.0;
/// Default click bonus numerator (divided by 10).
pub const DEFAULT_CLICK_BONUS: f64 = 12.0;
/// Beta prior pseudo-count for clicks.
pub const DEFAULT_POSITIVE_PRIOR: f64 = 1.0;
/// Beta prior pseudo-count for non-clicks.
pub const DEFAULT_NEGATIVE_PRIOR: f64 = 100.0;
/// Strength of the seasonality prior when smoothing per-item histograms.
pub const SEASONALITY_TAU: f64 = 100.0;

const PROFILE_DIR: &str = ".shortcut-ranker";
const CONFIG_FILE: &str = "config.json";
const CACHE_FILE: &str = "shortcut_cache.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankerConfig {
    #[serde(default)]
    pub fset: Option<i64>,
    #[serde(default)]
    pub thom_weight: Option<f64>,
    #[serde(default)]
    pub frec_weight: Option<f64>,
    #[serde(default)]
    pub hour_weight: Option<f64>,
    #[serde(default)]
    pub daily_weight: Option<f64>,
    #[serde(default)]
    pub bias_weight: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
    #[serde(default)]
    pub click_bonus: Option<f64>,
    #[serde(default)]
    pub positive_prior: Option<f64>,
    #[serde(default)]
    pub negative_prior: Option<f64>,
}

impl RankerConfig {
    pub fn feature_set(&self) -> FeatureSet {
        FeatureSet::resolve(self.fset)
    }

    pub fn features(&self) -> &'static [Feature] {
        self.feature_set().features()
    }

    /// Configured weight percentage for a feature, falling back to the default
    /// when unset or non-finite.
    pub fn weight_percent(&self, feature: Feature) -> f64 {
        let (raw, default) = match feature {
            Feature::Thom => (self.thom_weight, 20.0),
            Feature::Frec => (self.frec_weight, 70.0),
            Feature::Hour => (self.hour_weight, 5.0),
            Feature::Daily => (self.daily_weight, 5.0),
            Feature::Bias => (self.bias_weight, 1.0),
        };
        finite_or(raw, default)
    }

    /// Learning rate for the online weight update.
    pub fn eta(&self) -> f64 {
        finite_or(self.eta, DEFAULT_ETA) / 10000.0
    }

    /// Multiplier applied to clicks relative to impressions.
    pub fn click_bonus(&self) -> f64 {
        finite_or(self.click_bonus, DEFAULT_CLICK_BONUS) / 10.0
    }

    pub fn positive_prior(&self) -> f64 {
        finite_or(self.positive_prior, DEFAULT_POSITIVE_PRIOR)
    }

    pub fn negative_prior(&self) -> f64 {
        finite_or(self.negative_prior, DEFAULT_NEGATIVE_PRIOR)
    }
}

fn finite_or(raw: Option<f64>, default: f64) -> f64 {
    raw.filter(|v| v.is_finite()).unwrap_or(default)
}

/// Load ranker prefs from a JSON file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RankerConfig, String> {
    if !path.exists() {
        log::debug!("No ranker config at {}, using defaults", path.display());
        return Ok(RankerConfig::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Per-profile file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePaths {
    pub dir: PathBuf,
}

impl ProfilePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve the default profile directory: `~/.shortcut-ranker`.
    pub fn default_profile() -> Result<Self, CacheError> {
        let home = dirs::home_dir().ok_or(CacheError::HomeDirNotFound)?;
        Ok(Self::new(home.join(PROFILE_DIR)))
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RankerConfig::default();
        assert_eq!(cfg.features().len(), 5);
        assert!((cfg.eta() - 0.01).abs() < 1e-12);
        assert!((cfg.click_bonus() - 1.2).abs() < 1e-12);
        assert_eq!(cfg.positive_prior(), 1.0);
        assert_eq!(cfg.negative_prior(), 100.0);
        assert_eq!(cfg.weight_percent(Feature::Frec), 70.0);
        assert_eq!(cfg.weight_percent(Feature::Bias), 1.0);
    }

    #[test]
    fn test_non_finite_pref_uses_default() {
        let cfg = RankerConfig {
            frec_weight: Some(f64::NAN),
            eta: Some(f64::INFINITY),
            ..Default::default()
        };
        assert_eq!(cfg.weight_percent(Feature::Frec), 70.0);
        assert!((cfg.eta() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_parse_snake_case_prefs() {
        let cfg: RankerConfig =
            serde_json::from_str(r#"{"fset": 1, "thom_weight": 40, "click_bonus": 20}"#).unwrap();
        assert_eq!(cfg.features(), &[Feature::Frec, Feature::Thom, Feature::Bias]);
        assert_eq!(cfg.weight_percent(Feature::Thom), 40.0);
        assert!((cfg.click_bonus() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_load_config_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, RankerConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"fset": 0, "eta": 50}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.features(), &[Feature::Frec]);
        assert!((cfg.eta() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_load_config_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_profile_paths() {
        let paths = ProfilePaths::new("/tmp/profile");
        assert_eq!(paths.config_path(), PathBuf::from("/tmp/profile/config.json"));
        assert_eq!(paths.cache_path(), PathBuf::from("/tmp/profile/shortcut_cache.json"));
    }
}
