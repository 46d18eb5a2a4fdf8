//! Analysis configuration.
//!
//! Every section has a default, so a partial JSON document is a valid
//! configuration:
//!
//! ```rust
//! use chartpat::config::AnalysisConfig;
//!
//! let cfg = AnalysisConfig::from_json(r#"{
//!     "pivots": { "threshold": { "mode": "percent", "value": 2.5 } },
//!     "similarity": { "window_length": 40, "top_k": 5 }
//! }"#).unwrap();
//! assert_eq!(cfg.similarity.window_length, 40);
//! ```

use serde::{Deserialize, Serialize};

use crate::detectors::{DoubleDetector, FlagDetector, HeadAndShouldersDetector, TriangleDetector};
use crate::pivots::Threshold;
use crate::preprocess::Smoothing;
use crate::similarity::SimilarityConfig;
use crate::{PatternDetector, PatternError, Period, Result};

/// Series preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    pub smoothing: Smoothing,
    /// Min-max normalize similarity windows. Pivots for named patterns are
    /// always taken on price-scaled values.
    pub normalize: bool,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            smoothing: Smoothing::Identity,
            normalize: true,
        }
    }
}

impl PrepareConfig {
    pub fn validate(&self) -> Result<()> {
        self.smoothing.validate()
    }
}

/// Pivot extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotConfig {
    pub threshold: Threshold,
    /// Minimum bars between consecutive pivots
    pub min_distance: Period,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::default(),
            min_distance: Period::new_const(3),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub prepare: PrepareConfig,
    pub pivots: PivotConfig,
    pub head_and_shoulders: HeadAndShouldersDetector,
    pub double: DoubleDetector,
    pub triangle: TriangleDetector,
    pub flag: FlagDetector,
    /// Consecutive closes beyond a breakout line needed to confirm
    pub confirm_bars: usize,
    pub similarity: SimilarityConfig,
    /// Matches folded into the forecast aggregate
    pub forecast_top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            prepare: PrepareConfig::default(),
            pivots: PivotConfig::default(),
            head_and_shoulders: HeadAndShouldersDetector::default(),
            double: DoubleDetector::default(),
            triangle: TriangleDetector::default(),
            flag: FlagDetector::default(),
            confirm_bars: 1,
            similarity: SimilarityConfig::default(),
            forecast_top_n: 5,
        }
    }
}

impl AnalysisConfig {
    /// Fail fast on any out-of-range setting
    pub fn validate(&self) -> Result<()> {
        self.prepare.validate()?;
        self.pivots.threshold.validate()?;
        self.head_and_shoulders.validate_config()?;
        self.double.validate_config()?;
        self.triangle.validate_config()?;
        self.flag.validate_config()?;
        if self.confirm_bars == 0 {
            return Err(PatternError::InvalidConfig(
                "confirm_bars must be >= 1".to_string(),
            ));
        }
        self.similarity.validate()?;
        if self.forecast_top_n == 0 {
            return Err(PatternError::InvalidConfig(
                "forecast_top_n must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|e| PatternError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PatternError::Serialization(e.to_string()))
    }
}
