//! Walk-forward validation of similarity forecasts.
//!
//! Each fold discovers a window library on bars it is allowed to know
//! (expanding in-sample window) and forecasts every bar of the following
//! out-of-sample block. Realized forward returns are compared with the
//! forecast to measure directional hit rate, error, interval coverage and
//! confidence calibration.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::forecast::aggregate;
use crate::preprocess::CausalWindows;
use crate::similarity::{QueryWindow, WindowLibrary};
use crate::{Direction, PatternError, Result, Series};

/// Fold layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub n_folds: usize,
    /// In-sample bars of the first fold
    pub min_train_bars: usize,
    /// Smallest acceptable out-of-sample block
    pub min_test_bars: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            n_folds: 4,
            min_train_bars: 200,
            min_test_bars: 40,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_folds == 0 || self.min_test_bars == 0 || self.min_train_bars == 0 {
            return Err(PatternError::InvalidConfig(
                "n_folds, min_train_bars and min_test_bars must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bar ranges of one fold. Ends are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub fold_index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Expanding in-sample window, equal out-of-sample blocks.
///
/// - Fold 0: train `[0, min_train)`, test the next block
/// - Fold k: train grows by k blocks
pub fn create_folds(total_bars: usize, cfg: &WalkForwardConfig) -> Result<Vec<FoldSpec>> {
    cfg.validate()?;
    let need = cfg.min_train_bars + cfg.n_folds * cfg.min_test_bars;
    if total_bars < need {
        return Err(PatternError::InsufficientData {
            need,
            got: total_bars,
        });
    }
    let test_size = (total_bars - cfg.min_train_bars) / cfg.n_folds;

    Ok((0..cfg.n_folds)
        .map(|i| {
            let train_end = cfg.min_train_bars + i * test_size;
            FoldSpec {
                fold_index: i,
                train_start: 0,
                train_end,
                test_start: train_end,
                test_end: train_end + test_size,
            }
        })
        .collect())
}

/// One out-of-sample forecast and what actually happened
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutcome {
    pub query_end: usize,
    pub confidence: f64,
    pub expected_move_pct: f64,
    pub realized_move_pct: f64,
    pub interval: (f64, f64),
}

impl ForecastOutcome {
    /// Forecast and realized move point the same non-flat way
    pub fn is_hit(&self) -> bool {
        let expected = Direction::from_change(self.expected_move_pct);
        expected != Direction::Neutral && expected == Direction::from_change(self.realized_move_pct)
    }

    pub fn is_covered(&self) -> bool {
        (self.interval.0..=self.interval.1).contains(&self.realized_move_pct)
    }
}

/// Accuracy statistics over a set of outcomes. All zero when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub forecasts: usize,
    pub hit_rate: f64,
    pub mean_abs_error: f64,
    pub interval_coverage: f64,
    pub mean_confidence: f64,
}

impl ForecastSummary {
    pub fn from_outcomes(outcomes: &[ForecastOutcome]) -> Self {
        if outcomes.is_empty() {
            return Self::default();
        }
        let n = outcomes.len() as f64;
        let share = |pred: fn(&ForecastOutcome) -> bool| {
            outcomes.iter().filter(|o| pred(o)).count() as f64 / n
        };
        Self {
            forecasts: outcomes.len(),
            hit_rate: share(ForecastOutcome::is_hit),
            mean_abs_error: outcomes
                .iter()
                .map(|o| (o.expected_move_pct - o.realized_move_pct).abs())
                .sum::<f64>()
                / n,
            interval_coverage: share(ForecastOutcome::is_covered),
            mean_confidence: outcomes.iter().map(|o| o.confidence).sum::<f64>() / n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub spec: FoldSpec,
    /// Windows in the fold's library
    pub library_windows: usize,
    pub summary: ForecastSummary,
    pub outcomes: Vec<ForecastOutcome>,
}

/// Hit rate of forecasts whose confidence fell in `[lower, upper)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub forecasts: usize,
    pub hit_rate: Option<f64>,
}

/// Confidence buckets of 20 points; the last one includes 100
pub fn calibrate(outcomes: &[ForecastOutcome]) -> Vec<CalibrationBucket> {
    (0..5)
        .map(|b| {
            let lower = b as f64 * 20.0;
            let upper = lower + 20.0;
            let inside: Vec<&ForecastOutcome> = outcomes
                .iter()
                .filter(|o| {
                    o.confidence >= lower && (o.confidence < upper || (b == 4 && o.confidence <= upper))
                })
                .collect();
            let hits = inside.iter().filter(|o| o.is_hit()).count();
            CalibrationBucket {
                lower,
                upper,
                forecasts: inside.len(),
                hit_rate: (!inside.is_empty()).then(|| hits as f64 / inside.len() as f64),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub folds: Vec<FoldResult>,
    pub overall: ForecastSummary,
    pub calibration: Vec<CalibrationBucket>,
}

/// Run every fold over `series` with the similarity settings of `cfg`
pub fn run_walk_forward(
    series: &Series,
    cfg: &AnalysisConfig,
    wf: &WalkForwardConfig,
) -> Result<WalkForwardReport> {
    cfg.validate()?;
    let specs = create_folds(series.len(), wf)?;
    let closes = series.closes();
    let horizon = cfg.similarity.primary_horizon();
    let window_length = cfg.similarity.window_length;
    // Causal, so one pass over the full series serves every fold's queries
    let causal = CausalWindows::new(series, &cfg.prepare.smoothing)?;

    let mut folds = Vec::with_capacity(specs.len());
    for spec in specs {
        let train = series.head(spec.train_end);
        let library = WindowLibrary::discover(&train, &cfg.prepare, &cfg.similarity)?;

        let mut outcomes = Vec::new();
        for t in spec.test_start..spec.test_end {
            if t + 1 < window_length || t + horizon >= closes.len() || closes[t] == 0.0 {
                continue;
            }
            let query =
                QueryWindow::from_causal(series, &causal, t, cfg.prepare.normalize, window_length)?;
            let agg = aggregate(&library.search(&query), cfg.forecast_top_n);
            if agg.is_empty() {
                continue;
            }
            outcomes.push(ForecastOutcome {
                query_end: t,
                confidence: agg.average_confidence,
                expected_move_pct: agg.expected_move_pct,
                realized_move_pct: (closes[t + horizon] - closes[t]) / closes[t] * 100.0,
                interval: agg.forecast_interval,
            });
        }

        let summary = ForecastSummary::from_outcomes(&outcomes);
        debug!(
            fold = spec.fold_index,
            train_bars = spec.train_end,
            windows = library.len(),
            forecasts = summary.forecasts,
            hit_rate = summary.hit_rate,
            "walk-forward fold"
        );
        folds.push(FoldResult {
            spec,
            library_windows: library.len(),
            summary,
            outcomes,
        });
    }

    let all: Vec<ForecastOutcome> = folds
        .iter()
        .flat_map(|f| f.outcomes.iter().copied())
        .collect();
    Ok(WalkForwardReport {
        overall: ForecastSummary::from_outcomes(&all),
        calibration: calibrate(&all),
        folds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(confidence: f64, expected: f64, realized: f64) -> ForecastOutcome {
        ForecastOutcome {
            query_end: 0,
            confidence,
            expected_move_pct: expected,
            realized_move_pct: realized,
            interval: (expected - 1.0, expected + 1.0),
        }
    }

    #[test]
    fn test_create_folds_expanding() {
        let folds = create_folds(400, &WalkForwardConfig::default()).unwrap();
        assert_eq!(folds.len(), 4);
        assert_eq!(folds[0].train_end, 200);
        assert_eq!(folds[0].test_end, 250);
        for pair in folds.windows(2) {
            assert_eq!(pair[0].test_end, pair[1].test_start);
            assert!(pair[1].train_end > pair[0].train_end);
        }
        assert!(folds.iter().all(|f| f.train_start == 0 && f.test_start == f.train_end));
        assert!(folds.last().unwrap().test_end <= 400);
    }

    #[test]
    fn test_create_folds_insufficient() {
        let err = create_folds(300, &WalkForwardConfig::default()).unwrap_err();
        assert_eq!(err, PatternError::InsufficientData { need: 360, got: 300 });
    }

    #[test]
    fn test_summary() {
        let outcomes = [
            outcome(80.0, 2.0, 1.5),
            outcome(60.0, -1.0, 3.0),
            outcome(90.0, 0.0, 1.0),
        ];
        let s = ForecastSummary::from_outcomes(&outcomes);
        assert_eq!(s.forecasts, 3);
        assert!((s.hit_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((s.interval_coverage - 2.0 / 3.0).abs() < 1e-12);
        assert!((s.mean_abs_error - 5.5 / 3.0).abs() < 1e-12);
        assert!((s.mean_confidence - 230.0 / 3.0).abs() < 1e-12);
        assert_eq!(ForecastSummary::from_outcomes(&[]), ForecastSummary::default());
    }

    #[test]
    fn test_calibration_buckets() {
        let outcomes = [
            outcome(100.0, 1.0, 1.0),
            outcome(85.0, 1.0, -1.0),
            outcome(10.0, 1.0, 1.0),
        ];
        let buckets = calibrate(&outcomes);
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[0].forecasts, 1);
        assert_eq!(buckets[0].hit_rate, Some(1.0));
        assert_eq!(buckets[2].hit_rate, None);
        assert_eq!(buckets[4].forecasts, 2);
        assert_eq!(buckets[4].hit_rate, Some(0.5));
    }
}
