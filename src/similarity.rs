//! Historical similarity search.
//!
//! Discovery slices the preprocessed history into fixed-length windows once
//! and freezes them in a [`WindowLibrary`]. Each query is then matched
//! against the library with a direction filter, a correlation pre-filter and
//! Dynamic Time Warping, and the DTW distance is mapped to a 0..=100
//! confidence.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PrepareConfig;
use crate::pivots::{detect_pivots_in, Threshold};
use crate::preprocess::{min_max_normalize, CausalWindows};
use crate::{Direction, PatternError, Period, Result, Series};

// ============================================================
// CONFIGURATION
// ============================================================

/// Similarity search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Bars per window, query and reference alike
    pub window_length: usize,
    pub stride: Period,
    /// Forward horizons in bars. The first one drives expected moves.
    pub horizons: Vec<usize>,
    /// Matches below this confidence are dropped
    pub min_confidence: f64,
    pub top_k: usize,
    /// Sakoe-Chiba band half-width; `None` runs full DTW
    pub band: Option<usize>,
    /// DTW distance that maps to confidence 50. Defaults to `window_length * 0.02`.
    pub reference_scale: Option<f64>,
    /// Windows with fewer pivots have no discernible structure
    pub min_window_pivots: usize,
    /// ZigZag threshold, in normalized units, for the structure check
    pub structure_threshold: f64,
    /// Pearson correlation a candidate needs before DTW runs
    pub min_correlation: Option<f64>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            window_length: 30,
            stride: Period::new_const(1),
            horizons: vec![5, 10, 20],
            min_confidence: 50.0,
            top_k: 10,
            band: None,
            reference_scale: None,
            min_window_pivots: 4,
            structure_threshold: 0.1,
            min_correlation: Some(0.0),
        }
    }
}

/// Reference scale per bar of window length
pub const REFERENCE_SCALE_PER_BAR: f64 = 0.02;

impl SimilarityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_length < 4 {
            return Err(PatternError::InvalidConfig(format!(
                "window_length must be >= 4, got {}",
                self.window_length
            )));
        }
        if self.horizons.is_empty() || self.horizons.contains(&0) {
            return Err(PatternError::InvalidConfig(
                "horizons must be non-empty and positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(PatternError::OutOfRange {
                field: "min_confidence",
                value: self.min_confidence,
                min: 0.0,
                max: 100.0,
            });
        }
        if self.top_k == 0 {
            return Err(PatternError::InvalidConfig("top_k must be > 0".to_string()));
        }
        if let Some(scale) = self.reference_scale {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(PatternError::OutOfRange {
                    field: "reference_scale",
                    value: scale,
                    min: 0.0,
                    max: f64::INFINITY,
                });
            }
        }
        if !self.structure_threshold.is_finite() || self.structure_threshold <= 0.0 {
            return Err(PatternError::OutOfRange {
                field: "structure_threshold",
                value: self.structure_threshold,
                min: 0.0,
                max: 1.0,
            });
        }
        if let Some(c) = self.min_correlation {
            if !(-1.0..=1.0).contains(&c) {
                return Err(PatternError::OutOfRange {
                    field: "min_correlation",
                    value: c,
                    min: -1.0,
                    max: 1.0,
                });
            }
        }
        Ok(())
    }

    /// Horizon whose forward return becomes a match's expected move
    #[inline]
    pub fn primary_horizon(&self) -> usize {
        self.horizons.first().copied().unwrap_or(1)
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.reference_scale
            .unwrap_or(self.window_length as f64 * REFERENCE_SCALE_PER_BAR)
    }
}

// ============================================================
// WINDOWS
// ============================================================

/// Realized close-to-close change `horizon` bars after a window ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForwardReturn {
    pub horizon: usize,
    /// Percent; `None` when the series ends too early
    pub pct: Option<f64>,
}

/// One reference window of the Discovery snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalWindow {
    pub start_index: usize,
    /// Inclusive
    pub end_index: usize,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub values: Vec<f64>,
    pub direction: Direction,
    pub forward_returns: Vec<ForwardReturn>,
    pub pivot_count: usize,
}

impl HistoricalWindow {
    pub fn forward_return(&self, horizon: usize) -> Option<f64> {
        self.forward_returns
            .iter()
            .find(|f| f.horizon == horizon)
            .and_then(|f| f.pct)
    }
}

/// Slide a window over the prepared series.
///
/// Each window is prepared from bars up to its own end, exactly as a query
/// ending there would be. Windows whose normalized shape has fewer than
/// `min_window_pivots` pivots are dropped.
pub fn extract_windows(
    series: &Series,
    prepare_cfg: &PrepareConfig,
    cfg: &SimilarityConfig,
) -> Result<Vec<HistoricalWindow>> {
    cfg.validate()?;
    let n = series.len();
    let wl = cfg.window_length;
    if wl >= n {
        return Err(PatternError::InvalidConfig(format!(
            "window_length {} must be shorter than the series ({} bars)",
            wl, n
        )));
    }

    let causal = CausalWindows::new(series, &prepare_cfg.smoothing)?;
    let closes = series.closes();
    let structure = Threshold::Absolute {
        value: cfg.structure_threshold,
    };

    let mut windows = Vec::new();
    let mut discarded = 0usize;
    for start in (0..=n - wl).step_by(cfg.stride.get()) {
        let end = start + wl - 1;
        let raw = causal.window(end, wl)?;

        let mut shape = raw.clone();
        min_max_normalize(&mut shape);
        let pivot_count = detect_pivots_in(&shape, &structure, Period::new_const(1))?.len();
        if pivot_count < cfg.min_window_pivots {
            discarded += 1;
            continue;
        }

        let direction = Direction::from_change(raw[wl - 1] - raw[0]);
        let values = if prepare_cfg.normalize { shape } else { raw };
        let forward_returns = cfg
            .horizons
            .iter()
            .map(|&h| ForwardReturn {
                horizon: h,
                pct: pct_change(&closes, end, end + h),
            })
            .collect();

        windows.push(HistoricalWindow {
            start_index: start,
            end_index: end,
            start_timestamp: series.timestamp_at(start),
            end_timestamp: series.timestamp_at(end),
            values,
            direction,
            forward_returns,
            pivot_count,
        });
    }

    debug!(
        bars = n,
        kept = windows.len(),
        discarded,
        "historical window extraction"
    );
    Ok(windows)
}

fn pct_change(closes: &[f64], from: usize, to: usize) -> Option<f64> {
    let base = *closes.get(from)?;
    let later = *closes.get(to)?;
    if base.abs() <= f64::EPSILON {
        return None;
    }
    Some((later - base) / base * 100.0)
}

/// The window being forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub values: Vec<f64>,
    pub direction: Direction,
    /// Raw close at `end_index`, base of expected prices
    pub last_price: f64,
}

impl QueryWindow {
    /// Query from explicit values. Direction follows their net change.
    pub fn new(values: Vec<f64>, start_index: usize, last_price: f64) -> Self {
        let direction = match (values.first(), values.last()) {
            (Some(first), Some(last)) => Direction::from_change(last - first),
            _ => Direction::Neutral,
        };
        let end_index = start_index + values.len().saturating_sub(1);
        Self {
            start_index,
            end_index,
            start_timestamp: start_index as i64,
            end_timestamp: end_index as i64,
            values,
            direction,
            last_price,
        }
    }

    /// The most recent window of `series`
    pub fn latest(series: &Series, prepare_cfg: &PrepareConfig, cfg: &SimilarityConfig) -> Result<Self> {
        let last = series.len().checked_sub(1).ok_or(PatternError::InsufficientData {
            need: cfg.window_length,
            got: 0,
        })?;
        Self::ending_at(series, last, prepare_cfg, cfg)
    }

    /// Window ending at bar `end`, prepared from bars up to `end` only
    pub fn ending_at(
        series: &Series,
        end: usize,
        prepare_cfg: &PrepareConfig,
        cfg: &SimilarityConfig,
    ) -> Result<Self> {
        let wl = cfg.window_length;
        let available = (end + 1).min(series.len());
        if available < wl || end >= series.len() {
            return Err(PatternError::InsufficientData {
                need: wl,
                got: available,
            });
        }
        let causal = CausalWindows::new(series, &prepare_cfg.smoothing)?;
        Self::from_causal(series, &causal, end, prepare_cfg.normalize, wl)
    }

    /// Window ending at bar `end` cut from values prepared once for the
    /// whole series. Repeated queries over one series should share `causal`.
    pub fn from_causal(
        series: &Series,
        causal: &CausalWindows,
        end: usize,
        normalize: bool,
        window_length: usize,
    ) -> Result<Self> {
        if causal.len() != series.len() {
            return Err(PatternError::InvalidConfig(format!(
                "prepared values cover {} bars, series has {}",
                causal.len(),
                series.len()
            )));
        }
        let raw = causal.window(end, window_length)?;
        let start = end + 1 - window_length;
        let direction = Direction::from_change(raw[window_length - 1] - raw[0]);

        let mut values = raw;
        if normalize {
            min_max_normalize(&mut values);
        }
        Ok(Self {
            start_index: start,
            end_index: end,
            start_timestamp: series.timestamp_at(start),
            end_timestamp: series.timestamp_at(end),
            values,
            direction,
            last_price: series.bars()[end].close,
        })
    }
}

// ============================================================
// DISTANCE
// ============================================================

/// Dynamic Time Warping with squared point cost.
///
/// With `band`, cells farther than the band from the diagonal are skipped
/// (Sakoe-Chiba). The band is widened to at least the length difference so
/// a path always exists. Empty input is infinitely far from anything.
pub fn dtw_distance(a: &[f64], b: &[f64], band: Option<usize>) -> f64 {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return f64::INFINITY;
    }
    let band = band.map(|w| w.max(n.abs_diff(m)));

    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr.fill(f64::INFINITY);
        let (lo, hi) = match band {
            Some(w) => (i.saturating_sub(w).max(1), (i + w).min(m)),
            None => (1, m),
        };
        for j in lo..=hi {
            let cost = (a[i - 1] - b[j - 1]).powi(2);
            curr[j] = cost + prev[j].min(curr[j - 1]).min(prev[j - 1]);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// Pearson correlation of equal-length sequences; 0 when either is flat
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}

/// DTW distance plus its confidence mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtwMetric {
    pub band: Option<usize>,
    /// Distance that maps to confidence 50
    pub reference_scale: f64,
}

impl DtwMetric {
    pub const NAME: &'static str = "dtw";

    pub fn from_config(cfg: &SimilarityConfig) -> Self {
        Self {
            band: cfg.band,
            reference_scale: cfg.scale(),
        }
    }

    #[inline]
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        dtw_distance(a, b, self.band)
    }

    /// `200 / (1 + 3^(d / scale))`: 100 at zero, 50 at one reference scale,
    /// falling smoothly towards 0.
    pub fn confidence(&self, distance: f64) -> f64 {
        if !distance.is_finite() || distance < 0.0 || self.reference_scale <= 0.0 {
            return 0.0;
        }
        200.0 / (1.0 + 3f64.powf(distance / self.reference_scale))
    }
}

// ============================================================
// MATCHING
// ============================================================

/// A reference window ranked against a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityMatch<'a> {
    pub reference: &'a HistoricalWindow,
    pub distance: f64,
    pub confidence: f64,
    /// Reference's forward return at the primary horizon, percent
    pub expected_move_pct: f64,
    /// Query's last price moved by `expected_move_pct`
    pub expected_price: f64,
}

/// Rank `windows` against `query`.
///
/// Pipeline: direction filter, correlation pre-filter, DTW, confidence
/// cut-off, then sort by confidence (ties by earlier start) and keep `top_k`.
/// Windows without a realized primary forward return are skipped.
pub fn find_matches<'a>(
    query: &QueryWindow,
    windows: &'a [HistoricalWindow],
    cfg: &SimilarityConfig,
) -> Vec<SimilarityMatch<'a>> {
    let metric = DtwMetric::from_config(cfg);
    let horizon = cfg.primary_horizon();

    let mut matches: Vec<SimilarityMatch<'a>> = windows
        .par_iter()
        .filter(|w| w.direction == query.direction)
        .filter_map(|w| {
            let expected_move_pct = w.forward_return(horizon)?;
            if let Some(min_corr) = cfg.min_correlation {
                if w.values.len() == query.values.len()
                    && correlation(&query.values, &w.values) < min_corr
                {
                    return None;
                }
            }
            let distance = metric.distance(&query.values, &w.values);
            let confidence = metric.confidence(distance);
            if confidence < cfg.min_confidence {
                return None;
            }
            Some(SimilarityMatch {
                reference: w,
                distance,
                confidence,
                expected_move_pct,
                expected_price: query.last_price * (1.0 + expected_move_pct / 100.0),
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.reference.start_index.cmp(&b.reference.start_index))
    });
    matches.truncate(cfg.top_k);

    debug!(
        candidates = windows.len(),
        matches = matches.len(),
        "similarity search"
    );
    matches
}

// ============================================================
// DISCOVERY SNAPSHOT
// ============================================================

/// Immutable set of reference windows built once per historical dataset.
///
/// Shared by reference across queries and threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowLibrary {
    windows: Vec<HistoricalWindow>,
    prepare: PrepareConfig,
    config: SimilarityConfig,
    bars: usize,
}

impl WindowLibrary {
    /// Discovery phase
    pub fn discover(
        series: &Series,
        prepare_cfg: &PrepareConfig,
        cfg: &SimilarityConfig,
    ) -> Result<Self> {
        prepare_cfg.validate()?;
        let windows = extract_windows(series, prepare_cfg, cfg)?;
        Ok(Self {
            windows,
            prepare: prepare_cfg.clone(),
            config: cfg.clone(),
            bars: series.len(),
        })
    }

    pub fn windows(&self) -> &[HistoricalWindow] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn prepare(&self) -> &PrepareConfig {
        &self.prepare
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Bars in the history the library was built from
    pub fn bars(&self) -> usize {
        self.bars
    }

    pub fn search(&self, query: &QueryWindow) -> Vec<SimilarityMatch<'_>> {
        find_matches(query, &self.windows, &self.config)
    }
}

// ============================================================
// TESTS
// ============================================================
