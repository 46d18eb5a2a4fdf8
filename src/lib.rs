//! # chartpat - chart pattern recognition engine
//!
//! Turns a raw OHLC price series into swing pivots, geometric chart patterns
//! (Head & Shoulders, Double Top/Bottom, Triangles, Flags/Pennants) and a
//! DTW-based historical-similarity forecast.
//!
//! ## Quick Start
//!
//! ```rust
//! use chartpat::prelude::*;
//!
//! let bars: Vec<Bar> = (0..120)
//!     .map(|i| {
//!         let c = 100.0 + (i as f64 * 0.3).sin() * 5.0;
//!         Bar::new(i as i64 * 60, c, c + 0.5, c - 0.5, c, 1_000.0)
//!     })
//!     .collect();
//! let series = Series::new(bars).unwrap();
//!
//! let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
//! let patterns = engine.detect(&series).unwrap();
//! for p in &patterns {
//!     assert!((0.0..=100.0).contains(&p.score()));
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod config;
pub mod detectors;
pub mod export;
pub mod forecast;
pub mod lifecycle;
pub mod params;
pub mod pivots;
pub mod preprocess;
pub mod scoring;
pub mod similarity;
pub mod walk_forward;

pub mod prelude {
    pub use crate::{
        // Configuration
        config::{AnalysisConfig, PivotConfig, PrepareConfig},
        // Detectors
        detectors::*,
        // Export
        export::{AnalysisReport, ForecastRecord, MatchRecord, PatternRecord},
        // Forecast
        forecast::{aggregate, ForecastAggregate, ForecastReport},
        // Lifecycle
        lifecycle::{Breakout, Invalidation, Levels, Lifecycle, Line, PatternState},
        // Parameters
        params::{get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Pivots
        pivots::{detect_pivots, detect_pivots_in, detect_pivots_on, Pivot, PivotKind, Threshold},
        // Preprocessing
        preprocess::{prepare, CausalWindows, Smoothing},
        // Parallel
        scan_parallel,
        // Scoring
        scoring::{GeometryEvidence, ScoreBreakdown},
        // Similarity
        similarity::{
            dtw_distance, extract_windows, find_matches, DtwMetric, HistoricalWindow, QueryWindow,
            SimilarityConfig, SimilarityMatch, WindowLibrary,
        },
        // Walk-forward
        walk_forward::{run_walk_forward, WalkForwardConfig, WalkForwardReport},
        // Types
        Bar,
        BuiltinDetector,
        ContextProvider,
        DefaultContextProvider,
        DetectionContext,
        Direction,
        EngineBuilder,
        GeometryPoint,
        MarketContext,
        OHLCVExt,
        Pattern,
        PatternCategory,
        // Core traits
        PatternDetector,
        PatternEngine,
        // Errors
        PatternError,
        PatternType,
        Period,
        Ratio,
        Result,
        ScanError,
        ScanResult,
        Series,
        Trend,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors that can occur during analysis
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait, implemented by caller bar types
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// Mean of open, high, low and close
    #[inline]
    fn four_price_average(&self) -> f64 {
        (self.open() + self.high() + self.low() + self.close()) / 4.0
    }

    /// True range against the previous close (plain range for the first bar)
    #[inline]
    fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self
                .range()
                .max((self.high() - pc).abs())
                .max((self.low() - pc).abs()),
            None => self.range(),
        }
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if !self.volume().is_finite() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "non-finite volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// A single immutable price bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp)
    }
}

/// Validated, time-ordered sequence of bars.
///
/// Timestamps strictly increase; gaps are allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    bars: Vec<Bar>,
}

impl Series {
    /// Validate and wrap a vector of bars
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                PatternError::InvalidOHLCV { reason, .. } => {
                    PatternError::InvalidOHLCV { index: i, reason }
                }
                other => other,
            })?;
            if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
                return Err(PatternError::InvalidOHLCV {
                    index: i,
                    reason: "timestamps must strictly increase",
                });
            }
        }
        Ok(Self { bars })
    }

    /// Convert caller bars. Bars without a timestamp are stamped with their index.
    pub fn from_ohlcv<T: OHLCV>(bars: &[T]) -> Result<Self> {
        let converted = bars
            .iter()
            .enumerate()
            .map(|(i, b)| Bar {
                timestamp: b.timestamp().unwrap_or(i as i64),
                open: b.open(),
                high: b.high(),
                low: b.low(),
                close: b.close(),
                volume: b.volume(),
            })
            .collect();
        Self::new(converted)
    }

    #[inline]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Timestamp at `index`, or the index itself past the end
    #[inline]
    pub fn timestamp_at(&self, index: usize) -> i64 {
        self.bars
            .get(index)
            .map(|b| b.timestamp)
            .unwrap_or(index as i64)
    }

    /// Bars `[0, end)` as a new series (already validated)
    pub fn head(&self, end: usize) -> Series {
        Series {
            bars: self.bars[..end.min(self.bars.len())].to_vec(),
        }
    }

    /// Fail with `InsufficientData` unless at least `need` bars are present
    pub fn require(&self, need: usize) -> Result<()> {
        if self.bars.len() < need {
            return Err(PatternError::InsufficientData {
                need,
                got: self.bars.len(),
            });
        }
        Ok(())
    }
}

// ============================================================
// DIRECTION / TREND
// ============================================================

/// Directional bias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "NONE")]
    Neutral,
}

impl Direction {
    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, Direction::Up)
    }

    #[inline]
    pub fn is_down(self) -> bool {
        matches!(self, Direction::Down)
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Neutral => Direction::Neutral,
        }
    }

    /// Sign of a net change
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Direction::Up
        } else if change < 0.0 {
            Direction::Down
        } else {
            Direction::Neutral
        }
    }
}

/// Market trend classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    StrongUp,
    WeakUp,
    #[default]
    Sideways,
    WeakDown,
    StrongDown,
}

impl Trend {
    #[inline]
    pub fn is_down(self) -> bool {
        matches!(self, Trend::WeakDown | Trend::StrongDown)
    }

    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, Trend::WeakUp | Trend::StrongUp)
    }

    #[inline]
    pub fn is_strong(self) -> bool {
        matches!(self, Trend::StrongUp | Trend::StrongDown)
    }

    pub fn direction(self) -> Direction {
        if self.is_up() {
            Direction::Up
        } else if self.is_down() {
            Direction::Down
        } else {
            Direction::Neutral
        }
    }
}

// ============================================================
// MARKET CONTEXT
// ============================================================

/// Market context at a specific bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketContext {
    pub trend: Trend,
    /// Average true range over the trend period
    pub volatility: f64,
    pub avg_volume: f64,
    /// High-low range of the latest block divided by the range of the block
    /// before it. Below 1.0 means the market is compressing.
    pub compression: f64,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            trend: Trend::Sideways,
            volatility: 0.0,
            avg_volume: 0.0,
            compression: 1.0,
        }
    }
}

/// Provider of market context - precomputes context for all bars
pub trait ContextProvider: Send + Sync {
    fn compute_all(&self, series: &Series) -> Vec<MarketContext>;
}

/// Default context provider using trailing windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultContextProvider {
    pub trend_period: Period,
    pub volume_period: Period,
    pub compression_period: Period,
}

impl Default for DefaultContextProvider {
    fn default() -> Self {
        Self {
            trend_period: Period::new_const(14),
            volume_period: Period::new_const(20),
            compression_period: Period::new_const(10),
        }
    }
}

impl ContextProvider for DefaultContextProvider {
    fn compute_all(&self, series: &Series) -> Vec<MarketContext> {
        let atr = pivots::average_true_range(series, self.trend_period);
        (0..series.len())
            .map(|i| MarketContext {
                trend: self.compute_trend(series, i),
                volatility: atr[i],
                avg_volume: self.compute_avg_volume(series, i),
                compression: self.compute_compression(series, i),
            })
            .collect()
    }
}

impl DefaultContextProvider {
    fn compute_trend(&self, series: &Series, index: usize) -> Trend {
        let period = self.trend_period.get();
        if index < period {
            return Trend::Sideways;
        }

        let bars = series.bars();
        let first_close = bars[index - period].close;
        let last_close = bars[index].close;

        if first_close <= f64::EPSILON {
            return Trend::Sideways;
        }

        let change = (last_close - first_close) / first_close;

        match change {
            c if c > 0.05 => Trend::StrongUp,
            c if c > 0.02 => Trend::WeakUp,
            c if c < -0.05 => Trend::StrongDown,
            c if c < -0.02 => Trend::WeakDown,
            _ => Trend::Sideways,
        }
    }

    fn compute_avg_volume(&self, series: &Series, index: usize) -> f64 {
        let start = index.saturating_sub(self.volume_period.get() - 1);
        let slice = &series.bars()[start..=index];
        slice.iter().map(|b| b.volume).sum::<f64>() / slice.len() as f64
    }

    fn compute_compression(&self, series: &Series, index: usize) -> f64 {
        let period = self.compression_period.get();
        if index + 1 < 2 * period {
            return 1.0;
        }
        let bars = series.bars();
        let block_range = |from: usize, to: usize| {
            let hi = bars[from..to].iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let lo = bars[from..to].iter().map(|b| b.low).fold(f64::MAX, f64::min);
            hi - lo
        };
        let recent = block_range(index + 1 - period, index + 1);
        let prior = block_range(index + 1 - 2 * period, index + 1 - period);
        if prior <= f64::EPSILON {
            return 1.0;
        }
        recent / prior
    }
}

// ============================================================
// PATTERN MODEL
// ============================================================

/// Named chart pattern types
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    HeadAndShouldersTop,
    HeadAndShouldersBottom,
    DoubleTop,
    DoubleBottom,
    SymmetricTriangle,
    AscendingTriangle,
    DescendingTriangle,
    BullFlag,
    BearFlag,
    BullPennant,
    BearPennant,
}

impl PatternType {
    /// Short code used in pattern ids
    pub fn code(self) -> &'static str {
        match self {
            PatternType::HeadAndShouldersTop => "HS_TOP",
            PatternType::HeadAndShouldersBottom => "HS_BOTTOM",
            PatternType::DoubleTop => "DOUBLE_TOP",
            PatternType::DoubleBottom => "DOUBLE_BOTTOM",
            PatternType::SymmetricTriangle => "SYM_TRIANGLE",
            PatternType::AscendingTriangle => "ASC_TRIANGLE",
            PatternType::DescendingTriangle => "DESC_TRIANGLE",
            PatternType::BullFlag => "BULL_FLAG",
            PatternType::BearFlag => "BEAR_FLAG",
            PatternType::BullPennant => "BULL_PENNANT",
            PatternType::BearPennant => "BEAR_PENNANT",
        }
    }

    pub fn category(self) -> PatternCategory {
        match self {
            PatternType::HeadAndShouldersTop
            | PatternType::HeadAndShouldersBottom
            | PatternType::DoubleTop
            | PatternType::DoubleBottom => PatternCategory::Reversal,
            _ => PatternCategory::Continuation,
        }
    }

    /// Direction the pattern typically resolves in
    pub fn typical_direction(self) -> Direction {
        match self {
            PatternType::HeadAndShouldersTop
            | PatternType::DoubleTop
            | PatternType::DescendingTriangle
            | PatternType::BearFlag
            | PatternType::BearPennant => Direction::Down,
            PatternType::HeadAndShouldersBottom
            | PatternType::DoubleBottom
            | PatternType::AscendingTriangle
            | PatternType::BullFlag
            | PatternType::BullPennant => Direction::Up,
            PatternType::SymmetricTriangle => Direction::Neutral,
        }
    }
}

/// Pattern category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatternCategory {
    Reversal,
    Continuation,
}

/// A control point of a geometry line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryPoint {
    pub index: usize,
    pub timestamp: i64,
    pub price: f64,
}

/// Named geometry lines, e.g. "neckline" -> control points
pub type Geometry = BTreeMap<String, Vec<GeometryPoint>>;

/// A detected chart pattern.
///
/// Only the detector that produced a pattern advances its lifecycle and
/// score; callers see it read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pattern_id: String,
    pattern_type: PatternType,
    category: PatternCategory,
    score: f64,
    direction_bias: Direction,
    start_index: usize,
    end_index: usize,
    context_index: usize,
    pivots: Vec<pivots::Pivot>,
    lines: Geometry,
    scoring_breakdown: BTreeMap<String, f64>,
    levels: lifecycle::Levels,
    lifecycle: lifecycle::Lifecycle,
    height: f64,
    evidence: scoring::GeometryEvidence,
}

impl Pattern {
    pub(crate) fn new(
        pattern_type: PatternType,
        pivots: Vec<pivots::Pivot>,
        context_index: usize,
        levels: lifecycle::Levels,
        height: f64,
        evidence: scoring::GeometryEvidence,
    ) -> Self {
        let start_index = pivots.first().map(|p| p.index).unwrap_or(0);
        let end_index = pivots.last().map(|p| p.index).unwrap_or(start_index);
        Self {
            pattern_id: format!("{}-{}-{}", pattern_type.code(), start_index, end_index),
            pattern_type,
            category: pattern_type.category(),
            score: 0.0,
            direction_bias: pattern_type.typical_direction(),
            start_index,
            end_index,
            context_index,
            pivots,
            lines: Geometry::new(),
            scoring_breakdown: BTreeMap::new(),
            levels,
            lifecycle: lifecycle::Lifecycle::new(end_index),
            height,
            evidence,
        }
    }

    pub fn id(&self) -> &str {
        &self.pattern_id
    }

    pub fn pattern_type(&self) -> PatternType {
        self.pattern_type
    }

    pub fn category(&self) -> PatternCategory {
        self.category
    }

    pub fn state(&self) -> lifecycle::PatternState {
        self.lifecycle.state
    }

    /// Quality score in 0..=100
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn direction_bias(&self) -> Direction {
        self.direction_bias
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn end_index(&self) -> usize {
        self.end_index
    }

    /// Bar whose market context feeds the context score
    pub fn context_index(&self) -> usize {
        self.context_index
    }

    pub fn pivots(&self) -> &[pivots::Pivot] {
        &self.pivots
    }

    pub fn lines(&self) -> &Geometry {
        &self.lines
    }

    pub fn scoring_breakdown(&self) -> &BTreeMap<String, f64> {
        &self.scoring_breakdown
    }

    pub fn levels(&self) -> &lifecycle::Levels {
        &self.levels
    }

    pub fn lifecycle(&self) -> &lifecycle::Lifecycle {
        &self.lifecycle
    }

    /// Pattern height used for the target projection
    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn evidence(&self) -> &scoring::GeometryEvidence {
        &self.evidence
    }

    /// Pattern height projected beyond the breakout level.
    ///
    /// Uses the observed breakout when there is one, otherwise the
    /// boundary on the bias side. `None` when no direction is known.
    pub fn target(&self) -> Option<f64> {
        let (direction, index) = match self.lifecycle.breakout {
            Some(b) => (b.direction, b.index),
            None => (self.direction_bias, self.end_index),
        };
        let level = match direction {
            Direction::Up => self.levels.upper?.value_at(index),
            Direction::Down => self.levels.lower?.value_at(index),
            Direction::Neutral => return None,
        };
        Some(match direction {
            Direction::Up => level + self.height,
            _ => level - self.height,
        })
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: lifecycle::Lifecycle) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn set_lines(&mut self, lines: Geometry) {
        self.lines = lines;
    }

    pub(crate) fn set_score(&mut self, breakdown: &scoring::ScoreBreakdown) {
        self.score = breakdown.total();
        self.scoring_breakdown = breakdown.to_map();
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Everything a detector may look at besides the pivots
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub series: &'a Series,
    pub contexts: &'a [MarketContext],
    /// Closes beyond a breakout line required to confirm
    pub confirm_bars: usize,
}

impl<'a> DetectionContext<'a> {
    pub fn new(series: &'a Series, contexts: &'a [MarketContext], confirm_bars: usize) -> Self {
        Self {
            series,
            contexts,
            confirm_bars,
        }
    }

    #[inline]
    pub fn context_at(&self, index: usize) -> MarketContext {
        self.contexts.get(index).copied().unwrap_or_default()
    }
}

/// Pattern detector: a pure classifier over a sliding window of pivots
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pattern types this detector can emit
    fn pattern_types(&self) -> &'static [PatternType];

    /// Number of consecutive pivots per candidate window
    fn window(&self) -> usize;

    fn detect(&self, pivots: &[pivots::Pivot], ctx: &DetectionContext<'_>) -> Vec<Pattern>;

    fn score(&self, pattern: &Pattern, ctx: &DetectionContext<'_>) -> scoring::ScoreBreakdown {
        scoring::score(pattern, &ctx.context_at(pattern.context_index()))
    }

    fn geometry(&self, pattern: &Pattern, ctx: &DetectionContext<'_>) -> Geometry;

    /// Replay bars that arrived after the last evaluation and re-score
    fn update(&self, pattern: &Pattern, ctx: &DetectionContext<'_>) -> Pattern {
        detectors::helpers::refresh(self, pattern.clone(), ctx)
    }

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - fast path via enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect(
                &self,
                pivots: &[pivots::Pivot],
                ctx: &DetectionContext<'_>,
            ) -> Vec<Pattern> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, pivots, ctx)),*
                }
            }

            pub fn score(
                &self,
                pattern: &Pattern,
                ctx: &DetectionContext<'_>,
            ) -> scoring::ScoreBreakdown {
                match self {
                    $(Self::$variant(d) => PatternDetector::score(d, pattern, ctx)),*
                }
            }

            pub fn geometry(&self, pattern: &Pattern, ctx: &DetectionContext<'_>) -> Geometry {
                match self {
                    $(Self::$variant(d) => PatternDetector::geometry(d, pattern, ctx)),*
                }
            }

            pub fn update(&self, pattern: &Pattern, ctx: &DetectionContext<'_>) -> Pattern {
                match self {
                    $(Self::$variant(d) => PatternDetector::update(d, pattern, ctx)),*
                }
            }

            #[inline]
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(d) => PatternDetector::name(d)),*
                }
            }

            #[inline]
            pub fn pattern_types(&self) -> &'static [PatternType] {
                match self {
                    $(Self::$variant(d) => PatternDetector::pattern_types(d)),*
                }
            }

            #[inline]
            pub fn window(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::window(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Reversal
    HeadAndShoulders(HeadAndShouldersDetector),
    Double(DoubleDetector),

    // Continuation
    Triangle(TriangleDetector),
    Flag(FlagDetector),
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Output filters
#[derive(Debug, Clone, Default)]
pub struct EngineFilter {
    pub min_score: Option<f64>,
    pub pattern_filter: Option<Vec<PatternType>>,
}

/// Main analysis engine
pub struct PatternEngine<C: ContextProvider = DefaultContextProvider> {
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn PatternDetector>>,
    context_provider: C,
    config: config::AnalysisConfig,
    filter: EngineFilter,
}

impl<C: ContextProvider> PatternEngine<C> {
    pub fn config(&self) -> &config::AnalysisConfig {
        &self.config
    }

    // ===========================================
    // LOW-LEVEL: Primitives
    // ===========================================

    /// Precompute contexts for all bars.
    #[inline]
    pub fn compute_contexts(&self, series: &Series) -> Vec<MarketContext> {
        self.context_provider.compute_all(series)
    }

    /// Smoothed (never normalized) scalar series used for pivot extraction
    pub fn prepare(&self, series: &Series) -> Result<Vec<f64>> {
        preprocess::prepare(series, &self.config.prepare.smoothing, false)
    }

    /// Swing pivots on the prepared series
    pub fn pivots(&self, series: &Series) -> Result<Vec<pivots::Pivot>> {
        let values = self.prepare(series)?;
        pivots::detect_pivots_on(
            &values,
            series,
            &self.config.pivots.threshold,
            self.config.pivots.min_distance,
        )
    }

    // ===========================================
    // MID-LEVEL: Detection over precomputed inputs
    // ===========================================

    /// Run every detector over precomputed pivots and contexts.
    pub fn detect_with(
        &self,
        series: &Series,
        pivots: &[pivots::Pivot],
        contexts: &[MarketContext],
    ) -> Vec<Pattern> {
        let ctx = DetectionContext::new(series, contexts, self.config.confirm_bars);
        let mut results = Vec::new();

        // Fast path: builtin detectors (enum dispatch, no vtable)
        for detector in &self.builtin {
            if pivots.len() < detector.window() {
                continue;
            }
            let found = detector.detect(pivots, &ctx);
            debug!(detector = detector.name(), candidates = found.len(), "detector pass");
            results.extend(found.into_iter().filter(|p| self.should_include(p)));
        }

        // Slow path: custom detectors (vtable)
        for detector in &self.custom {
            if pivots.len() < detector.window() {
                continue;
            }
            let found = detector.detect(pivots, &ctx);
            debug!(detector = detector.name(), candidates = found.len(), "custom detector pass");
            results.extend(found.into_iter().filter(|p| self.should_include(p)));
        }

        results
    }

    // ===========================================
    // HIGH-LEVEL: Full pipelines
    // ===========================================

    /// Named-pattern branch: prepare -> pivots -> detectors -> scorer.
    pub fn detect(&self, series: &Series) -> Result<Vec<Pattern>> {
        let pivots = self.pivots(series)?;
        if pivots.is_empty() {
            return Ok(Vec::new());
        }
        let contexts = self.compute_contexts(series);
        Ok(self.detect_with(series, &pivots, &contexts))
    }

    /// Advance a pattern with bars that arrived since it was last evaluated.
    ///
    /// Patterns whose type no registered detector owns are returned as-is.
    pub fn refresh(&self, pattern: &Pattern, series: &Series) -> Pattern {
        let contexts = self.compute_contexts(series);
        let ctx = DetectionContext::new(series, &contexts, self.config.confirm_bars);
        let kind = pattern.pattern_type();

        if let Some(d) = self
            .builtin
            .iter()
            .find(|d| d.pattern_types().contains(&kind))
        {
            return d.update(pattern, &ctx);
        }
        if let Some(d) = self
            .custom
            .iter()
            .find(|d| d.pattern_types().contains(&kind))
        {
            return d.update(pattern, &ctx);
        }
        pattern.clone()
    }

    /// Discovery phase: build the immutable historical-window snapshot.
    pub fn discover(&self, series: &Series) -> Result<similarity::WindowLibrary> {
        similarity::WindowLibrary::discover(series, &self.config.prepare, &self.config.similarity)
    }

    /// Similarity branch: match the latest window against `library`.
    pub fn forecast<'a>(
        &self,
        library: &'a similarity::WindowLibrary,
        series: &Series,
    ) -> Result<forecast::ForecastReport<'a>> {
        let query = similarity::QueryWindow::latest(series, library.prepare(), library.config())?;
        Ok(forecast::ForecastReport::new(
            &query,
            library.search(&query),
            self.config.forecast_top_n,
        ))
    }

    /// Both branches, converged into the export record.
    pub fn analyze(
        &self,
        series: &Series,
        library: Option<&similarity::WindowLibrary>,
    ) -> Result<export::AnalysisReport> {
        let patterns = self.detect(series)?;
        let forecast = match library {
            Some(lib) => Some(export::ForecastRecord::from(&self.forecast(lib, series)?)),
            None => None,
        };
        Ok(export::AnalysisReport::new(&patterns, forecast))
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn should_include(&self, p: &Pattern) -> bool {
        if let Some(min) = self.filter.min_score {
            if p.score() < min {
                return false;
            }
        }
        if let Some(ref filter) = self.filter.pattern_filter {
            if !filter.contains(&p.pattern_type()) {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<()> {
        self.config.validate()?;
        for d in &self.builtin {
            d.validate_config()?;
        }
        for d in &self.custom {
            d.validate_config()?;
        }
        Ok(())
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
pub struct EngineBuilder<C: ContextProvider = DefaultContextProvider> {
    context_provider: C,
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn PatternDetector>>,
    config: config::AnalysisConfig,
    filter: EngineFilter,
}

impl Default for EngineBuilder<DefaultContextProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder<DefaultContextProvider> {
    pub fn new() -> Self {
        Self::from_config(config::AnalysisConfig::default())
    }

    /// Start from an explicit configuration. Detector tolerances added via
    /// `with_all_defaults` are taken from it.
    pub fn from_config(config: config::AnalysisConfig) -> Self {
        Self {
            context_provider: DefaultContextProvider::default(),
            builtin: Vec::new(),
            custom: Vec::new(),
            config,
            filter: EngineFilter::default(),
        }
    }
}

impl<C: ContextProvider> EngineBuilder<C> {
    /// Change context provider
    pub fn context_provider<C2: ContextProvider>(self, provider: C2) -> EngineBuilder<C2> {
        EngineBuilder {
            context_provider: provider,
            builtin: self.builtin,
            custom: self.custom,
            config: self.config,
            filter: self.filter,
        }
    }

    /// Add every builtin detector, parameterized from the configuration
    pub fn with_all_defaults(self) -> Self {
        self.with_reversal_defaults().with_continuation_defaults()
    }

    /// Head & Shoulders and Double Top/Bottom
    pub fn with_reversal_defaults(mut self) -> Self {
        self.builtin.extend([
            BuiltinDetector::HeadAndShoulders(self.config.head_and_shoulders.clone()),
            BuiltinDetector::Double(self.config.double.clone()),
        ]);
        self
    }

    /// Triangles and Flags/Pennants
    pub fn with_continuation_defaults(mut self) -> Self {
        self.builtin.extend([
            BuiltinDetector::Triangle(self.config.triangle.clone()),
            BuiltinDetector::Flag(self.config.flag.clone()),
        ]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Add a custom detector (slow path)
    pub fn add_custom<D: PatternDetector + 'static>(mut self, detector: D) -> Self {
        self.custom.push(Box::new(detector));
        self
    }

    /// Set minimum score filter
    pub fn min_score(mut self, score: f64) -> Self {
        self.filter.min_score = Some(score);
        self
    }

    /// Filter to specific pattern types only
    pub fn only_patterns(mut self, types: impl IntoIterator<Item = PatternType>) -> Self {
        self.filter.pattern_filter = Some(types.into_iter().collect());
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine<C>> {
        let engine = PatternEngine {
            builtin: self.builtin,
            custom: self.custom,
            context_provider: self.context_provider,
            config: self.config,
            filter: self.filter,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub patterns: Vec<Pattern>,
}

/// Error from scanning a single instrument
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub error: PatternError,
}

/// Parallel pattern detection over many instruments
pub fn scan_parallel<'a, I, C>(
    engine: &PatternEngine<C>,
    instruments: I,
) -> (Vec<ScanResult>, Vec<ScanError>)
where
    I: IntoParallelIterator<Item = (&'a str, &'a Series)>,
    C: ContextProvider + Sync,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, series)| {
            engine
                .detect(series)
                .map(|patterns| ScanResult {
                    symbol: symbol.to_string(),
                    patterns,
                })
                .map_err(|error| ScanError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TYPE ALIASES
// ============================================================

/// Default engine with DefaultContextProvider
pub type DefaultEngine = PatternEngine<DefaultContextProvider>;

// ============================================================
// TESTS
// ============================================================
