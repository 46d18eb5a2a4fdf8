//! Forecast aggregation over ranked similarity matches.

use crate::similarity::{DtwMetric, QueryWindow, SimilarityMatch};

/// Confidence-weighted summary of the top-N matches
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastAggregate<'a> {
    pub average_confidence: f64,
    /// Weighted mean of the matches' expected moves, percent
    pub expected_move_pct: f64,
    /// Sample standard deviation of the unweighted expected moves
    pub move_std: f64,
    /// `expected_move_pct ± 2 * move_std`
    pub forecast_interval: (f64, f64),
    /// Normalized confidence weights, aligned with `matches`
    pub weights: Vec<f64>,
    pub matches: Vec<SimilarityMatch<'a>>,
}

impl<'a> ForecastAggregate<'a> {
    /// Sentinel for a query without matches
    pub fn empty() -> Self {
        Self {
            average_confidence: 0.0,
            expected_move_pct: 0.0,
            move_std: 0.0,
            forecast_interval: (0.0, 0.0),
            weights: Vec::new(),
            matches: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Fold the first `top_n` of `matches` (already ranked) into one estimate.
///
/// Weights are the matches' confidences renormalized to sum to 1; when every
/// confidence is zero the weights fall back to uniform.
pub fn aggregate<'a>(matches: &[SimilarityMatch<'a>], top_n: usize) -> ForecastAggregate<'a> {
    let top: Vec<SimilarityMatch<'a>> = matches.iter().take(top_n).copied().collect();
    if top.is_empty() {
        return ForecastAggregate::empty();
    }
    let n = top.len() as f64;

    let total: f64 = top.iter().map(|m| m.confidence.max(0.0)).sum();
    let weights: Vec<f64> = if total > 0.0 && total.is_finite() {
        top.iter().map(|m| m.confidence.max(0.0) / total).collect()
    } else {
        vec![1.0 / n; top.len()]
    };

    let expected_move_pct: f64 = top
        .iter()
        .zip(&weights)
        .map(|(m, w)| m.expected_move_pct * w)
        .sum();

    let move_std = if top.len() > 1 {
        let mean = top.iter().map(|m| m.expected_move_pct).sum::<f64>() / n;
        let var = top
            .iter()
            .map(|m| (m.expected_move_pct - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        var.sqrt()
    } else {
        0.0
    };

    ForecastAggregate {
        average_confidence: top.iter().map(|m| m.confidence).sum::<f64>() / n,
        expected_move_pct,
        move_std,
        forecast_interval: (
            expected_move_pct - 2.0 * move_std,
            expected_move_pct + 2.0 * move_std,
        ),
        weights,
        matches: top,
    }
}

/// Result of one similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastReport<'a> {
    pub query_start: usize,
    pub query_end: usize,
    pub query_start_timestamp: i64,
    pub query_end_timestamp: i64,
    pub metric: &'static str,
    pub last_price: f64,
    /// All ranked matches (up to top-K)
    pub matches: Vec<SimilarityMatch<'a>>,
    pub aggregate: ForecastAggregate<'a>,
}

impl<'a> ForecastReport<'a> {
    pub fn new(query: &QueryWindow, matches: Vec<SimilarityMatch<'a>>, top_n: usize) -> Self {
        let aggregate = aggregate(&matches, top_n);
        Self {
            query_start: query.start_index,
            query_end: query.end_index,
            query_start_timestamp: query.start_timestamp,
            query_end_timestamp: query.end_timestamp,
            metric: DtwMetric::NAME,
            last_price: query.last_price,
            matches,
            aggregate,
        }
    }

    /// Last price moved by the aggregate expected move, if any match exists
    pub fn expected_price(&self) -> Option<f64> {
        (!self.aggregate.is_empty())
            .then(|| self.last_price * (1.0 + self.aggregate.expected_move_pct / 100.0))
    }
}
