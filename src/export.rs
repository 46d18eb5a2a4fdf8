//! Read-only snapshot records handed to downstream consumers.
//!
//! Records own their data, so they outlive the engine, the series and the
//! window library they were built from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::forecast::ForecastReport;
use crate::lifecycle::PatternState;
use crate::pivots::Pivot;
use crate::similarity::SimilarityMatch;
use crate::{Direction, Geometry, Pattern, PatternCategory, PatternError, PatternType, Result};

/// One detected pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub pattern_id: String,
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub category: PatternCategory,
    pub state: PatternState,
    pub score: f64,
    pub direction_bias: Direction,
    pub start_index: usize,
    pub end_index: usize,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub pivots: Vec<Pivot>,
    pub lines: Geometry,
    pub scoring_breakdown: BTreeMap<String, f64>,
    /// Breakout bar, when one was observed
    pub breakout_index: Option<usize>,
    pub target: Option<f64>,
}

impl From<&Pattern> for PatternRecord {
    fn from(p: &Pattern) -> Self {
        let pivots = p.pivots().to_vec();
        let start_timestamp = pivots.first().map(|pv| pv.timestamp).unwrap_or_default();
        let end_timestamp = pivots.last().map(|pv| pv.timestamp).unwrap_or(start_timestamp);
        Self {
            pattern_id: p.id().to_string(),
            pattern_type: p.pattern_type(),
            category: p.category(),
            state: p.state(),
            score: p.score(),
            direction_bias: p.direction_bias(),
            start_index: p.start_index(),
            end_index: p.end_index(),
            start_timestamp,
            end_timestamp,
            pivots,
            lines: p.lines().clone(),
            scoring_breakdown: p.scoring_breakdown().clone(),
            breakout_index: p.lifecycle().breakout.map(|b| b.index),
            target: p.target(),
        }
    }
}

/// One ranked reference window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub reference_start: usize,
    pub reference_end: usize,
    pub reference_start_timestamp: i64,
    pub reference_end_timestamp: i64,
    pub distance: f64,
    pub confidence: f64,
    pub expected_move_pct: f64,
    pub expected_price: f64,
}

impl From<&SimilarityMatch<'_>> for MatchRecord {
    fn from(m: &SimilarityMatch<'_>) -> Self {
        Self {
            reference_start: m.reference.start_index,
            reference_end: m.reference.end_index,
            reference_start_timestamp: m.reference.start_timestamp,
            reference_end_timestamp: m.reference.end_timestamp,
            distance: m.distance,
            confidence: m.confidence,
            expected_move_pct: m.expected_move_pct,
            expected_price: m.expected_price,
        }
    }
}

/// One similarity query with its aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub query_start: usize,
    pub query_end: usize,
    pub query_start_timestamp: i64,
    pub query_end_timestamp: i64,
    pub metric: String,
    pub matches: Vec<MatchRecord>,
    pub average_confidence: f64,
    pub expected_move_pct: f64,
    pub move_std: f64,
    pub forecast_interval: (f64, f64),
    pub expected_price: Option<f64>,
}

impl From<&ForecastReport<'_>> for ForecastRecord {
    fn from(r: &ForecastReport<'_>) -> Self {
        Self {
            query_start: r.query_start,
            query_end: r.query_end,
            query_start_timestamp: r.query_start_timestamp,
            query_end_timestamp: r.query_end_timestamp,
            metric: r.metric.to_string(),
            matches: r.matches.iter().map(MatchRecord::from).collect(),
            average_confidence: r.aggregate.average_confidence,
            expected_move_pct: r.aggregate.expected_move_pct,
            move_std: r.aggregate.move_std,
            forecast_interval: r.aggregate.forecast_interval,
            expected_price: r.expected_price(),
        }
    }
}

/// Both analysis branches for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub patterns: Vec<PatternRecord>,
    pub forecast: Option<ForecastRecord>,
}

impl AnalysisReport {
    pub fn new(patterns: &[Pattern], forecast: Option<ForecastRecord>) -> Self {
        Self {
            patterns: patterns.iter().map(PatternRecord::from).collect(),
            forecast,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PatternError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PatternError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{HistoricalWindow, QueryWindow};

    fn window() -> HistoricalWindow {
        HistoricalWindow {
            start_index: 40,
            end_index: 69,
            start_timestamp: 4_000,
            end_timestamp: 6_900,
            values: vec![0.0, 1.0],
            direction: Direction::Up,
            forward_returns: Vec::new(),
            pivot_count: 4,
        }
    }

    #[test]
    fn test_forecast_record() {
        let w = window();
        let m = SimilarityMatch {
            reference: &w,
            distance: 0.25,
            confidence: 80.0,
            expected_move_pct: 2.0,
            expected_price: 51.0,
        };
        let query = QueryWindow::new(vec![0.0, 1.0], 100, 50.0);
        let report = ForecastReport::new(&query, vec![m], 5);
        let record = ForecastRecord::from(&report);

        assert_eq!(record.metric, "dtw");
        assert_eq!(record.query_start, 100);
        assert_eq!(record.query_end, 101);
        assert_eq!(record.matches.len(), 1);
        assert_eq!(record.matches[0].reference_start, 40);
        assert_eq!(record.matches[0].reference_end_timestamp, 6_900);
        assert!((record.expected_price.unwrap() - 51.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_json() {
        let report = AnalysisReport::new(&[], None);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"patterns\""));
        assert_eq!(AnalysisReport::from_json(&json).unwrap(), report);
        assert!(matches!(
            AnalysisReport::from_json("{"),
            Err(PatternError::Serialization(_))
        ));
    }
}
