//! Double Top / Double Bottom

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::*;
use crate::lifecycle::{Invalidation, Levels, Line};
use crate::params::{get_ratio, ParamMeta, ParamType, ParameterizedDetector};
use crate::pivots::Pivot;
use crate::scoring::GeometryEvidence;
use crate::{DetectionContext, Geometry, Pattern, PatternDetector, PatternType, Ratio, Result};

static DOUBLE_PARAMS: &[ParamMeta] = &[
    ParamMeta {
        name: "peak_tolerance",
        param_type: ParamType::Ratio,
        default: 0.015,
        range: (0.005, 0.05, 0.005),
        description: "Maximum relative difference between the two peaks",
    },
    ParamMeta {
        name: "min_depth",
        param_type: ParamType::Ratio,
        default: 0.03,
        range: (0.01, 0.2, 0.01),
        description: "Minimum trough depth relative to the peak average",
    },
];

/// Peak-Trough-Peak (Top) or Trough-Peak-Trough (Bottom)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleDetector {
    pub peak_tolerance: Ratio,
    pub min_depth: Ratio,
}

impl Default for DoubleDetector {
    fn default() -> Self {
        Self {
            peak_tolerance: Ratio::new_const(0.015),
            min_depth: Ratio::new_const(0.03),
        }
    }
}

impl DoubleDetector {
    fn candidate(&self, w: &[Pivot]) -> Option<Candidate> {
        let [first, middle, second] = w else {
            return None;
        };
        if !alternates(w) {
            return None;
        }
        let top = first.is_high();

        let peak_diff = relative_diff(first.price, second.price);
        if peak_diff >= self.peak_tolerance.get() {
            return None;
        }
        let peak_avg = (first.price + second.price) / 2.0;
        if peak_avg.abs() <= f64::EPSILON {
            return None;
        }
        let height = if top {
            peak_avg - middle.price
        } else {
            middle.price - peak_avg
        };
        let depth = height / peak_avg.abs();
        if depth <= self.min_depth.get() {
            return None;
        }

        let level = Line::horizontal(middle.index, middle.price);
        let (pattern_type, levels) = if top {
            (
                PatternType::DoubleTop,
                Levels {
                    upper: None,
                    lower: Some(level),
                    invalidation: Some(Invalidation::Above(first.price.max(second.price))),
                },
            )
        } else {
            (
                PatternType::DoubleBottom,
                Levels {
                    upper: Some(level),
                    lower: None,
                    invalidation: Some(Invalidation::Below(first.price.min(second.price))),
                },
            )
        };

        // Equal legs on both sides of the middle pivot
        let left = (middle.index - first.index) as f64;
        let right = (second.index - middle.index) as f64;
        let balance = left.min(right) / left.max(right);

        Some(Candidate {
            pattern_type,
            pivots: w.to_vec(),
            context_index: first.index,
            levels,
            height,
            evidence: GeometryEvidence::new(
                tolerance_quality(peak_diff, self.peak_tolerance.get()),
                balance,
                ratio_quality(depth, self.min_depth.get()),
                [0.4, 0.2, 0.4],
            ),
        })
    }
}

impl PatternDetector for DoubleDetector {
    fn name(&self) -> &'static str {
        "double_top_bottom"
    }

    fn pattern_types(&self) -> &'static [PatternType] {
        &[PatternType::DoubleTop, PatternType::DoubleBottom]
    }

    fn window(&self) -> usize {
        3
    }

    fn detect(&self, pivots: &[Pivot], ctx: &DetectionContext<'_>) -> Vec<Pattern> {
        pivots
            .windows(self.window())
            .filter_map(|w| self.candidate(w))
            .map(|c| c.finalize(self, ctx))
            .collect()
    }

    fn geometry(&self, pattern: &Pattern, ctx: &DetectionContext<'_>) -> Geometry {
        let levels = pattern.levels();
        let lines = levels.lower.or(levels.upper).map(|line| {
            (
                "confirmation",
                line_points(&line, pattern.start_index(), line_end(pattern), ctx),
            )
        });
        geometry_with(pattern, lines)
    }

    fn validate_config(&self) -> Result<()> {
        self.validate_params()
    }
}

impl ParameterizedDetector for DoubleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            peak_tolerance: get_ratio(params, "peak_tolerance", 0.015)?,
            min_depth: get_ratio(params, "min_depth", 0.03)?,
        })
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("peak_tolerance", self.peak_tolerance.get()),
            ("min_depth", self.min_depth.get()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PatternState;
    use crate::pivots::PivotKind;
    use crate::test_support::series_from_closes;
    use crate::MarketContext;

    fn pivot(index: usize, kind: PivotKind, price: f64) -> Pivot {
        Pivot {
            index,
            kind,
            price,
            timestamp: index as i64,
        }
    }

    fn detect(pivots: &[Pivot], closes: &[f64]) -> Vec<Pattern> {
        let series = series_from_closes(closes);
        let contexts = vec![MarketContext::default(); series.len()];
        let ctx = DetectionContext::new(&series, &contexts, 1);
        DoubleDetector::default().detect(pivots, &ctx)
    }

    fn top(second: f64) -> Vec<Pivot> {
        vec![
            pivot(5, PivotKind::High, 100.0),
            pivot(15, PivotKind::Low, 90.0),
            pivot(25, PivotKind::High, second),
        ]
    }

    #[test]
    fn test_double_top() {
        let mut closes = vec![95.0; 30];
        closes[28] = 89.0;
        let patterns = detect(&top(100.5), &closes);
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.pattern_type(), PatternType::DoubleTop);
        assert_eq!(p.state(), PatternState::Confirmed);
        assert!((p.evidence().fit - 1.0).abs() < 1e-12);
        assert!(p.lines().contains_key("confirmation"));
    }

    #[test]
    fn test_peaks_five_percent_apart_rejected() {
        assert!(detect(&top(105.0), &[95.0; 30]).is_empty());
    }

    #[test]
    fn test_out_of_order_pivots_rejected() {
        let pivots = vec![
            pivot(25, PivotKind::High, 100.0),
            pivot(15, PivotKind::Low, 90.0),
            pivot(5, PivotKind::High, 100.5),
        ];
        assert!(detect(&pivots, &[95.0; 30]).is_empty());
    }

    #[test]
    fn test_shallow_trough_rejected() {
        let pivots = vec![
            pivot(5, PivotKind::High, 100.0),
            pivot(15, PivotKind::Low, 98.0),
            pivot(25, PivotKind::High, 100.0),
        ];
        assert!(detect(&pivots, &[99.0; 30]).is_empty());
    }

    #[test]
    fn test_double_bottom() {
        let pivots = vec![
            pivot(5, PivotKind::Low, 50.0),
            pivot(10, PivotKind::High, 55.0),
            pivot(20, PivotKind::Low, 50.2),
        ];
        let patterns = detect(&pivots, &[52.0; 25]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type(), PatternType::DoubleBottom);
        assert_eq!(patterns[0].state(), PatternState::Forming);
        assert!((patterns[0].evidence().fit - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_not_alternating_rejected() {
        let pivots = vec![
            pivot(5, PivotKind::High, 100.0),
            pivot(15, PivotKind::High, 90.0),
            pivot(25, PivotKind::High, 100.0),
        ];
        assert!(detect(&pivots, &[95.0; 30]).is_empty());
    }
}
