//! Head & Shoulders (Top and Bottom)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::*;
use crate::lifecycle::{Invalidation, Levels, Line};
use crate::params::{get_ratio, ParamMeta, ParamType, ParameterizedDetector};
use crate::pivots::Pivot;
use crate::scoring::GeometryEvidence;
use crate::{DetectionContext, Geometry, Pattern, PatternDetector, PatternType, Ratio, Result};

static HEAD_AND_SHOULDERS_PARAMS: &[ParamMeta] = &[
    ParamMeta {
        name: "min_prominence",
        param_type: ParamType::Ratio,
        default: 0.03,
        range: (0.005, 0.2, 0.005),
        description: "Minimum head excess over the higher shoulder, relative to shoulder average",
    },
    ParamMeta {
        name: "shoulder_tolerance",
        param_type: ParamType::Ratio,
        default: 0.02,
        range: (0.005, 0.1, 0.005),
        description: "Maximum relative difference between the shoulders",
    },
    ParamMeta {
        name: "trough_tolerance",
        param_type: ParamType::Ratio,
        default: 0.015,
        range: (0.005, 0.1, 0.005),
        description: "Maximum relative difference between the neckline anchors",
    },
];

/// LS-Trough-Head-Trough-RS over five alternating pivots.
///
/// Top when the window starts on a HIGH, Bottom when it starts on a LOW.
/// The neckline through the two troughs is the breakout line; a close
/// beyond the head invalidates the pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadAndShouldersDetector {
    pub min_prominence: Ratio,
    pub shoulder_tolerance: Ratio,
    pub trough_tolerance: Ratio,
}

impl Default for HeadAndShouldersDetector {
    fn default() -> Self {
        Self {
            min_prominence: Ratio::new_const(0.03),
            shoulder_tolerance: Ratio::new_const(0.02),
            trough_tolerance: Ratio::new_const(0.015),
        }
    }
}

impl HeadAndShouldersDetector {
    fn candidate(&self, w: &[Pivot]) -> Option<Candidate> {
        let [ls, t1, head, t2, rs] = w else {
            return None;
        };
        if !alternates(w) {
            return None;
        }
        let top = ls.is_high();

        let shoulder_diff = relative_diff(ls.price, rs.price);
        if shoulder_diff >= self.shoulder_tolerance.get() {
            return None;
        }
        let trough_diff = relative_diff(t1.price, t2.price);
        if trough_diff >= self.trough_tolerance.get() {
            return None;
        }

        let shoulder_avg = (ls.price + rs.price) / 2.0;
        if shoulder_avg.abs() <= f64::EPSILON {
            return None;
        }
        let excess = if top {
            head.price - ls.price.max(rs.price)
        } else {
            ls.price.min(rs.price) - head.price
        };
        let prominence = excess / shoulder_avg.abs();
        if prominence <= self.min_prominence.get() {
            return None;
        }

        let neckline = Line::through(t1.index, t1.price, t2.index, t2.price);
        let height = if top {
            head.price - neckline.value_at(head.index)
        } else {
            neckline.value_at(head.index) - head.price
        };
        if height <= 0.0 {
            return None;
        }

        let (pattern_type, levels) = if top {
            (
                PatternType::HeadAndShouldersTop,
                Levels {
                    upper: None,
                    lower: Some(neckline),
                    invalidation: Some(Invalidation::Above(head.price)),
                },
            )
        } else {
            (
                PatternType::HeadAndShouldersBottom,
                Levels {
                    upper: Some(neckline),
                    lower: None,
                    invalidation: Some(Invalidation::Below(head.price)),
                },
            )
        };

        Some(Candidate {
            pattern_type,
            pivots: w.to_vec(),
            context_index: ls.index,
            levels,
            height,
            evidence: GeometryEvidence::new(
                tolerance_quality(shoulder_diff, self.shoulder_tolerance.get()),
                tolerance_quality(trough_diff, self.trough_tolerance.get()),
                ratio_quality(prominence, self.min_prominence.get()),
                [0.4, 0.3, 0.3],
            ),
        })
    }
}

impl PatternDetector for HeadAndShouldersDetector {
    fn name(&self) -> &'static str {
        "head_and_shoulders"
    }

    fn pattern_types(&self) -> &'static [PatternType] {
        &[
            PatternType::HeadAndShouldersTop,
            PatternType::HeadAndShouldersBottom,
        ]
    }

    fn window(&self) -> usize {
        5
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
        let neckline = levels.lower.or(levels.upper);
        let lines = neckline.map(|line| {
            (
                "neckline",
                line_points(&line, pattern.start_index(), line_end(pattern), ctx),
            )
        });
        geometry_with(pattern, lines)
    }

    fn validate_config(&self) -> Result<()> {
        self.validate_params()
    }
}

impl ParameterizedDetector for HeadAndShouldersDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HEAD_AND_SHOULDERS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_prominence: get_ratio(params, "min_prominence", 0.03)?,
            shoulder_tolerance: get_ratio(params, "shoulder_tolerance", 0.02)?,
            trough_tolerance: get_ratio(params, "trough_tolerance", 0.015)?,
        })
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("min_prominence", self.min_prominence.get()),
            ("shoulder_tolerance", self.shoulder_tolerance.get()),
            ("trough_tolerance", self.trough_tolerance.get()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PatternState;
    use crate::pivots::PivotKind;
    use crate::test_support::series_from_closes;
    use crate::{Direction, MarketContext, PatternCategory};

    fn pivot(index: usize, kind: PivotKind, price: f64) -> Pivot {
        Pivot {
            index,
            kind,
            price,
            timestamp: index as i64,
        }
    }

    fn top_pivots(rs: f64, t2: f64) -> Vec<Pivot> {
        vec![
            pivot(10, PivotKind::High, 100.0),
            pivot(20, PivotKind::Low, 95.0),
            pivot(30, PivotKind::High, 105.0),
            pivot(40, PivotKind::Low, t2),
            pivot(50, PivotKind::High, rs),
        ]
    }

    fn detect(pivots: &[Pivot], closes: &[f64]) -> Vec<Pattern> {
        let series = series_from_closes(closes);
        let contexts = vec![MarketContext::default(); series.len()];
        let ctx = DetectionContext::new(&series, &contexts, 1);
        HeadAndShouldersDetector::default().detect(pivots, &ctx)
    }

    #[test]
    fn test_top_detected_and_forming() {
        let patterns = detect(&top_pivots(100.5, 95.5), &[97.0; 55]);
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.pattern_type(), PatternType::HeadAndShouldersTop);
        assert_eq!(p.category(), PatternCategory::Reversal);
        assert_eq!(p.direction_bias(), Direction::Down);
        assert_eq!(p.state(), PatternState::Forming);
        assert_eq!(p.id(), "HS_TOP-10-50");
        assert!(p.lines().contains_key("neckline"));
        assert_eq!(p.lines()["outline"].len(), 5);
    }

    #[test]
    fn test_top_confirms_below_neckline() {
        let mut closes = vec![97.0; 55];
        closes[53] = 90.0;
        let patterns = detect(&top_pivots(100.0, 95.0), &closes);
        assert_eq!(patterns[0].state(), PatternState::Confirmed);
        assert_eq!(patterns[0].lifecycle().breakout.unwrap().index, 53);
        assert!((patterns[0].target().unwrap() - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_invalidated_above_head() {
        let mut closes = vec![97.0; 55];
        closes[52] = 106.0;
        let patterns = detect(&top_pivots(100.0, 95.0), &closes);
        assert_eq!(patterns[0].state(), PatternState::Invalidated);
    }

    #[test]
    fn test_uneven_shoulders_rejected() {
        assert!(detect(&top_pivots(103.0, 95.0), &[97.0; 55]).is_empty());
    }

    #[test]
    fn test_uneven_troughs_rejected() {
        assert!(detect(&top_pivots(100.0, 97.0), &[97.0; 55]).is_empty());
    }

    #[test]
    fn test_shoulder_tolerance_tie_rejected() {
        // relative_diff(99, 101) == 0.02 exactly
        let mut pivots = top_pivots(101.0, 95.0);
        pivots[0].price = 99.0;
        assert!(detect(&pivots, &[97.0; 55]).is_empty());
    }

    #[test]
    fn test_flat_head_rejected() {
        let mut pivots = top_pivots(100.0, 95.0);
        pivots[2].price = 102.0;
        assert!(detect(&pivots, &[97.0; 55]).is_empty());
    }

    #[test]
    fn test_bottom_detected() {
        let pivots = vec![
            pivot(10, PivotKind::Low, 100.0),
            pivot(20, PivotKind::High, 105.0),
            pivot(30, PivotKind::Low, 95.0),
            pivot(40, PivotKind::High, 105.0),
            pivot(50, PivotKind::Low, 100.0),
        ];
        let mut closes = vec![102.0; 55];
        closes[54] = 106.0;
        let patterns = detect(&pivots, &closes);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type(), PatternType::HeadAndShouldersBottom);
        assert_eq!(patterns[0].direction_bias(), Direction::Up);
        assert_eq!(patterns[0].state(), PatternState::Confirmed);
    }

    #[test]
    fn test_with_params() {
        let mut params = HashMap::new();
        params.insert("shoulder_tolerance", 0.05);
        let d = HeadAndShouldersDetector::with_params(&params).unwrap();
        assert_eq!(d.shoulder_tolerance.get(), 0.05);
        assert_eq!(d.min_prominence.get(), 0.03);
        assert!(d.validate_config().is_ok());
    }

    #[test]
    fn test_out_of_range_param() {
        let d = HeadAndShouldersDetector {
            shoulder_tolerance: Ratio::new(0.5).unwrap(),
            ..Default::default()
        };
        assert!(d.validate_config().is_err());
    }
}
