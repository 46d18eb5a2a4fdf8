//! Flags and pennants

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::*;
use crate::lifecycle::{Invalidation, Levels, Line};
use crate::params::{get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector};
use crate::pivots::Pivot;
use crate::scoring::GeometryEvidence;
use crate::{
    DetectionContext, Geometry, Pattern, PatternDetector, PatternType, Period, Ratio, Result,
};

static FLAG_PARAMS: &[ParamMeta] = &[
    ParamMeta {
        name: "min_impulse",
        param_type: ParamType::Ratio,
        default: 0.05,
        range: (0.01, 0.3, 0.01),
        description: "Minimum pole move relative to its origin",
    },
    ParamMeta {
        name: "max_impulse_bars",
        param_type: ParamType::Period,
        default: 15.0,
        range: (3.0, 60.0, 1.0),
        description: "Maximum bars the pole may take",
    },
    ParamMeta {
        name: "max_retrace",
        param_type: ParamType::Ratio,
        default: 0.5,
        range: (0.1, 0.9, 0.05),
        description: "Maximum consolidation depth as a fraction of the pole",
    },
    ParamMeta {
        name: "max_consolidation_bars",
        param_type: ParamType::Period,
        default: 20.0,
        range: (3.0, 120.0, 1.0),
        description: "Maximum bars from pole end to the last consolidation pivot",
    },
];

/// Impulse leg followed by a shallow counter-trend consolidation.
///
/// Five alternating pivots: pole origin, pole end, then two counter swings.
/// Both consolidation lines sloping against the pole make a flag; a line
/// sloping with the pole against one sloping away from it makes a pennant.
/// Only a breakout in the pole's direction confirms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagDetector {
    pub min_impulse: Ratio,
    pub max_impulse_bars: Period,
    pub max_retrace: Ratio,
    pub max_consolidation_bars: Period,
}

impl Default for FlagDetector {
    fn default() -> Self {
        Self {
            min_impulse: Ratio::new_const(0.05),
            max_impulse_bars: Period::new_const(15),
            max_retrace: Ratio::new_const(0.5),
            max_consolidation_bars: Period::new_const(20),
        }
    }
}

impl FlagDetector {
    fn candidate(&self, w: &[Pivot]) -> Option<Candidate> {
        let [origin, pole_end, c1, c2, c3] = w else {
            return None;
        };
        if !alternates(w) {
            return None;
        }
        let bull = origin.is_low();

        if origin.price.abs() <= f64::EPSILON {
            return None;
        }
        let pole = (pole_end.price - origin.price).abs();
        let impulse = pole / origin.price.abs();
        if impulse <= self.min_impulse.get() {
            return None;
        }
        let impulse_bars = pole_end.index - origin.index;
        if impulse_bars > self.max_impulse_bars.get() {
            return None;
        }
        if c3.index - pole_end.index > self.max_consolidation_bars.get() {
            return None;
        }

        // Deepest counter swing, measured from the pole end
        let depth = if bull {
            pole_end.price - c1.price.min(c3.price)
        } else {
            c1.price.max(c3.price) - pole_end.price
        };
        let max_depth = self.max_retrace.get() * pole;
        if depth >= max_depth {
            return None;
        }

        // Line through the pole end and the next same-side swing, and the
        // line through the two opposite swings
        let outer = Line::through(pole_end.index, pole_end.price, c2.index, c2.price);
        let inner = Line::through(c1.index, c1.price, c3.index, c3.price);

        let (pattern_type, levels) = if bull {
            if outer.slope >= 0.0 {
                return None;
            }
            let kind = if inner.slope > 0.0 {
                PatternType::BullPennant
            } else {
                PatternType::BullFlag
            };
            let levels = Levels {
                upper: Some(outer),
                lower: None,
                invalidation: Some(Invalidation::Below(pole_end.price - max_depth)),
            };
            (kind, levels)
        } else {
            if outer.slope <= 0.0 {
                return None;
            }
            let kind = if inner.slope < 0.0 {
                PatternType::BearPennant
            } else {
                PatternType::BearFlag
            };
            let levels = Levels {
                upper: None,
                lower: Some(outer),
                invalidation: Some(Invalidation::Above(pole_end.price + max_depth)),
            };
            (kind, levels)
        };

        Some(Candidate {
            pattern_type,
            pivots: w.to_vec(),
            context_index: pole_end.index,
            levels,
            height: pole,
            evidence: GeometryEvidence::new(
                1.0 - depth / max_depth,
                tolerance_quality(impulse_bars as f64, self.max_impulse_bars.get() as f64),
                ratio_quality(impulse, self.min_impulse.get()),
                [0.3, 0.3, 0.4],
            ),
        })
    }
}

impl PatternDetector for FlagDetector {
    fn name(&self) -> &'static str {
        "flag_pennant"
    }

    fn pattern_types(&self) -> &'static [PatternType] {
        &[
            PatternType::BullFlag,
            PatternType::BearFlag,
            PatternType::BullPennant,
            PatternType::BearPennant,
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
        let p = pattern.pivots();
        let Some([origin, pole_end, c1, c2, c3]) = p.get(..5) else {
            return geometry_with(pattern, None);
        };
        let end = line_end(pattern);
        let outer = Line::through(pole_end.index, pole_end.price, c2.index, c2.price);
        let inner = Line::through(c1.index, c1.price, c3.index, c3.price);
        let pole = Line::through(origin.index, origin.price, pole_end.index, pole_end.price);
        let (upper, lower) = if origin.is_low() {
            (outer, inner)
        } else {
            (inner, outer)
        };
        geometry_with(
            pattern,
            [
                ("pole", line_points(&pole, origin.index, pole_end.index, ctx)),
                ("upper", line_points(&upper, pole_end.index, end, ctx)),
                ("lower", line_points(&lower, pole_end.index, end, ctx)),
            ],
        )
    }

    fn validate_config(&self) -> Result<()> {
        self.validate_params()
    }
}

impl ParameterizedDetector for FlagDetector {
    fn param_meta() -> &'static [ParamMeta] {
        FLAG_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_impulse: get_ratio(params, "min_impulse", 0.05)?,
            max_impulse_bars: get_period(params, "max_impulse_bars", 15)?,
            max_retrace: get_ratio(params, "max_retrace", 0.5)?,
            max_consolidation_bars: get_period(params, "max_consolidation_bars", 20)?,
        })
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("min_impulse", self.min_impulse.get()),
            ("max_impulse_bars", self.max_impulse_bars.get() as f64),
            ("max_retrace", self.max_retrace.get()),
            ("max_consolidation_bars", self.max_consolidation_bars.get() as f64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PatternState;
    use crate::pivots::PivotKind;
    use crate::test_support::series_from_closes;
    use crate::{Direction, MarketContext};

    fn pivot(index: usize, kind: PivotKind, price: f64) -> Pivot {
        Pivot {
            index,
            kind,
            price,
            timestamp: index as i64,
        }
    }

    fn bull(c1: f64, c2: f64, c3: f64) -> Vec<Pivot> {
        vec![
            pivot(0, PivotKind::Low, 100.0),
            pivot(8, PivotKind::High, 120.0),
            pivot(12, PivotKind::Low, c1),
            pivot(16, PivotKind::High, c2),
            pivot(20, PivotKind::Low, c3),
        ]
    }

    fn detect(pivots: &[Pivot], closes: &[f64]) -> Vec<Pattern> {
        let series = series_from_closes(closes);
        let contexts = vec![MarketContext::default(); series.len()];
        let ctx = DetectionContext::new(&series, &contexts, 1);
        FlagDetector::default().detect(pivots, &ctx)
    }

    #[test]
    fn test_bull_flag() {
        let mut closes = vec![115.0; 26];
        closes[24] = 121.0;
        let patterns = detect(&bull(114.0, 118.0, 112.0), &closes);
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.pattern_type(), PatternType::BullFlag);
        assert_eq!(p.direction_bias(), Direction::Up);
        assert_eq!(p.state(), PatternState::Confirmed);
        assert!(p.lines().contains_key("pole"));
        assert_eq!(p.height(), 20.0);
    }

    #[test]
    fn test_bull_pennant() {
        let patterns = detect(&bull(114.0, 118.0, 116.0), &[115.0; 26]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type(), PatternType::BullPennant);
        assert_eq!(patterns[0].state(), PatternState::Forming);
    }

    #[test]
    fn test_deep_retrace_rejected() {
        // 120 - 109 = 11 > 0.5 * 20
        assert!(detect(&bull(109.0, 118.0, 112.0), &[115.0; 26]).is_empty());
    }

    #[test]
    fn test_out_of_order_pivots_rejected() {
        let mut pivots = bull(114.0, 118.0, 112.0);
        pivots[0].index = 10;
        assert!(detect(&pivots, &[115.0; 26]).is_empty());
        let mut pivots = bull(114.0, 118.0, 112.0);
        pivots[4].index = 4;
        assert!(detect(&pivots, &[115.0; 26]).is_empty());
    }

    #[test]
    fn test_weak_impulse_rejected() {
        let mut pivots = bull(114.0, 118.0, 112.0);
        pivots[1].price = 104.0;
        pivots[2].price = 102.0;
        pivots[3].price = 103.5;
        pivots[4].price = 102.5;
        assert!(detect(&pivots, &[103.0; 26]).is_empty());
    }

    #[test]
    fn test_rising_consolidation_rejected() {
        assert!(detect(&bull(114.0, 122.0, 116.0), &[118.0; 26]).is_empty());
    }

    #[test]
    fn test_bear_flag_invalidated() {
        let pivots = vec![
            pivot(0, PivotKind::High, 100.0),
            pivot(6, PivotKind::Low, 88.0),
            pivot(10, PivotKind::High, 92.0),
            pivot(14, PivotKind::Low, 90.0),
            pivot(18, PivotKind::High, 93.0),
        ];
        let mut closes = vec![92.0; 24];
        closes[21] = 95.0;
        let patterns = detect(&pivots, &closes);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type(), PatternType::BearFlag);
        assert_eq!(patterns[0].state(), PatternState::Invalidated);
    }
}
