//! Pattern quality scoring.
//!
//! Three independently capped components:
//!
//! | Component    | Cap | Rewards                                         |
//! |--------------|-----|-------------------------------------------------|
//! | geometry     | 60  | symmetry, line fit, prominence/depth            |
//! | context      | 20  | a corroborating prior trend or compression      |
//! | confirmation | 20  | an observed breakout, volume on the breakout    |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lifecycle::{Lifecycle, PatternState};
use crate::{Direction, MarketContext, Pattern, PatternCategory};

pub const GEOMETRY_CAP: f64 = 60.0;
pub const CONTEXT_CAP: f64 = 20.0;
pub const CONFIRMATION_CAP: f64 = 20.0;

/// Points for a FORMING pattern that is otherwise geometrically valid
pub const FORMING_CREDIT: f64 = 5.0;
/// Points for a breakout before volume corroboration
pub const BREAKOUT_CREDIT: f64 = 15.0;
/// Breakout volume over average volume that earns full volume credit
pub const FULL_VOLUME_RATIO: f64 = 1.5;

/// Geometric qualities a detector reports, each in 0..=1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryEvidence {
    pub symmetry: f64,
    pub fit: f64,
    pub prominence: f64,
    /// Relative weight of symmetry, fit and prominence. Sums to 1.
    pub weights: [f64; 3],
}

impl GeometryEvidence {
    pub fn new(symmetry: f64, fit: f64, prominence: f64, weights: [f64; 3]) -> Self {
        Self {
            symmetry,
            fit,
            prominence,
            weights,
        }
    }

    /// Geometry points in 0..=GEOMETRY_CAP
    pub fn points(&self) -> f64 {
        let qualities = [self.symmetry, self.fit, self.prominence];
        let weight_sum: f64 = self.weights.iter().sum();
        if weight_sum <= 0.0 || !weight_sum.is_finite() {
            return 0.0;
        }
        let mix: f64 = qualities
            .iter()
            .zip(&self.weights)
            .map(|(q, w)| unit(*q) * w)
            .sum();
        GEOMETRY_CAP * mix / weight_sum
    }
}

/// Clamp into 0..=1, mapping NaN to 0
#[inline]
pub fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[inline]
fn capped(v: f64, cap: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, cap)
    }
}

/// Score split into its capped components
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub geometry: f64,
    pub context: f64,
    pub confirmation: f64,
}

impl ScoreBreakdown {
    pub fn new(geometry: f64, context: f64, confirmation: f64) -> Self {
        Self {
            geometry: capped(geometry, GEOMETRY_CAP),
            context: capped(context, CONTEXT_CAP),
            confirmation: capped(confirmation, CONFIRMATION_CAP),
        }
    }

    /// Sum of components. The caps add up to 100, so no further clamp bites.
    pub fn total(&self) -> f64 {
        (self.geometry + self.context + self.confirmation).clamp(0.0, 100.0)
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("geometry".to_string(), self.geometry),
            ("context".to_string(), self.context),
            ("confirmation".to_string(), self.confirmation),
        ])
    }
}

/// Score `pattern` against the market context at its context bar
pub fn score(pattern: &Pattern, context: &MarketContext) -> ScoreBreakdown {
    ScoreBreakdown::new(
        pattern.evidence().points(),
        context_points(pattern.category(), pattern.direction_bias(), context),
        confirmation_points(pattern.lifecycle()),
    )
}

/// Trend or compression corroboration
pub fn context_points(
    category: PatternCategory,
    bias: Direction,
    context: &MarketContext,
) -> f64 {
    if bias == Direction::Neutral {
        return CONTEXT_CAP * unit(1.0 - context.compression);
    }
    let wanted = match category {
        PatternCategory::Reversal => bias.opposite(),
        PatternCategory::Continuation => bias,
    };
    let trend = context.trend;
    match trend.direction() {
        d if d == wanted && trend.is_strong() => CONTEXT_CAP,
        d if d == wanted => 14.0,
        Direction::Neutral => 6.0,
        _ => 0.0,
    }
}

/// Breakout and volume corroboration
pub fn confirmation_points(lifecycle: &Lifecycle) -> f64 {
    match lifecycle.state {
        PatternState::Confirmed => {
            let volume = lifecycle
                .breakout
                .and_then(|b| b.volume_ratio)
                .map(|r| unit((r - 1.0) / (FULL_VOLUME_RATIO - 1.0)))
                .unwrap_or(0.0);
            BREAKOUT_CREDIT + (CONFIRMATION_CAP - BREAKOUT_CREDIT) * volume
        }
        PatternState::Forming => FORMING_CREDIT,
        PatternState::Failed | PatternState::Invalidated => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Breakout;
    use crate::Trend;

    fn ctx(trend: Trend, compression: f64) -> MarketContext {
        MarketContext {
            trend,
            compression,
            ..Default::default()
        }
    }

    #[test]
    fn test_breakdown_caps_and_nan() {
        let b = ScoreBreakdown::new(80.0, f64::NAN, -3.0);
        assert_eq!(b.geometry, 60.0);
        assert_eq!(b.context, 0.0);
        assert_eq!(b.confirmation, 0.0);
        assert_eq!(b.total(), 60.0);
    }

    #[test]
    fn test_breakdown_sums_to_total() {
        let b = ScoreBreakdown::new(41.3, 14.0, 5.0);
        let sum: f64 = b.to_map().values().sum();
        assert!((sum - b.total()).abs() < 1e-9);
    }

    #[test]
    fn test_geometry_points() {
        let e = GeometryEvidence::new(1.0, 1.0, 0.5, [0.4, 0.3, 0.3]);
        assert!((e.points() - 51.0).abs() < 1e-9);
        let nan = GeometryEvidence::new(f64::NAN, 1.0, 1.0, [0.4, 0.3, 0.3]);
        assert!((nan.points() - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_reversal_context() {
        let cat = PatternCategory::Reversal;
        assert_eq!(context_points(cat, Direction::Down, &ctx(Trend::StrongUp, 1.0)), 20.0);
        assert_eq!(context_points(cat, Direction::Down, &ctx(Trend::WeakUp, 1.0)), 14.0);
        assert_eq!(context_points(cat, Direction::Down, &ctx(Trend::Sideways, 1.0)), 6.0);
        assert_eq!(context_points(cat, Direction::Down, &ctx(Trend::StrongDown, 1.0)), 0.0);
    }

    #[test]
    fn test_continuation_context() {
        let cat = PatternCategory::Continuation;
        assert_eq!(context_points(cat, Direction::Up, &ctx(Trend::StrongUp, 1.0)), 20.0);
        assert_eq!(context_points(cat, Direction::Up, &ctx(Trend::WeakDown, 1.0)), 0.0);
        assert_eq!(context_points(cat, Direction::Neutral, &ctx(Trend::StrongUp, 0.25)), 15.0);
        assert_eq!(context_points(cat, Direction::Neutral, &ctx(Trend::StrongUp, 1.4)), 0.0);
    }

    #[test]
    fn test_confirmation_points() {
        let mut lc = Lifecycle::new(0);
        assert_eq!(confirmation_points(&lc), 5.0);

        lc.state = PatternState::Confirmed;
        lc.breakout = Some(Breakout {
            index: 1,
            direction: Direction::Down,
            close: 1.0,
            volume_ratio: Some(1.25),
        });
        assert!((confirmation_points(&lc) - 17.5).abs() < 1e-9);

        lc.breakout = None;
        assert_eq!(confirmation_points(&lc), 15.0);

        lc.state = PatternState::Failed;
        assert_eq!(confirmation_points(&lc), 0.0);
    }
}
