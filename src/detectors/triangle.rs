//! Symmetric, ascending and descending triangles

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::*;
use crate::lifecycle::Levels;
use crate::params::{get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector};
use crate::pivots::Pivot;
use crate::scoring::GeometryEvidence;
use crate::{
    DetectionContext, Geometry, Pattern, PatternDetector, PatternType, Period, Ratio, Result,
};

static TRIANGLE_PARAMS: &[ParamMeta] = &[
    ParamMeta {
        name: "pivots",
        param_type: ParamType::Period,
        default: 6.0,
        range: (4.0, 12.0, 1.0),
        description: "Pivots per candidate window (at least two touches per line)",
    },
    ParamMeta {
        name: "min_r_squared",
        param_type: ParamType::Ratio,
        default: 0.7,
        range: (0.3, 0.99, 0.05),
        description: "Minimum least-squares fit quality of each trendline",
    },
    ParamMeta {
        name: "flat_tolerance",
        param_type: ParamType::Ratio,
        default: 0.01,
        range: (0.002, 0.05, 0.002),
        description: "Line drift over the window, relative to mean price, still treated as flat",
    },
];

/// Two converging regression lines through swing highs and swing lows.
///
/// | upper line | lower line | type        |
/// |------------|------------|-------------|
/// | flat       | rising     | Ascending   |
/// | falling    | flat       | Descending  |
/// | falling    | rising     | Symmetric   |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangleDetector {
    pub pivots: Period,
    pub min_r_squared: Ratio,
    pub flat_tolerance: Ratio,
}

impl Default for TriangleDetector {
    fn default() -> Self {
        Self {
            pivots: Period::new_const(6),
            min_r_squared: Ratio::new_const(0.7),
            flat_tolerance: Ratio::new_const(0.01),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slope {
    Falling,
    Flat,
    Rising,
}

impl TriangleDetector {
    fn slope_class(&self, slope: f64, span: f64, mean: f64) -> Slope {
        let drift = slope * span / mean;
        let flat = self.flat_tolerance.get();
        if drift.abs() < flat {
            Slope::Flat
        } else if drift > 0.0 {
            Slope::Rising
        } else {
            Slope::Falling
        }
    }

    fn candidate(&self, w: &[Pivot]) -> Option<Candidate> {
        if w.len() < 4 || !alternates(w) {
            return None;
        }
        let highs: Vec<(usize, f64)> = w
            .iter()
            .filter(|p| p.is_high())
            .map(|p| (p.index, p.price))
            .collect();
        let lows: Vec<(usize, f64)> = w
            .iter()
            .filter(|p| p.is_low())
            .map(|p| (p.index, p.price))
            .collect();
        if highs.len() < 2 || lows.len() < 2 {
            return None;
        }

        let mean = w.iter().map(|p| p.price).sum::<f64>() / w.len() as f64;
        if mean <= f64::EPSILON {
            return None;
        }
        let band = self.flat_tolerance.get() * mean;
        let upper_fit = LinearFit::fit(&highs, band)?;
        let lower_fit = LinearFit::fit(&lows, band)?;
        let min_r2 = self.min_r_squared.get();
        if upper_fit.r_squared <= min_r2 || lower_fit.r_squared <= min_r2 {
            return None;
        }

        let upper = upper_fit.line();
        let lower = lower_fit.line();
        let start = w[0].index;
        let end = w[w.len() - 1].index;
        let width_start = upper.value_at(start) - lower.value_at(start);
        let width_end = upper.value_at(end) - lower.value_at(end);
        if width_start <= 0.0 || width_end <= 0.0 {
            return None;
        }
        let compression = width_end / width_start;
        if compression >= 1.0 {
            return None;
        }

        let span = (end - start) as f64;
        let pattern_type = match (
            self.slope_class(upper_fit.slope, span, mean),
            self.slope_class(lower_fit.slope, span, mean),
        ) {
            (Slope::Flat, Slope::Rising) => PatternType::AscendingTriangle,
            (Slope::Falling, Slope::Flat) => PatternType::DescendingTriangle,
            (Slope::Falling, Slope::Rising) => PatternType::SymmetricTriangle,
            _ => return None,
        };

        // Trend leading in for the directional variants, compression at the apex side otherwise
        let context_index = match pattern_type {
            PatternType::SymmetricTriangle => end,
            _ => start,
        };

        Some(Candidate {
            pattern_type,
            pivots: w.to_vec(),
            context_index,
            levels: Levels {
                upper: Some(upper),
                lower: Some(lower),
                invalidation: None,
            },
            height: width_start,
            evidence: GeometryEvidence::new(
                1.0 - compression,
                (upper_fit.r_squared + lower_fit.r_squared) / 2.0,
                (highs.len().min(lows.len()) as f64 / 3.0).min(1.0),
                [0.3, 0.5, 0.2],
            ),
        })
    }
}

impl PatternDetector for TriangleDetector {
    fn name(&self) -> &'static str {
        "triangle"
    }

    fn pattern_types(&self) -> &'static [PatternType] {
        &[
            PatternType::SymmetricTriangle,
            PatternType::AscendingTriangle,
            PatternType::DescendingTriangle,
        ]
    }

    fn window(&self) -> usize {
        self.pivots.get()
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
        let (from, to) = (pattern.start_index(), line_end(pattern));
        let upper = levels.upper.map(|l| ("upper", line_points(&l, from, to, ctx)));
        let lower = levels.lower.map(|l| ("lower", line_points(&l, from, to, ctx)));
        geometry_with(pattern, upper.into_iter().chain(lower))
    }

    fn validate_config(&self) -> Result<()> {
        self.validate_params()
    }
}

impl ParameterizedDetector for TriangleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TRIANGLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            pivots: get_period(params, "pivots", 6)?,
            min_r_squared: get_ratio(params, "min_r_squared", 0.7)?,
            flat_tolerance: get_ratio(params, "flat_tolerance", 0.01)?,
        })
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("pivots", self.pivots.get() as f64),
            ("min_r_squared", self.min_r_squared.get()),
            ("flat_tolerance", self.flat_tolerance.get()),
        ]
    }
}
