//! Shared geometry helpers for the chart pattern detectors.

use crate::lifecycle::{Levels, Line};
use crate::pivots::Pivot;
use crate::scoring::{unit, GeometryEvidence};
use crate::{DetectionContext, Geometry, GeometryPoint, Pattern, PatternDetector, PatternType};

// ============================================================
// COMPARISONS
// ============================================================

/// |a - b| relative to the mean magnitude of a and b
#[inline]
pub fn relative_diff(a: f64, b: f64) -> f64 {
    let mean = (a.abs() + b.abs()) / 2.0;
    if mean <= f64::EPSILON {
        return 0.0;
    }
    (a - b).abs() / mean
}

/// 1.0 for a perfect match, 0.5 at the tolerance edge.
///
/// Cubic falloff: a miss of half the tolerance still earns 0.94.
#[inline]
pub fn tolerance_quality(diff: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 || diff.is_nan() {
        return 0.0;
    }
    let x = unit(diff / tolerance);
    unit(1.0 - 0.5 * x.powi(3))
}

/// 0.5 at the minimum, approaching 1.0 as `value` grows past it.
///
/// Mirrors [`tolerance_quality`] on `minimum / value`: 1.5x the minimum
/// earns 0.85, twice the minimum 0.94.
#[inline]
pub fn ratio_quality(value: f64, minimum: f64) -> f64 {
    if minimum <= 0.0 {
        return 1.0;
    }
    if value <= 0.0 || value.is_nan() {
        return 0.0;
    }
    let x = unit(minimum / value);
    unit(1.0 - 0.5 * x.powi(3))
}

/// Pivots strictly alternate HIGH/LOW at strictly increasing bar indices
pub fn alternates(pivots: &[Pivot]) -> bool {
    pivots
        .windows(2)
        .all(|w| w[0].kind != w[1].kind && w[0].index < w[1].index)
}

// ============================================================
// LINE FITTING
// ============================================================

/// Least-squares line over (bar index, price)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    /// Fit `points`. `flat_band` is the price deviation treated as noise.
    ///
    /// A near-horizontal line through a tight cluster has almost no total
    /// variance, which would make plain R² meaningless. The total variance
    /// is floored at `n * flat_band²` so that such a line scores as a fit.
    pub fn fit(points: &[(usize, f64)], flat_band: f64) -> Option<Self> {
        let n = points.len();
        if n < 2 {
            return None;
        }
        let nf = n as f64;
        let mean_x = points.iter().map(|p| p.0 as f64).sum::<f64>() / nf;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / nf;

        let sxx: f64 = points.iter().map(|p| (p.0 as f64 - mean_x).powi(2)).sum();
        if sxx <= f64::EPSILON {
            return None;
        }
        let sxy: f64 = points
            .iter()
            .map(|p| (p.0 as f64 - mean_x) * (p.1 - mean_y))
            .sum();
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        let ss_res: f64 = points
            .iter()
            .map(|p| (p.1 - (intercept + slope * p.0 as f64)).powi(2))
            .sum();
        let ss_tot: f64 = points.iter().map(|p| (p.1 - mean_y).powi(2)).sum();
        let floor = nf * flat_band * flat_band;
        let denom = ss_tot.max(floor);
        let r_squared = if denom <= f64::EPSILON {
            1.0
        } else {
            unit(1.0 - ss_res / denom)
        };

        Some(Self {
            slope,
            intercept,
            r_squared,
        })
    }

    pub fn line(&self) -> Line {
        Line {
            anchor_index: 0,
            anchor_price: self.intercept,
            slope: self.slope,
        }
    }
}

// ============================================================
// CANDIDATES
// ============================================================

/// A geometrically valid window not yet replayed or scored
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pattern_type: PatternType,
    pub pivots: Vec<Pivot>,
    pub context_index: usize,
    pub levels: Levels,
    pub height: f64,
    pub evidence: GeometryEvidence,
}

impl Candidate {
    /// Replay bars after the last pivot, then attach geometry and score
    pub fn finalize<D>(self, detector: &D, ctx: &DetectionContext<'_>) -> Pattern
    where
        D: PatternDetector + ?Sized,
    {
        let mut pattern = Pattern::new(
            self.pattern_type,
            self.pivots,
            self.context_index,
            self.levels,
            self.height,
            self.evidence,
        );
        let lifecycle = pattern.lifecycle().replay(
            pattern.levels(),
            ctx.series,
            ctx.contexts,
            ctx.confirm_bars,
        );
        pattern.set_lifecycle(lifecycle);
        settle(detector, pattern, ctx)
    }
}

/// Advance a live pattern over bars it has not seen yet.
///
/// Terminal patterns are returned untouched.
pub fn refresh<D>(detector: &D, pattern: Pattern, ctx: &DetectionContext<'_>) -> Pattern
where
    D: PatternDetector + ?Sized,
{
    if pattern.state().is_terminal() {
        return pattern;
    }
    let mut pattern = pattern;
    let lifecycle = pattern.lifecycle().replay(
        pattern.levels(),
        ctx.series,
        ctx.contexts,
        ctx.confirm_bars,
    );
    pattern.set_lifecycle(lifecycle);
    settle(detector, pattern, ctx)
}

fn settle<D>(detector: &D, mut pattern: Pattern, ctx: &DetectionContext<'_>) -> Pattern
where
    D: PatternDetector + ?Sized,
{
    let lines = detector.geometry(&pattern, ctx);
    pattern.set_lines(lines);
    let breakdown = detector.score(&pattern, ctx);
    pattern.set_score(&breakdown);
    pattern
}

// ============================================================
// GEOMETRY
// ============================================================

/// Last bar a pattern's lines should reach: the breakout bar if any
pub fn line_end(pattern: &Pattern) -> usize {
    pattern
        .lifecycle()
        .breakout
        .map(|b| b.index)
        .unwrap_or(pattern.end_index())
        .max(pattern.end_index())
}

/// Two control points of `line` between `from` and `to`
pub fn line_points(
    line: &Line,
    from: usize,
    to: usize,
    ctx: &DetectionContext<'_>,
) -> Vec<GeometryPoint> {
    [from, to]
        .into_iter()
        .map(|index| GeometryPoint {
            index,
            timestamp: ctx.series.timestamp_at(index),
            price: line.value_at(index),
        })
        .collect()
}

/// Polyline through the pattern's pivots
pub fn outline(pivots: &[Pivot]) -> Vec<GeometryPoint> {
    pivots
        .iter()
        .map(|p| GeometryPoint {
            index: p.index,
            timestamp: p.timestamp,
            price: p.price,
        })
        .collect()
}

/// Geometry with the pivot outline and the given named lines
pub fn geometry_with(
    pattern: &Pattern,
    lines: impl IntoIterator<Item = (&'static str, Vec<GeometryPoint>)>,
) -> Geometry {
    let mut geometry = Geometry::new();
    geometry.insert("outline".to_string(), outline(pattern.pivots()));
    for (name, points) in lines {
        geometry.insert(name.to_string(), points);
    }
    geometry
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivots::PivotKind;

    #[test]
    fn test_relative_diff() {
        assert!((relative_diff(100.0, 102.0) - 2.0 / 101.0).abs() < 1e-12);
        assert_eq!(relative_diff(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_qualities() {
        assert_eq!(tolerance_quality(0.0, 0.02), 1.0);
        assert!((tolerance_quality(0.02, 0.02) - 0.5).abs() < 1e-12);
        assert!((tolerance_quality(0.01, 0.02) - 0.9375).abs() < 1e-12);
        assert!((ratio_quality(0.03, 0.03) - 0.5).abs() < 1e-12);
        assert!((ratio_quality(0.06, 0.03) - 0.9375).abs() < 1e-12);
        assert_eq!(ratio_quality(0.0, 0.03), 0.0);
        assert!(ratio_quality(0.09, 0.03) > ratio_quality(0.06, 0.03));
    }

    #[test]
    fn test_qualities_inside_reversal_bounds() {
        // Shoulders 1% apart of a 2% tolerance, troughs 1% of 1.5%,
        // head 4.5% clear of a 3% minimum
        let e = GeometryEvidence::new(
            tolerance_quality(0.01, 0.02),
            tolerance_quality(0.01, 0.015),
            ratio_quality(0.045, 0.03),
            [0.4, 0.3, 0.3],
        );
        assert!(e.points() >= 50.0, "geometry {}", e.points());
    }

    #[test]
    fn test_fit_exact_line() {
        let fit = LinearFit::fit(&[(0, 1.0), (5, 2.0), (10, 3.0)], 0.0).unwrap();
        assert!((fit.slope - 0.2).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_noisy_line() {
        let fit = LinearFit::fit(&[(5, 90.0), (15, 99.0), (25, 96.0)], 0.0).unwrap();
        assert!(fit.r_squared < 0.7);
    }

    #[test]
    fn test_fit_flat_band() {
        // Tiny wiggle around a flat level still counts as a fit
        let fit = LinearFit::fit(&[(0, 100.0), (10, 100.2), (20, 99.9)], 1.0).unwrap();
        assert!(fit.r_squared > 0.9);
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(LinearFit::fit(&[(3, 1.0)], 0.0).is_none());
        assert!(LinearFit::fit(&[(3, 1.0), (3, 2.0)], 0.0).is_none());
    }

    #[test]
    fn test_alternates() {
        let p = |index, kind| Pivot {
            index,
            kind,
            price: 1.0,
            timestamp: index as i64,
        };
        assert!(alternates(&[p(0, PivotKind::Low), p(1, PivotKind::High)]));
        assert!(!alternates(&[p(0, PivotKind::Low), p(1, PivotKind::Low)]));
        assert!(!alternates(&[p(5, PivotKind::Low), p(2, PivotKind::High)]));
        assert!(!alternates(&[p(3, PivotKind::Low), p(3, PivotKind::High)]));
    }
}
