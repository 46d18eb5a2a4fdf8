//! Swing pivot extraction (directional ZigZag).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{OHLCVExt, PatternError, Period, Result, Series};

/// Swing type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PivotKind {
    High,
    Low,
}

impl PivotKind {
    pub fn opposite(self) -> Self {
        match self {
            PivotKind::High => PivotKind::Low,
            PivotKind::Low => PivotKind::High,
        }
    }
}

/// A confirmed swing point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: PivotKind,
    pub price: f64,
    pub timestamp: i64,
}

impl Pivot {
    #[inline]
    pub fn is_high(&self) -> bool {
        self.kind == PivotKind::High
    }

    #[inline]
    pub fn is_low(&self) -> bool {
        self.kind == PivotKind::Low
    }
}

/// Minimum retracement that confirms a reversal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Threshold {
    /// Percent of the running extreme's price (3.0 = 3%)
    Percent { value: f64 },
    /// Multiple of the trailing average true range
    Atr { multiplier: f64, lookback: Period },
    /// Fixed amount in the units of the scanned values
    Absolute { value: f64 },
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Atr {
            multiplier: 2.0,
            lookback: Period::new_const(14),
        }
    }
}

impl Threshold {
    pub fn validate(&self) -> Result<()> {
        let (field, value) = match *self {
            Threshold::Percent { value } => ("threshold.value", value),
            Threshold::Atr { multiplier, .. } => ("threshold.multiplier", multiplier),
            Threshold::Absolute { value } => ("threshold.value", value),
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(PatternError::OutOfRange {
                field,
                value,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        Ok(())
    }
}

/// Trailing mean of true range, one value per bar
pub fn average_true_range(series: &Series, lookback: Period) -> Vec<f64> {
    let bars = series.bars();
    let tr: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, b)| b.true_range(i.checked_sub(1).map(|p| bars[p].close)))
        .collect();

    let period = lookback.get();
    let mut out = Vec::with_capacity(tr.len());
    let mut sum = 0.0;
    for i in 0..tr.len() {
        sum += tr[i];
        if i >= period {
            sum -= tr[i - period];
        }
        out.push(sum / (i + 1).min(period) as f64);
    }
    out
}

/// Pivots on the raw closes of `series`
pub fn detect_pivots(
    series: &Series,
    threshold: &Threshold,
    min_distance: Period,
) -> Result<Vec<Pivot>> {
    detect_pivots_on(&series.closes(), series, threshold, min_distance)
}

/// Pivots on a prepared scalar series aligned with `series`.
///
/// `series` supplies timestamps and, for the ATR threshold, true ranges.
pub fn detect_pivots_on(
    values: &[f64],
    series: &Series,
    threshold: &Threshold,
    min_distance: Period,
) -> Result<Vec<Pivot>> {
    threshold.validate()?;
    if values.len() != series.len() {
        return Err(PatternError::InvalidValue(
            "prepared values must align with the series",
        ));
    }

    let pivots = match *threshold {
        Threshold::Atr {
            multiplier,
            lookback,
        } => {
            let atr = average_true_range(series, lookback);
            zigzag(values, min_distance, |i, _| multiplier * atr[i], |i| {
                series.timestamp_at(i)
            })
        }
        Threshold::Percent { value } => zigzag(
            values,
            min_distance,
            |_, extreme: f64| extreme.abs() * value / 100.0,
            |i| series.timestamp_at(i),
        ),
        Threshold::Absolute { value } => {
            zigzag(values, min_distance, |_, _| value, |i| series.timestamp_at(i))
        }
    };

    debug!(bars = values.len(), pivots = pivots.len(), "pivot extraction");
    Ok(pivots)
}

/// Pivots on a bare scalar sequence. Timestamps are bar indices.
///
/// The ATR threshold needs bar ranges and is rejected here.
pub fn detect_pivots_in(
    values: &[f64],
    threshold: &Threshold,
    min_distance: Period,
) -> Result<Vec<Pivot>> {
    threshold.validate()?;
    let pivots = match *threshold {
        Threshold::Atr { .. } => {
            return Err(PatternError::InvalidConfig(
                "ATR threshold requires bar data".to_string(),
            ))
        }
        Threshold::Percent { value } => zigzag(
            values,
            min_distance,
            |_, extreme: f64| extreme.abs() * value / 100.0,
            |i| i as i64,
        ),
        Threshold::Absolute { value } => zigzag(values, min_distance, |_, _| value, |i| i as i64),
    };
    Ok(pivots)
}

/// Single-pass ZigZag.
///
/// `threshold(i, extreme)` is the retracement needed at bar `i` to confirm a
/// reversal away from a running extreme priced `extreme`.
fn zigzag<T, S>(values: &[f64], min_distance: Period, threshold: T, stamp: S) -> Vec<Pivot>
where
    T: Fn(usize, f64) -> f64,
    S: Fn(usize) -> i64,
{
    let n = values.len();
    let mut pivots = Vec::new();
    if n < 2 || n < 2 * min_distance.get() {
        return pivots;
    }

    let confirms = |mv: f64, needed: f64, extreme: f64| {
        mv.is_finite() && mv >= needed && mv > f64::EPSILON * extreme.abs().max(1.0)
    };
    let make = |index: usize, kind: PivotKind| Pivot {
        index,
        kind,
        price: values[index],
        timestamp: stamp(index),
    };

    // Undirected phase: track both extremes until the first swing confirms
    let (mut hi, mut lo) = (0usize, 0usize);
    let mut trend: Option<PivotKind> = None;
    let mut ext = 0usize;

    for i in 1..n {
        let v = values[i];
        match trend {
            None => {
                if v > values[hi] {
                    hi = i;
                }
                if v < values[lo] {
                    lo = i;
                }
                let swing = values[hi] - values[lo];
                if hi > lo && confirms(swing, threshold(i, values[lo]), values[lo]) {
                    push_pivot(&mut pivots, make(lo, PivotKind::Low), min_distance);
                    trend = Some(PivotKind::High);
                    ext = hi;
                } else if lo > hi && confirms(swing, threshold(i, values[hi]), values[hi]) {
                    push_pivot(&mut pivots, make(hi, PivotKind::High), min_distance);
                    trend = Some(PivotKind::Low);
                    ext = lo;
                }
            }
            // Rising: `ext` is the running high
            Some(PivotKind::High) => {
                if v > values[ext] {
                    ext = i;
                } else if confirms(values[ext] - v, threshold(i, values[ext]), values[ext]) {
                    push_pivot(&mut pivots, make(ext, PivotKind::High), min_distance);
                    ext = argmin(values, ext + 1, i);
                    trend = Some(PivotKind::Low);
                }
            }
            // Falling: `ext` is the running low
            Some(PivotKind::Low) => {
                if v < values[ext] {
                    ext = i;
                } else if confirms(v - values[ext], threshold(i, values[ext]), values[ext]) {
                    push_pivot(&mut pivots, make(ext, PivotKind::Low), min_distance);
                    ext = argmax(values, ext + 1, i);
                    trend = Some(PivotKind::High);
                }
            }
        }
    }
    pivots
}

/// Append while keeping kinds alternating and pivots `min_distance` apart
fn push_pivot(pivots: &mut Vec<Pivot>, pivot: Pivot, min_distance: Period) {
    match pivots.last_mut() {
        Some(last) if last.kind == pivot.kind => {
            let more_extreme = match pivot.kind {
                PivotKind::High => pivot.price > last.price,
                PivotKind::Low => pivot.price < last.price,
            };
            if more_extreme {
                *last = pivot;
            }
        }
        Some(last) if pivot.index - last.index < min_distance.get() => {}
        _ => pivots.push(pivot),
    }
}

fn argmin(values: &[f64], from: usize, to: usize) -> usize {
    (from..=to).fold(to, |best, j| if values[j] < values[best] { j } else { best })
}

fn argmax(values: &[f64], from: usize, to: usize) -> usize {
    (from..=to).fold(to, |best, j| if values[j] > values[best] { j } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{series_from_anchors, series_from_closes};

    fn pct(value: f64) -> Threshold {
        Threshold::Percent { value }
    }

    fn one() -> Period {
        Period::new(1).unwrap()
    }

    #[test]
    fn test_simple_swings() {
        let series = series_from_anchors(&[(0, 100.0), (10, 110.0), (20, 100.0), (30, 112.0)]);
        let pivots = detect_pivots(&series, &pct(3.0), one()).unwrap();
        let shape: Vec<(usize, PivotKind)> = pivots.iter().map(|p| (p.index, p.kind)).collect();
        assert_eq!(
            shape,
            vec![
                (0, PivotKind::Low),
                (10, PivotKind::High),
                (20, PivotKind::Low)
            ]
        );
        assert_eq!(pivots[1].price, 110.0);
        assert_eq!(pivots[1].timestamp, series.timestamp_at(10));
    }

    #[test]
    fn test_small_moves_ignored() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 0.5).collect();
        let series = series_from_closes(&closes);
        assert!(detect_pivots(&series, &pct(3.0), one()).unwrap().is_empty());
    }

    #[test]
    fn test_flat_series_has_no_pivots() {
        let series = series_from_closes(&[42.0; 50]);
        for threshold in [pct(1.0), Threshold::default(), Threshold::Absolute { value: 0.1 }] {
            assert!(detect_pivots(&series, &threshold, one()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_short_series_is_empty_not_error() {
        let series = series_from_closes(&[1.0, 5.0, 1.0, 5.0]);
        let pivots = detect_pivots(&series, &pct(1.0), Period::new(3).unwrap()).unwrap();
        assert!(pivots.is_empty());
    }

    #[test]
    fn test_min_distance_merges() {
        // The dip at 11-12 is too close to the high at 10 to stand on its own
        let series = series_from_anchors(&[
            (0, 100.0),
            (10, 120.0),
            (12, 110.0),
            (14, 125.0),
            (30, 100.0),
            (40, 100.0),
        ]);
        let pivots = detect_pivots(&series, &pct(3.0), Period::new(5).unwrap()).unwrap();
        let shape: Vec<(usize, PivotKind)> = pivots.iter().map(|p| (p.index, p.kind)).collect();
        assert_eq!(shape, vec![(0, PivotKind::Low), (14, PivotKind::High)]);
    }

    #[test]
    fn test_alternation_and_order() {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + (i as f64 * 0.17).sin() * 8.0 + (i as f64 * 0.05).cos() * 3.0)
            .collect();
        let series = series_from_closes(&closes);
        let pivots = detect_pivots(&series, &Threshold::default(), Period::new(3).unwrap()).unwrap();
        assert!(pivots.len() > 4);
        for pair in pivots.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind);
            assert!(pair[0].index < pair[1].index);
        }
    }

    #[test]
    fn test_raw_values_reject_atr() {
        let err = detect_pivots_in(&[1.0, 2.0, 1.0], &Threshold::default(), one()).unwrap_err();
        assert!(matches!(err, PatternError::InvalidConfig(_)));
    }

    #[test]
    fn test_raw_values_absolute() {
        let values = [0.0, 0.5, 1.0, 0.4, 0.0, 0.6, 1.0];
        let pivots = detect_pivots_in(&values, &Threshold::Absolute { value: 0.3 }, one()).unwrap();
        let idx: Vec<usize> = pivots.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![0, 2, 4]);
        assert_eq!(pivots[1].timestamp, 2);
    }

    #[test]
    fn test_invalid_threshold() {
        let series = series_from_closes(&[1.0; 10]);
        assert!(detect_pivots(&series, &pct(-1.0), one()).is_err());
        assert!(detect_pivots(&series, &Threshold::Absolute { value: f64::NAN }, one()).is_err());
    }

    #[test]
    fn test_atr_trailing_mean() {
        let series = series_from_closes(&[10.0, 10.0, 10.0, 10.0]);
        let atr = average_true_range(&series, Period::new(2).unwrap());
        assert_eq!(atr.len(), 4);
        for v in atr {
            assert!((v - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pivot_serializes_type() {
        let p = Pivot {
            index: 3,
            kind: PivotKind::High,
            price: 1.5,
            timestamp: 9,
        };
        let json = serde_json::to_value(p).unwrap();
        assert_eq!(json["type"], "HIGH");
    }
}
