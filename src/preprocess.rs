//! Preprocessing: turn a bar series into the scalar series pivots and
//! similarity windows work on.

use serde::{Deserialize, Serialize};

use crate::{OHLCVExt, PatternError, Period, Result, Series};

/// Minimum bars any preparation accepts
pub const MIN_BARS: usize = 4;

/// Noise-reduction method applied to closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Smoothing {
    /// Raw closes
    #[default]
    Identity,
    /// Exponential moving average
    Ema { span: Period },
    /// Local least-squares polynomial fit
    SavitzkyGolay { window: Period, poly_order: usize },
    /// Heikin-Ashi closes
    HeikinAshi,
}

impl Smoothing {
    pub fn validate(&self) -> Result<()> {
        if let Smoothing::SavitzkyGolay { window, poly_order } = self {
            if window.get() < 3 || window.get() % 2 == 0 {
                return Err(PatternError::InvalidConfig(format!(
                    "savitzky-golay window must be odd and >= 3, got {}",
                    window.get()
                )));
            }
            if *poly_order >= window.get() {
                return Err(PatternError::InvalidConfig(format!(
                    "savitzky-golay poly_order {} must be below window {}",
                    poly_order,
                    window.get()
                )));
            }
        }
        Ok(())
    }
}

/// Smoothed (and optionally min-max normalized) closes of `series`.
///
/// Output length always equals input length.
pub fn prepare(series: &Series, smoothing: &Smoothing, normalize: bool) -> Result<Vec<f64>> {
    series.require(MIN_BARS)?;
    let closes = series.closes();

    let mut values = match *smoothing {
        Smoothing::Identity => closes,
        Smoothing::Ema { span } => ema(&closes, span),
        Smoothing::SavitzkyGolay { window, poly_order } => {
            savitzky_golay(&closes, window.get(), poly_order)
        }
        Smoothing::HeikinAshi => heikin_ashi(series),
    };

    if normalize {
        min_max_normalize(&mut values);
    }
    Ok(values)
}

/// Prepared values of any window of a series, computed without look-ahead.
///
/// A window ending at bar `end` only ever sees bars up to `end`, so a
/// reference window and a query over the same bars come out bit-identical.
/// Identity, EMA and Heikin-Ashi values are per-bar causal and computed
/// once. Savitzky-Golay looks both ways, so each window is smoothed on its
/// own slice of closes: the window plus half a smoothing width of earlier
/// bars, ending at `end`.
#[derive(Debug, Clone)]
pub struct CausalWindows {
    smoothing: Smoothing,
    /// Smoothed values, or raw closes for Savitzky-Golay
    base: Vec<f64>,
}

impl CausalWindows {
    pub fn new(series: &Series, smoothing: &Smoothing) -> Result<Self> {
        series.require(MIN_BARS)?;
        smoothing.validate()?;
        let base = match smoothing {
            Smoothing::SavitzkyGolay { .. } => series.closes(),
            _ => prepare(series, smoothing, false)?,
        };
        Ok(Self {
            smoothing: *smoothing,
            base,
        })
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Unnormalized values of bars `end + 1 - len ..= end`
    pub fn window(&self, end: usize, len: usize) -> Result<Vec<f64>> {
        let available = (end + 1).min(self.base.len());
        if len == 0 || available < len || end >= self.base.len() {
            return Err(PatternError::InsufficientData {
                need: len,
                got: available,
            });
        }
        let start = end + 1 - len;
        match self.smoothing {
            Smoothing::SavitzkyGolay { window, poly_order } => {
                let from = start.saturating_sub(window.get() / 2);
                let smoothed = savitzky_golay(&self.base[from..=end], window.get(), poly_order);
                Ok(smoothed[start - from..].to_vec())
            }
            _ => Ok(self.base[start..=end].to_vec()),
        }
    }
}

/// Exponential moving average seeded with the first value
pub fn ema(values: &[f64], span: Period) -> Vec<f64> {
    let alpha = 2.0 / (span.get() as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = match values.first() {
        Some(&v) => v,
        None => return out,
    };
    for &v in values {
        prev += alpha * (v - prev);
        out.push(prev);
    }
    out
}

/// Savitzky-Golay smoothing.
///
/// Each output point is the value at that point of the least-squares
/// polynomial fitted to the window around it. Near the edges the window is
/// clamped inside the series, so the fit is evaluated off-centre.
pub fn savitzky_golay(values: &[f64], window: usize, poly_order: usize) -> Vec<f64> {
    let n = values.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window < 3 {
        return values.to_vec();
    }
    let order = poly_order.min(window - 1);
    let half = window / 2;

    // Rows of the pseudo-inverse: coefficient c_k = sum_j m[k][j] * y_j,
    // with x centred on the window.
    let Some(m) = least_squares_operator(window, order) else {
        return values.to_vec();
    };

    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half).min(n - window);
            let x = i as f64 - (start + half) as f64;
            let ys = &values[start..start + window];
            let mut acc = 0.0;
            let mut xp = 1.0;
            for row in &m {
                let coef: f64 = row.iter().zip(ys).map(|(a, y)| a * y).sum();
                acc += coef * xp;
                xp *= x;
            }
            acc
        })
        .collect()
}

/// Solve (A^T A) M = A^T for the Vandermonde matrix of a centred window
fn least_squares_operator(window: usize, order: usize) -> Option<Vec<Vec<f64>>> {
    let half = (window / 2) as f64;
    let cols = order + 1;
    let xs: Vec<f64> = (0..window).map(|j| j as f64 - half).collect();

    // Augmented system [A^T A | A^T]
    let mut aug: Vec<Vec<f64>> = (0..cols)
        .map(|r| {
            let mut row = Vec::with_capacity(cols + window);
            for c in 0..cols {
                row.push(xs.iter().map(|x| x.powi((r + c) as i32)).sum());
            }
            for x in &xs {
                row.push(x.powi(r as i32));
            }
            row
        })
        .collect();

    // Gauss-Jordan with partial pivoting
    for col in 0..cols {
        let pivot = (col..cols).max_by(|&a, &b| {
            aug[a][col]
                .abs()
                .partial_cmp(&aug[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if aug[pivot][col].abs() < 1e-12 {
            return None;
        }
        aug.swap(col, pivot);
        let lead = aug[col][col];
        for v in aug[col].iter_mut() {
            *v /= lead;
        }
        for r in 0..cols {
            if r != col {
                let factor = aug[r][col];
                if factor != 0.0 {
                    for c in 0..cols + window {
                        aug[r][c] -= factor * aug[col][c];
                    }
                }
            }
        }
    }

    Some(aug.into_iter().map(|row| row[cols..].to_vec()).collect())
}

/// Heikin-Ashi close series.
///
/// The synthetic close is the four-price average of each bar. The synthetic
/// open recursion only shapes candle bodies and does not feed the close.
pub fn heikin_ashi(series: &Series) -> Vec<f64> {
    series.bars().iter().map(|b| b.four_price_average()).collect()
}

/// Scale into [0, 1] in place. A constant series maps to 0.5.
pub fn min_max_normalize(values: &mut [f64]) {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    let scale = hi.abs().max(lo.abs()).max(1.0);
    if !range.is_finite() || range <= 1e-12 * scale {
        values.iter_mut().for_each(|v| *v = 0.5);
        return;
    }
    values.iter_mut().for_each(|v| *v = (*v - lo) / range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::series_from_closes;
    use crate::Bar;

    #[test]
    fn test_identity_keeps_closes() {
        let series = series_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = prepare(&series, &Smoothing::Identity, false).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_too_few_bars() {
        let series = series_from_closes(&[1.0, 2.0, 3.0]);
        assert_eq!(
            prepare(&series, &Smoothing::Identity, false),
            Err(PatternError::InsufficientData { need: 4, got: 3 })
        );
    }

    #[test]
    fn test_normalize_bounds() {
        let series = series_from_closes(&[10.0, 20.0, 15.0, 30.0]);
        let out = prepare(&series, &Smoothing::Identity, true).unwrap();
        assert_eq!(out, vec![0.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn test_normalize_constant() {
        let series = series_from_closes(&[7.0; 6]);
        let out = prepare(&series, &Smoothing::Identity, true).unwrap();
        assert!(out.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_ema() {
        let out = ema(&[10.0, 10.0, 20.0], Period::new(3).unwrap());
        assert_eq!(out, vec![10.0, 10.0, 15.0]);
    }

    #[test]
    fn test_savitzky_golay_preserves_polynomials() {
        // Quadratic data is reproduced exactly by an order-2 fit
        let values: Vec<f64> = (0..15).map(|i| 0.5 * (i * i) as f64 - 3.0 * i as f64).collect();
        let out = savitzky_golay(&values, 5, 2);
        assert_eq!(out.len(), values.len());
        for (a, b) in out.iter().zip(&values) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn test_savitzky_golay_smooths_spike() {
        let mut values = vec![1.0; 11];
        values[5] = 10.0;
        let out = savitzky_golay(&values, 5, 1);
        assert!(out[5] < 10.0);
        assert!((out[5] - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_savitzky_golay_short_input() {
        let out = savitzky_golay(&[1.0, 3.0], 5, 2);
        assert_eq!(out, vec![1.0, 3.0]);
    }

    #[test]
    fn test_heikin_ashi_close_is_four_price_average() {
        let bars = vec![
            Bar::new(0, 10.0, 12.0, 9.0, 11.0, 1.0),
            Bar::new(1, 11.0, 15.0, 10.0, 14.0, 1.0),
            Bar::new(2, 14.0, 14.5, 11.0, 12.0, 1.0),
            Bar::new(3, 12.0, 13.0, 8.0, 9.0, 1.0),
        ];
        let series = Series::new(bars).unwrap();
        let out = prepare(&series, &Smoothing::HeikinAshi, false).unwrap();
        assert_eq!(out, vec![10.5, 12.5, 12.875, 10.5]);
    }

    #[test]
    fn test_ema_tracks_trend_with_lag() {
        // alpha = 2 / (4 + 1) = 0.4
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        let out = ema(&values, Period::new(4).unwrap());
        let expected = [10.0, 14.0, 20.4, 28.24, 36.944];
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
        assert!(out.iter().zip(&values).skip(1).all(|(e, v)| e < v));

        let series = series_from_closes(&values);
        let method = Smoothing::Ema {
            span: Period::new(4).unwrap(),
        };
        let prepared = prepare(&series, &method, false).unwrap();
        assert_eq!(prepared, out);
    }

    #[test]
    fn test_prepare_savitzky_golay_on_quadratic_closes() {
        let closes: Vec<f64> = (0..12)
            .map(|i| 100.0 + 0.25 * (i * i) as f64 - 2.0 * i as f64)
            .collect();
        let series = series_from_closes(&closes);
        let method = Smoothing::SavitzkyGolay {
            window: Period::new(5).unwrap(),
            poly_order: 2,
        };
        let out = prepare(&series, &method, false).unwrap();
        for (a, b) in out.iter().zip(&closes) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }

        // A linear fit cannot follow the curvature
        let linear = Smoothing::SavitzkyGolay {
            window: Period::new(5).unwrap(),
            poly_order: 1,
        };
        let flat = prepare(&series, &linear, false).unwrap();
        assert!((flat[6] - closes[6]).abs() > 0.1);
    }

    #[test]
    fn test_causal_windows_ignore_later_bars() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let full = series_from_closes(&closes);
        let cut = full.head(40);
        let methods = [
            Smoothing::Identity,
            Smoothing::Ema {
                span: Period::new(5).unwrap(),
            },
            Smoothing::SavitzkyGolay {
                window: Period::new(7).unwrap(),
                poly_order: 2,
            },
            Smoothing::HeikinAshi,
        ];
        for method in &methods {
            let a = CausalWindows::new(&full, method).unwrap().window(39, 12).unwrap();
            let b = CausalWindows::new(&cut, method).unwrap().window(39, 12).unwrap();
            assert_eq!(a.len(), 12);
            assert_eq!(a, b, "{method:?}");
        }
    }

    #[test]
    fn test_causal_windows_match_per_bar_smoothers() {
        let closes: Vec<f64> = (0..30).map(|i| 50.0 + (i % 7) as f64).collect();
        let series = series_from_closes(&closes);
        let method = Smoothing::Ema {
            span: Period::new(6).unwrap(),
        };
        let whole = prepare(&series, &method, false).unwrap();
        let window = CausalWindows::new(&series, &method).unwrap().window(24, 10).unwrap();
        assert_eq!(window, whole[15..=24].to_vec());
    }

    #[test]
    fn test_causal_window_too_early() {
        let series = series_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let windows = CausalWindows::new(&series, &Smoothing::Identity).unwrap();
        assert_eq!(
            windows.window(2, 5),
            Err(PatternError::InsufficientData { need: 5, got: 3 })
        );
        assert_eq!(windows.window(5, 6).unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(windows.window(6, 2).is_err());
    }

    #[test]
    fn test_smoothing_validation() {
        let bad = Smoothing::SavitzkyGolay {
            window: Period::new(4).unwrap(),
            poly_order: 2,
        };
        assert!(bad.validate().is_err());
        let good = Smoothing::SavitzkyGolay {
            window: Period::new(7).unwrap(),
            poly_order: 2,
        };
        assert!(good.validate().is_ok());
    }
}
