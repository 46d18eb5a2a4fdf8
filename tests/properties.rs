//! Property tests for engine invariants.

use chartpat::prelude::*;
use proptest::prelude::*;

fn series_from_closes(closes: &[f64]) -> Series {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let o = if i == 0 { c } else { closes[i - 1] };
            Bar::new(i as i64 * 60, o, o.max(c) * 1.001, o.min(c) * 0.999, c, 1_000.0)
        })
        .collect();
    Series::new(bars).unwrap()
}

/// Random walk of `steps` percent moves starting at 100
fn walk(steps: &[f64]) -> Vec<f64> {
    let mut price = 100.0;
    steps
        .iter()
        .map(|s| {
            price *= 1.0 + s / 100.0;
            price
        })
        .collect()
}

fn steps(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-4.0f64..4.0, len)
}

fn smoothing() -> impl Strategy<Value = Smoothing> {
    prop_oneof![
        Just(Smoothing::Identity),
        (2usize..20).prop_map(|span| Smoothing::Ema {
            span: Period::new(span).unwrap()
        }),
        (1usize..6).prop_map(|k| Smoothing::SavitzkyGolay {
            window: Period::new(2 * k + 1).unwrap(),
            poly_order: 2,
        }),
        Just(Smoothing::HeikinAshi),
    ]
}

fn window(i: usize) -> HistoricalWindow {
    HistoricalWindow {
        start_index: i,
        end_index: i + 1,
        start_timestamp: i as i64,
        end_timestamp: i as i64 + 1,
        values: vec![0.0, 1.0],
        direction: Direction::Up,
        forward_returns: Vec::new(),
        pivot_count: 4,
    }
}

proptest! {
    #[test]
    fn prop_prepare_is_deterministic(s in steps(4..200), method in smoothing(), normalize in any::<bool>()) {
        let series = series_from_closes(&walk(&s));
        let a = prepare(&series, &method, normalize).unwrap();
        let b = prepare(&series, &method, normalize).unwrap();
        prop_assert_eq!(a.len(), series.len());
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        prop_assert_eq!(bits(&a), bits(&b));
        if normalize {
            prop_assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn prop_pivots_alternate(s in steps(10..400), pct in 1.0f64..8.0, gap in 1usize..6) {
        let series = series_from_closes(&walk(&s));
        let pivots = detect_pivots(
            &series,
            &Threshold::Percent { value: pct },
            Period::new(gap).unwrap(),
        )
        .unwrap();
        for w in pivots.windows(2) {
            prop_assert_ne!(w[0].kind, w[1].kind);
            prop_assert!(w[0].index < w[1].index);
        }
    }

    #[test]
    fn prop_scores_sum_to_breakdown(s in steps(40..300)) {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let series = series_from_closes(&walk(&s));
        for p in engine.detect(&series).unwrap() {
            let sum: f64 = p.scoring_breakdown().values().sum();
            prop_assert!((sum - p.score()).abs() < 1e-9);
            prop_assert!((0.0..=100.0).contains(&p.score()));
        }
    }

    #[test]
    fn prop_breakdown_clamped(g in -50.0f64..150.0, c in -50.0f64..150.0, f in -50.0f64..150.0) {
        let breakdown = ScoreBreakdown::new(g, c, f);
        let sum: f64 = breakdown.to_map().values().sum();
        prop_assert!((sum - breakdown.total()).abs() < 1e-9);
        prop_assert!((0.0..=100.0).contains(&breakdown.total()));
    }

    #[test]
    fn prop_dtw_identity_and_symmetry(
        a in prop::collection::vec(0.0f64..1.0, 1..40),
        b in prop::collection::vec(0.0f64..1.0, 1..40),
        band in prop::option::of(0usize..8),
    ) {
        prop_assert_eq!(dtw_distance(&a, &a, band), 0.0);
        let ab = dtw_distance(&a, &b, band);
        let ba = dtw_distance(&b, &a, band);
        prop_assert!(ab.is_finite());
        prop_assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn prop_weights_sum_to_one(
        entries in prop::collection::vec((0.0f64..100.0, -10.0f64..10.0), 0..15),
        top_n in 1usize..10,
    ) {
        let windows: Vec<HistoricalWindow> = (0..entries.len()).map(window).collect();
        let matches: Vec<SimilarityMatch<'_>> = windows
            .iter()
            .zip(&entries)
            .map(|(w, &(confidence, pct))| SimilarityMatch {
                reference: w,
                distance: 0.0,
                confidence,
                expected_move_pct: pct,
                expected_price: 100.0 + pct,
            })
            .collect();
        let agg = aggregate(&matches, top_n);
        if matches.is_empty() {
            prop_assert!(agg.is_empty());
        } else {
            prop_assert_eq!(agg.matches.len(), matches.len().min(top_n));
            let total: f64 = agg.weights.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            let (lo, hi) = agg.forecast_interval;
            prop_assert!(lo <= agg.expected_move_pct + 1e-12 && agg.expected_move_pct <= hi + 1e-12);
        }
    }
}
