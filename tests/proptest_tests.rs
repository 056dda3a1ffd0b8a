//! Property-based tests for parameter grids, column layout, look-ahead safety and
//! aggregation.
//!
//! These tests verify that:
//! 1. Parameter validity rules and grid expansion agree for any grid
//! 2. Column blocks always tile the strategy matrix without overlap
//! 3. Derived arrays and signals at row t never depend on returns after t
//! 4. Aggregation means skip missing cells and drop empty rows

use chrono::NaiveDate;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use stratlab::aggregator::{LevelFrame, PortfolioAggregator};
use stratlab::clusters::{ClusterTree, DEFAULT_CLUSTER};
use stratlab::derived::{DerivedArrays, VolatilityConfig};
use stratlab::executor::ColumnPlan;
use stratlab::indicator::{Indicator, IndicatorDefinition, IndicatorRegistry};
use stratlab::params::{cartesian_product, ParamSet, ParamShape, Validate};
use stratlab::types::Matrix;

// ============================================================================
// Parameter Property Tests
// ============================================================================

proptest! {
    #[test]
    fn trend_rule_matches_definition(short in -5i64..50, long in -5i64..200) {
        let set = ParamShape::Trend.build(&[short, long]).unwrap();
        prop_assert_eq!(set.validate(), short >= 1 && short * 4 <= long);
    }

    #[test]
    fn smoothed_rule_matches_definition(smoothing in -2i64..20, window in -2i64..200) {
        let set = ParamShape::Smoothed.build(&[smoothing, window]).unwrap();
        let expected = smoothing >= 1
            && window >= 3
            && (smoothing == 1 || smoothing * 8 <= window);
        prop_assert_eq!(set.validate(), expected);
    }

    #[test]
    fn composite_valid_only_when_parts_valid(
        short in 1i64..30,
        long in 1i64..120,
        acceleration in -2i64..10,
    ) {
        let set = ParamShape::TrendAcceleration.build(&[short, long, acceleration]).unwrap();
        let trend = ParamShape::Trend.build(&[short, long]).unwrap();
        let lag = ParamShape::Acceleration.build(&[acceleration]).unwrap();
        prop_assert_eq!(set.validate(), trend.validate() && lag.validate());
    }

    #[test]
    fn cartesian_product_size(lists in prop::collection::vec(prop::collection::vec(0i64..100, 1..5), 0..4)) {
        let product = cartesian_product(&lists);
        let expected: usize = lists.iter().map(|l| l.len()).product();
        prop_assert_eq!(product.len(), expected);
        for combo in &product {
            prop_assert_eq!(combo.len(), lists.len());
        }
    }

    #[test]
    fn grid_keeps_exactly_the_valid_pairs(
        shorts in prop::collection::btree_set(1i64..40, 1..5),
        longs in prop::collection::btree_set(1i64..160, 1..5),
    ) {
        let registry = IndicatorRegistry::builtin();
        let mut grid = BTreeMap::new();
        grid.insert("short".to_string(), shorts.iter().copied().collect::<Vec<_>>());
        grid.insert("long".to_string(), longs.iter().copied().collect::<Vec<_>>());
        let mut definition = IndicatorDefinition::new(
            registry.create("MovingAverageCrossover").unwrap(),
            true,
            grid,
        );

        let expected: BTreeSet<(i64, i64)> = shorts
            .iter()
            .flat_map(|&s| longs.iter().map(move |&l| (s, l)))
            .filter(|&(s, l)| s * 4 <= l)
            .collect();

        match definition.get_valid_pairs() {
            Ok(combos) => {
                let got: BTreeSet<(i64, i64)> = combos
                    .iter()
                    .map(|c| match c {
                        ParamSet::Trend(t) => (t.short, t.long),
                        other => panic!("unexpected shape {:?}", other),
                    })
                    .collect();
                prop_assert_eq!(got, expected);
            }
            Err(_) => prop_assert!(expected.is_empty()),
        }
    }
}

// ============================================================================
// Column Layout Property Tests
// ============================================================================

proptest! {
    #[test]
    fn column_plan_tiles_matrix(
        assets in 1usize..6,
        combos in prop::collection::vec(0usize..5, 1..5),
        rows in 1usize..8,
    ) {
        let plan = ColumnPlan::new(assets, &combos);
        prop_assert!(plan.is_disjoint());
        prop_assert!(plan.check().is_ok());
        prop_assert_eq!(plan.total_columns(), assets * combos.iter().sum::<usize>());

        let mut matrix = Matrix::nan(rows, plan.total_columns());
        let slices = plan.split(&mut matrix).unwrap();
        prop_assert_eq!(slices.len(), plan.blocks().len());
        for (_, slice) in slices {
            prop_assert_eq!(slice.len(), rows * assets);
            slice.fill(1.0);
        }
        prop_assert_eq!(matrix.count_valid(), rows * plan.total_columns());
    }
}

// ============================================================================
// Look-ahead Property Tests
// ============================================================================

fn returns_from(values: &[f32], cols: usize) -> Matrix {
    let rows = values.len() / cols;
    let columns = (0..cols)
        .map(|c| values[c * rows..(c + 1) * rows].to_vec())
        .collect();
    Matrix::from_columns(columns).unwrap()
}

fn small_volatility() -> VolatilityConfig {
    VolatilityConfig {
        short_windows: vec![3, 6],
        long_windows: vec![12],
        ..Default::default()
    }
}

fn same(a: f32, b: f32) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn derived_arrays_ignore_future_returns(
        values in prop::collection::vec(-3.0f32..3.0, 60),
        cut in 5usize..29,
        noise in prop::collection::vec(-3.0f32..3.0, 60),
    ) {
        let original = returns_from(&values, 2);
        let mut perturbed_values = values.clone();
        for c in 0..2 {
            for t in cut + 1..30 {
                perturbed_values[c * 30 + t] = noise[c * 30 + t];
            }
        }
        let perturbed = returns_from(&perturbed_values, 2);

        let config = small_volatility();
        let a = DerivedArrays::compute(&original, &config).unwrap();
        let b = DerivedArrays::compute(&perturbed, &config).unwrap();

        for c in 0..2 {
            for t in 0..=cut {
                prop_assert!(same(a.prices().get(t, c), b.prices().get(t, c)));
                prop_assert!(same(a.log_returns().get(t, c), b.log_returns().get(t, c)));
                prop_assert!(same(a.adjusted_returns().get(t, c), b.adjusted_returns().get(t, c)));
            }
            // Row cut + 1 still only sees returns up to cut
            prop_assert!(same(a.prices().get(cut + 1, c), b.prices().get(cut + 1, c)));
            prop_assert!(same(a.log_returns().get(cut + 1, c), b.log_returns().get(cut + 1, c)));
        }
    }

    #[test]
    fn crossover_signal_ignores_future_returns(
        values in prop::collection::vec(-2.0f32..2.0, 40),
        cut in 5usize..38,
    ) {
        let original = returns_from(&values, 1);
        let mut perturbed_values = values.clone();
        for v in perturbed_values.iter_mut().skip(cut + 1) {
            *v = -*v + 0.5;
        }
        let perturbed = returns_from(&perturbed_values, 1);

        let config = small_volatility();
        let indicator = IndicatorRegistry::builtin().create("MovingAverageCrossover").unwrap();
        let params = ParamShape::Trend.build(&[2, 8]).unwrap();
        let a = indicator.execute(&DerivedArrays::compute(&original, &config).unwrap(), &params).unwrap();
        let b = indicator.execute(&DerivedArrays::compute(&perturbed, &config).unwrap(), &params).unwrap();

        for t in 0..=cut + 1 {
            prop_assert!(same(a.get(t, 0), b.get(t, 0)), "row {} differs", t);
        }
    }
}

// ============================================================================
// Aggregation Property Tests
// ============================================================================

fn dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
}

fn maybe_value() -> impl Strategy<Value = f32> {
    prop_oneof![
        1 => Just(f32::NAN),
        3 => -5.0f32..5.0,
    ]
}

proptest! {
    #[test]
    fn portfolio_is_nan_skipping_row_mean(
        rows in 1usize..12,
        cols in 1usize..5,
        cells in prop::collection::vec(maybe_value(), 60),
    ) {
        let values = Matrix::from_columns(
            (0..cols)
                .map(|c| cells[c * rows..(c + 1) * rows].to_vec())
                .collect(),
        )
        .unwrap();
        let labels = (0..cols).map(|c| vec![format!("s{}", c)]).collect();
        let frame = LevelFrame::new("strategies", dates(rows), labels, values.clone()).unwrap();

        let portfolio = PortfolioAggregator::new().row_mean(&frame).unwrap();
        let kept: Vec<usize> = (0..rows).filter(|&r| !values.row_is_empty(r)).collect();
        prop_assert_eq!(portfolio.rows(), kept.len());

        for (out_row, &r) in kept.iter().enumerate() {
            let valid: Vec<f32> = values.row(r).into_iter().filter(|v| !v.is_nan()).collect();
            let expected = valid.iter().map(|&v| v as f64).sum::<f64>() / valid.len() as f64;
            let actual = portfolio.values().get(out_row, 0) as f64;
            prop_assert!((actual - expected).abs() < 1e-4);
            prop_assert_eq!(portfolio.dates()[out_row], frame.dates()[r]);
        }
    }

    #[test]
    fn unclustered_leaves_get_a_stable_default(names in prop::collection::vec("[a-z]{1,6}", 1..6)) {
        let mut tree = ClusterTree::new();
        for name in &names {
            let first = tree.path(name);
            let second = tree.path(name);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.cluster.as_str(), DEFAULT_CLUSTER);
            prop_assert_eq!(first.subcluster.as_str(), DEFAULT_CLUSTER);
            prop_assert!(tree.contains(name));
        }
        prop_assert!(tree.validate().is_ok());
    }
}
