//! Parallel computation of strategy return columns.
//!
//! The executor preallocates one `rows x (assets * total_combos)` matrix and computes a
//! [`ColumnPlan`] before any work is dispatched. The plan assigns every
//! (indicator, combination) pair a contiguous column range; the ranges are checked to
//! tile the matrix exactly, and the matrix storage is then split into one mutable slice
//! per range. Workers only ever see their own slice, so output order is fixed by the
//! plan and never by completion order.
//!
//! Indicators run one after another. The combinations of one indicator run
//! concurrently on a rayon pool that lives for the whole run.

use crate::derived::DerivedArrays;
use crate::error::{BacktestError, Result};
use crate::indicator::IndicatorDefinition;
use crate::normalizer::SignalNormalizer;
use crate::params::ParamSet;
use crate::types::Matrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Pool size used when the host core count cannot be determined.
pub const DEFAULT_THREADS: usize = 8;

/// Worker pool settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker threads; 0 means one per host core.
    #[serde(default)]
    pub threads: usize,
}

impl ExecutorConfig {
    /// Resolved pool size.
    pub fn effective_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_THREADS)
        }
    }
}

/// One (indicator, parameter set, asset) column of the strategy matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyColumn {
    pub indicator: String,
    pub params: ParamSet,
    pub asset: String,
}

/// Column range owned by one (indicator, combination) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBlock {
    pub indicator: usize,
    pub combo: usize,
    pub columns: Range<usize>,
}

/// Assignment of disjoint column ranges, computed before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    assets: usize,
    blocks: Vec<ColumnBlock>,
}

impl ColumnPlan {
    /// Lay out `combo_counts[i]` blocks of `assets` columns for each indicator `i`, in
    /// indicator order then combination order.
    pub fn new(assets: usize, combo_counts: &[usize]) -> Self {
        let mut blocks = Vec::with_capacity(combo_counts.iter().sum());
        let mut start = 0;
        for (indicator, &count) in combo_counts.iter().enumerate() {
            for combo in 0..count {
                blocks.push(ColumnBlock {
                    indicator,
                    combo,
                    columns: start..start + assets,
                });
                start += assets;
            }
        }
        Self { assets, blocks }
    }

    pub fn blocks(&self) -> &[ColumnBlock] {
        &self.blocks
    }

    pub fn assets(&self) -> usize {
        self.assets
    }

    pub fn total_columns(&self) -> usize {
        self.blocks.last().map(|b| b.columns.end).unwrap_or(0)
    }

    /// True when no two blocks share a column.
    pub fn is_disjoint(&self) -> bool {
        let mut ranges: Vec<&Range<usize>> = self.blocks.iter().map(|b| &b.columns).collect();
        ranges.sort_by_key(|r| r.start);
        ranges.windows(2).all(|w| w[0].end <= w[1].start)
    }

    /// Check that the blocks tile `0..total_columns` in order with no gap or overlap.
    pub fn check(&self) -> Result<()> {
        let mut expected = 0;
        for block in &self.blocks {
            if block.columns.start != expected || block.columns.len() != self.assets {
                return Err(BacktestError::ShapeMismatch(format!(
                    "column block {:?} of indicator {} does not follow column {}",
                    block.columns, block.indicator, expected
                )));
            }
            expected = block.columns.end;
        }
        Ok(())
    }

    /// Split the matrix storage into one writable slice per block.
    pub fn split<'a>(&'a self, matrix: &'a mut Matrix) -> Result<Vec<(&'a ColumnBlock, &'a mut [f32])>> {
        self.check()?;
        if matrix.cols() != self.total_columns() {
            return Err(BacktestError::ShapeMismatch(format!(
                "plan covers {} columns, matrix has {}",
                self.total_columns(),
                matrix.cols()
            )));
        }
        let block_len = matrix.rows() * self.assets;
        let mut rest = matrix.as_mut_slice();
        let mut slices = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(block_len);
            slices.push((block, head));
            rest = tail;
        }
        Ok(slices)
    }
}

/// Counts finished combinations across workers.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    completed: AtomicU64,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Integer percent complete, 100 when there is nothing to do.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed().min(self.total) * 100 / self.total) as u8
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Wide strategy-return matrix plus the label of each column.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub returns: Matrix,
    pub columns: Vec<StrategyColumn>,
}

/// Runs every active indicator over its parameter combinations.
#[derive(Debug, Clone, Default)]
pub struct ParallelStrategyExecutor {
    config: ExecutorConfig,
    normalizer: SignalNormalizer,
}

impl ParallelStrategyExecutor {
    pub fn new(config: ExecutorConfig, normalizer: SignalNormalizer) -> Self {
        Self { config, normalizer }
    }

    /// Compute the realized returns of every strategy.
    ///
    /// Column order is indicator, then combination, then asset. `progress` receives the
    /// integer percent of finished combinations after each indicator. Any failure aborts
    /// the run and is wrapped with the indicator's name.
    pub fn run<F>(
        &self,
        indicators: &[IndicatorDefinition],
        data: &DerivedArrays,
        assets: &[String],
        progress: F,
    ) -> Result<ExecutionOutput>
    where
        F: Fn(u8, &str),
    {
        if assets.len() != data.assets() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{} asset names for {} derived columns",
                assets.len(),
                data.assets()
            )));
        }

        let active: Vec<&IndicatorDefinition> = indicators.iter().filter(|d| d.is_active()).collect();
        let combo_counts = active
            .iter()
            .map(|d| d.combos().map(|c| c.len()))
            .collect::<Result<Vec<_>>>()?;

        let plan = ColumnPlan::new(assets.len(), &combo_counts);
        let columns = self.labels(&active, &plan, assets)?;
        let mut returns = Matrix::nan(data.rows(), plan.total_columns());

        let threads = self.config.effective_threads();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let tracker = ProgressTracker::new(plan.blocks().len() as u64);
        info!(
            "Running {} indicators, {} strategy columns on {} threads",
            active.len(),
            plan.total_columns(),
            threads
        );

        {
            let mut slices = plan.split(&mut returns)?.into_iter();
            for (definition, &count) in active.iter().zip(&combo_counts) {
                let combos = definition.combos()?;
                let work: Vec<_> = slices.by_ref().take(count).collect();
                let started = Instant::now();

                pool.install(|| {
                    work.into_par_iter()
                        .zip(combos.par_iter())
                        .try_for_each(|((block, slice), params)| -> Result<()> {
                            debug!(
                                "{} {} -> columns {:?}",
                                definition.name(),
                                params,
                                block.columns
                            );
                            self.run_combination(definition, data, params, slice)?;
                            tracker.job_completed();
                            Ok(())
                        })
                })
                .map_err(|e| BacktestError::in_indicator(definition.name(), e))?;

                info!(
                    "Indicator {} finished: {} combinations in {:.2}s",
                    definition.name(),
                    count,
                    started.elapsed().as_secs_f64()
                );
                progress(tracker.percent(), definition.name());
            }
        }

        info!(
            "Computed {} strategy columns in {:.2}s",
            returns.cols(),
            tracker.elapsed_secs()
        );
        Ok(ExecutionOutput { returns, columns })
    }

    fn run_combination(
        &self,
        definition: &IndicatorDefinition,
        data: &DerivedArrays,
        params: &ParamSet,
        out: &mut [f32],
    ) -> Result<()> {
        let signal = definition.execute(data, params)?;
        let strategy = self
            .normalizer
            .strategy_returns(&signal, data.adjusted_returns())?;
        if strategy.as_slice().len() != out.len() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{} {} produced {} cells for a block of {}",
                definition.name(),
                params,
                strategy.as_slice().len(),
                out.len()
            )));
        }
        out.copy_from_slice(strategy.as_slice());
        Ok(())
    }

    fn labels(
        &self,
        active: &[&IndicatorDefinition],
        plan: &ColumnPlan,
        assets: &[String],
    ) -> Result<Vec<StrategyColumn>> {
        let mut columns = Vec::with_capacity(plan.total_columns());
        for block in plan.blocks() {
            let definition = active[block.indicator];
            let params = definition.combos()?[block.combo];
            for asset in assets {
                columns.push(StrategyColumn {
                    indicator: definition.name().to_string(),
                    params,
                    asset: asset.clone(),
                });
            }
        }
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::{Indicator, IndicatorRegistry};
    use crate::indicators::test_support::sample_data;
    use crate::normalizer::NormalizerConfig;
    use crate::params::ParamShape;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn executor() -> ParallelStrategyExecutor {
        ParallelStrategyExecutor::new(
            ExecutorConfig { threads: 2 },
            SignalNormalizer::new(NormalizerConfig {
                min_periods: 5,
                clip: 2.0,
            }),
        )
    }

    fn definition(name: &str, grid: &[(&str, Vec<i64>)]) -> IndicatorDefinition {
        let indicator = IndicatorRegistry::builtin().create(name).unwrap();
        let grid: BTreeMap<String, Vec<i64>> =
            grid.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let mut def = IndicatorDefinition::new(indicator, true, grid);
        def.get_valid_pairs().unwrap();
        def
    }

    fn assets(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{}", i)).collect()
    }

    #[test]
    fn test_plan_layout() {
        let plan = ColumnPlan::new(4, &[3, 2]);
        assert_eq!(plan.total_columns(), 20);
        assert_eq!(plan.blocks()[0].columns, 0..4);
        assert_eq!(plan.blocks()[1].columns, 4..8);
        assert_eq!(plan.blocks()[3].columns, 12..16);
        assert_eq!(plan.blocks()[3].indicator, 1);
        assert_eq!(plan.blocks()[4].columns, 16..20);
        assert!(plan.is_disjoint());
        assert!(plan.check().is_ok());
    }

    #[test]
    fn test_split_rejects_wrong_width() {
        let plan = ColumnPlan::new(2, &[2]);
        let mut matrix = Matrix::nan(3, 5);
        assert!(plan.split(&mut matrix).is_err());
    }

    #[test]
    fn test_split_slices_match_blocks() {
        let plan = ColumnPlan::new(2, &[1, 1]);
        let mut matrix = Matrix::nan(3, 4);
        {
            let slices = plan.split(&mut matrix).unwrap();
            assert_eq!(slices.len(), 2);
            for (block, slice) in slices {
                assert_eq!(slice.len(), 6);
                slice.fill(block.indicator as f32);
            }
        }
        assert_eq!(matrix.column(1), &[0.0, 0.0, 0.0]);
        assert_eq!(matrix.column(2), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_column_layout_and_labels() {
        let data = sample_data(80, 4);
        let defs = vec![
            definition("MovingAverageCrossover", &[("short", vec![2, 4, 8]), ("long", vec![32])]),
            definition("VolatilityMomentum", &[("window", vec![10, 20])]),
        ];
        let out = executor().run(&defs, &data, &assets(4), |_, _| {}).unwrap();
        assert_eq!(out.returns.shape(), (80, 20));
        assert_eq!(out.columns.len(), 20);
        assert_eq!(out.columns[0].indicator, "MovingAverageCrossover");
        assert_eq!(out.columns[0].params.label(), "2_32");
        assert_eq!(out.columns[3].asset, "A3");
        assert_eq!(out.columns[4].params.label(), "4_32");
        assert_eq!(out.columns[12].indicator, "VolatilityMomentum");
        assert_eq!(out.columns[19].params.label(), "20");
    }

    #[test]
    fn test_output_independent_of_thread_count() {
        let data = sample_data(80, 3);
        let defs = vec![definition(
            "MovingAverageCrossover",
            &[("short", vec![2, 3, 4, 5, 6]), ("long", vec![24, 32])],
        )];
        let single = ParallelStrategyExecutor::new(
            ExecutorConfig { threads: 1 },
            SignalNormalizer::new(NormalizerConfig { min_periods: 5, clip: 2.0 }),
        )
        .run(&defs, &data, &assets(3), |_, _| {})
        .unwrap();
        let many = executor().run(&defs, &data, &assets(3), |_, _| {}).unwrap();
        assert_eq!(single.columns, many.columns);
        for (a, b) in single.returns.as_slice().iter().zip(many.returns.as_slice()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[test]
    fn test_progress_reported_per_indicator() {
        let data = sample_data(40, 2);
        let defs = vec![
            definition("FixedBias", &[("bias", vec![1])]),
            definition("VolatilityMomentum", &[("window", vec![5])]),
        ];
        let seen = Mutex::new(Vec::new());
        executor()
            .run(&defs, &data, &assets(2), |pct, msg| {
                seen.lock().unwrap().push((pct, msg.to_string()));
            })
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![(50, "FixedBias".to_string()), (100, "VolatilityMomentum".to_string())]);
    }

    #[test]
    fn test_inactive_indicators_skipped() {
        let data = sample_data(40, 2);
        let mut inactive = IndicatorDefinition::new(
            IndicatorRegistry::builtin().create("FixedBias").unwrap(),
            false,
            BTreeMap::from([("bias".to_string(), vec![1])]),
        );
        inactive.get_valid_pairs().unwrap();
        let defs = vec![inactive, definition("VolatilityMomentum", &[("window", vec![5])])];
        let out = executor().run(&defs, &data, &assets(2), |_, _| {}).unwrap();
        assert_eq!(out.returns.cols(), 2);
        assert!(out.columns.iter().all(|c| c.indicator == "VolatilityMomentum"));
    }

    struct Failing;

    impl Indicator for Failing {
        fn name(&self) -> &str {
            "Failing"
        }

        fn shape(&self) -> ParamShape {
            ParamShape::Fixed
        }

        fn execute(&self, _: &DerivedArrays, _: &ParamSet) -> Result<Matrix> {
            Err(BacktestError::InvalidInput("boom".to_string()))
        }
    }

    #[test]
    fn test_failure_names_indicator() {
        let data = sample_data(20, 2);
        let mut def = IndicatorDefinition::new(
            Arc::new(Failing),
            true,
            BTreeMap::from([("bias".to_string(), vec![1, 2])]),
        );
        def.get_valid_pairs().unwrap();
        let err = executor().run(&[def], &data, &assets(2), |_, _| {}).unwrap_err();
        match err {
            BacktestError::ExecutionError { indicator, .. } => assert_eq!(indicator, "Failing"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_combos_rejected() {
        let data = sample_data(20, 1);
        let def = IndicatorDefinition::new(
            IndicatorRegistry::builtin().create("FixedBias").unwrap(),
            true,
            BTreeMap::from([("bias".to_string(), vec![1])]),
        );
        assert!(executor().run(&[def], &data, &assets(1), |_, _| {}).is_err());
    }

    #[test]
    fn test_asset_count_checked() {
        let data = sample_data(20, 2);
        let defs = vec![definition("FixedBias", &[("bias", vec![1])])];
        assert!(matches!(
            executor().run(&defs, &data, &assets(3), |_, _| {}),
            Err(BacktestError::ShapeMismatch(_))
        ));
    }
}
