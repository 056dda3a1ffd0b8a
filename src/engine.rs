//! Backtest session: configuration to nested portfolios in one call.

use crate::aggregator::{PortfolioAggregator, PortfolioLevels};
use crate::clusters::{derive_clusters, ClusterTree, StrategyIndex};
use crate::config::SessionConfig;
use crate::derived::DerivedArrays;
use crate::error::Result;
use crate::executor::ParallelStrategyExecutor;
use crate::indicator::IndicatorRegistry;
use crate::normalizer::SignalNormalizer;
use crate::types::{Matrix, ReturnMatrix};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::info;

/// Share of the progress range spent computing strategies; aggregation gets the rest.
const EXECUTION_SHARE: u32 = 80;

/// Realized returns of every strategy with their labels.
#[derive(Debug, Clone)]
pub struct StrategyFrame {
    dates: Vec<NaiveDate>,
    index: StrategyIndex,
    returns: Matrix,
}

impl StrategyFrame {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn index(&self) -> &StrategyIndex {
        &self.index
    }

    pub fn returns(&self) -> &Matrix {
        &self.returns
    }

    /// Labels of all columns, joined with `/`.
    pub fn column_names(&self) -> Vec<String> {
        self.index.labels().iter().map(|l| l.to_string()).collect()
    }

    /// Return column of one strategy, looked up by its joined label.
    pub fn column_by_label(&self, label: &str) -> Option<&[f32]> {
        self.index.position(label).map(|c| self.returns.column(c))
    }
}

/// Everything a session produces.
#[derive(Debug, Clone)]
pub struct BacktestOutput {
    pub strategies: StrategyFrame,
    pub levels: PortfolioLevels,
    /// Asset tree after default assignment (or derived, with automatic clustering).
    pub asset_clusters: ClusterTree,
    pub indicator_clusters: ClusterTree,
}

/// One configured backtest session.
pub struct Backtest {
    config: SessionConfig,
    registry: IndicatorRegistry,
    show_progress: bool,
}

impl Backtest {
    /// Session over the built-in indicators.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_registry(config, IndicatorRegistry::builtin())
    }

    pub fn with_registry(config: SessionConfig, registry: IndicatorRegistry) -> Self {
        Self {
            config,
            registry,
            show_progress: false,
        }
    }

    /// Draw a terminal progress bar while running.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn run(&self, returns: &ReturnMatrix) -> Result<BacktestOutput> {
        self.run_with_progress(returns, |_, _| {})
    }

    /// Run the session, reporting `(percent, message)` as it goes.
    ///
    /// Configuration is fully resolved before any numeric work; the first error aborts
    /// the session and nothing partial is returned.
    pub fn run_with_progress<F>(&self, returns: &ReturnMatrix, progress: F) -> Result<BacktestOutput>
    where
        F: Fn(u8, &str),
    {
        let started = Instant::now();
        self.config.validate()?;
        let definitions = self.config.resolve_indicators(&self.registry)?;
        let selected = self.config.select_returns(returns)?;
        info!(
            "Running session: {} assets x {} rows, {} indicators",
            selected.assets().len(),
            selected.len(),
            definitions.len()
        );

        let bar = if self.show_progress {
            let pb = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };
        let report = |percent: u8, message: &str| {
            if let Some(ref pb) = bar {
                pb.set_position(percent as u64);
                pb.set_message(message.to_string());
            }
            progress(percent, message);
        };

        let data = DerivedArrays::compute(selected.values(), &self.config.volatility)?;

        let executor = ParallelStrategyExecutor::new(
            self.config.executor.clone(),
            SignalNormalizer::new(self.config.normalizer.clone()),
        );
        let output = executor.run(&definitions, &data, selected.assets(), |percent, message| {
            report(scale(percent, 0, EXECUTION_SHARE), message)
        })?;

        let mut asset_clusters = if self.config.clustering.auto {
            let groups = derive_clusters(
                selected.values(),
                selected.assets(),
                self.config.clustering.max_clusters,
            )?;
            info!("Using {} derived asset clusters", groups.len());
            ClusterTree::from_groups(&groups)
        } else {
            self.config.asset_clusters.clone()
        };
        let mut indicator_clusters = self.config.indicator_clusters.clone();
        let index = StrategyIndex::build(&output.columns, &mut asset_clusters, &mut indicator_clusters);

        let levels = PortfolioAggregator::new().aggregate(
            &output.returns,
            selected.dates(),
            &index,
            |percent, message| report(scale(percent, EXECUTION_SHARE, 100), message),
        )?;

        if let Some(pb) = bar {
            pb.finish_with_message("done");
        }
        info!(
            "Session finished in {:.2}s: {} strategies, {} levels",
            started.elapsed().as_secs_f64(),
            output.returns.cols(),
            levels.len()
        );

        Ok(BacktestOutput {
            strategies: StrategyFrame {
                dates: selected.dates().to_vec(),
                index,
                returns: output.returns,
            },
            levels,
            asset_clusters,
            indicator_clusters,
        })
    }
}

/// Map a 0-100 percent into `[from, to]`.
fn scale(percent: u8, from: u32, to: u32) -> u8 {
    (from + percent.min(100) as u32 * (to - from) / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::sample_returns;
    use std::sync::Mutex;

    fn table(rows: usize, names: &[&str]) -> ReturnMatrix {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let dates = (0..rows)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        ReturnMatrix::new(
            dates,
            names.iter().map(|s| s.to_string()).collect(),
            sample_returns(rows, names.len()),
        )
        .unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig::from_toml_str(
            r#"
[assets]
A = true
B = true
C = false

[indicators.MovingAverageCrossover.params]
short = [2, 4]
long = [16]

[indicators.VolatilityMomentum.params]
window = [8]

[asset_clusters.group.one]
members = ["A"]

[volatility]
short_windows = [4, 8]
long_windows = [32]

[normalizer]
min_periods = 10
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale(0, 0, 80), 0);
        assert_eq!(scale(100, 0, 80), 80);
        assert_eq!(scale(50, 80, 100), 90);
    }

    #[test]
    fn test_session_shapes() {
        let output = Backtest::new(config()).run(&table(120, &["A", "B", "C"])).unwrap();
        assert_eq!(output.strategies.returns().shape(), (120, 6));
        assert_eq!(output.levels.len(), 8);
        assert!(output.levels.portfolio().is_some());
        // B was not configured and lands in the default bucket
        assert_eq!(output.asset_clusters.lookup("B"), Some(("default", "default")));
        let name = "group/one/A/default/default/MovingAverageCrossover/2_16";
        assert!(output.strategies.column_by_label(name).is_some());
    }

    #[test]
    fn test_progress_is_monotonic_and_complete() {
        let seen = Mutex::new(Vec::new());
        Backtest::new(config())
            .run_with_progress(&table(80, &["A", "B", "C"]), |p, _| seen.lock().unwrap().push(p))
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.first(), Some(&52));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_auto_clustering() {
        let mut config = config();
        config.clustering.auto = true;
        config.clustering.max_clusters = 1;
        let output = Backtest::new(config).run(&table(80, &["A", "B", "C"])).unwrap();
        assert_eq!(output.asset_clusters.lookup("A"), Some(("cluster_1", "cluster_1")));
        assert_eq!(output.levels.get("assets-clusters").unwrap().cols(), 1);
    }

    #[test]
    fn test_missing_asset_column_fails() {
        let result = Backtest::new(config()).run(&table(40, &["A", "C"]));
        assert!(result.is_err());
    }
}
