//! Stratlab - strategy-grid backtesting with hierarchical portfolio aggregation.
//!
//! # Overview
//!
//! Stratlab sweeps every valid parameter combination of a set of indicator families
//! over every asset, turns each raw signal into a volatility-scaled position and a
//! strategy return series, then averages those series up a seven-level label
//! hierarchy into a single portfolio:
//!
//! - **Parameter grids**: typed parameter shapes with per-shape validity rules
//! - **Derived arrays**: prices, log-returns and volatility-adjusted returns, all
//!   lagged one step so signals never see the bar they trade on
//! - **Parallel execution**: indicator combos run on a `rayon` pool, each writing a
//!   disjoint column block of one preallocated matrix
//! - **Clustering**: hand-written cluster trees, or correlation-based grouping of
//!   assets with Ward linkage
//! - **Aggregation**: NaN-aware equal-weight means from strategy level to portfolio
//! - **Configuration files**: TOML sessions for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use stratlab::{config::SessionConfig, data::load_returns_csv, engine::Backtest};
//!
//! let config = SessionConfig::load("stratlab.toml").unwrap();
//! let returns = load_returns_csv("data/returns.csv").unwrap();
//!
//! let output = Backtest::new(config).run(&returns).unwrap();
//! let portfolio = output.levels.portfolio().unwrap();
//! println!("{} portfolio observations", portfolio.rows());
//! ```
//!
//! # Custom Indicators
//!
//! Implement [`Indicator`] and register a factory:
//!
//! ```
//! use std::sync::Arc;
//! use stratlab::derived::DerivedArrays;
//! use stratlab::indicator::{Indicator, IndicatorRegistry};
//! use stratlab::params::{ParamSet, ParamShape};
//! use stratlab::types::Matrix;
//!
//! struct AlwaysLong;
//!
//! impl Indicator for AlwaysLong {
//!     fn name(&self) -> &str {
//!         "AlwaysLong"
//!     }
//!
//!     fn shape(&self) -> ParamShape {
//!         ParamShape::Fixed
//!     }
//!
//!     fn execute(&self, data: &DerivedArrays, _params: &ParamSet) -> stratlab::Result<Matrix> {
//!         Ok(Matrix::filled(data.rows(), data.assets(), 1.0))
//!     }
//! }
//!
//! let mut registry = IndicatorRegistry::builtin();
//! registry
//!     .register("AlwaysLong", || Arc::new(AlwaysLong) as Arc<dyn Indicator>)
//!     .unwrap();
//! assert!(registry.contains("AlwaysLong"));
//! ```
//!
//! # Modules
//!
//! - [`types`]: Column-major matrices and the dated return table
//! - [`params`]: Parameter shapes, validity rules and grid expansion
//! - [`rolling`]: NaN-aware rolling, expanding and exponential statistics
//! - [`derived`]: Prices, log-returns and volatility-adjusted returns
//! - [`indicator`]: Indicator trait, registry and per-indicator parameter grids
//! - [`indicators`]: Built-in indicator families
//! - [`normalizer`]: Signal scaling, clipping and strategy returns
//! - [`executor`]: Column layout and the parallel strategy executor
//! - [`clusters`]: Cluster trees, strategy labels and correlation clustering
//! - [`aggregator`]: Level-by-level portfolio aggregation
//! - [`engine`]: End-to-end session runner
//! - [`analytics`]: Summary statistics and report formatting
//! - [`config`]: TOML session configuration
//! - [`data`]: CSV input and output

pub mod aggregator;
pub mod analytics;
pub mod clusters;
pub mod config;
pub mod data;
pub mod derived;
pub mod engine;
pub mod error;
pub mod executor;
pub mod indicator;
pub mod indicators;
pub mod normalizer;
pub mod params;
pub mod rolling;
pub mod types;

// Re-exports for convenience
pub use aggregator::{LevelFrame, PortfolioAggregator, PortfolioLevels, PORTFOLIO_LEVEL};
pub use analytics::{ResultFormatter, SeriesStats};
pub use clusters::{derive_clusters, ClusterPath, ClusterTree, StrategyIndex, StrategyLabel};
pub use config::SessionConfig;
pub use data::{load_returns_csv, write_levels};
pub use derived::{DerivedArrays, VolatilityConfig};
pub use engine::{Backtest, BacktestOutput, StrategyFrame};
pub use error::{BacktestError, Result};
pub use executor::{ColumnPlan, ExecutorConfig, ParallelStrategyExecutor};
pub use indicator::{Indicator, IndicatorDefinition, IndicatorRegistry};
pub use normalizer::{NormalizerConfig, SignalNormalizer};
pub use params::{ParamSet, ParamShape};
pub use types::{Matrix, ReturnMatrix};
