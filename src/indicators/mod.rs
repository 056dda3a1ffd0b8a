//! Built-in indicators.
//!
//! - [`FixedBias`]: constant position, the degenerate baseline
//! - [`MovingAverageCrossover`]: fast/slow EMA spread
//! - [`MomentumAcceleration`]: change of the crossover signal over a lag
//! - [`VolatilityScaledTrend`]: crossover divided by recent log-return volatility
//! - [`VolatilityMomentum`]: t-statistic of cumulative log-returns
//! - [`SkewReversal`]: smoothed negative rolling skew
//! - [`KurtosisTrend`]: smoothed rolling kurtosis signed by the crossover
//!
//! Every indicator reads the shifted prices/log-returns of [`DerivedArrays`], so its
//! signal at row `t` uses only information from rows before `t`.

mod fixed_bias;
mod moments;
mod trend;
mod volatility;

pub use fixed_bias::FixedBias;
pub use moments::{KurtosisTrend, SkewReversal};
pub use trend::{MomentumAcceleration, MovingAverageCrossover, VolatilityScaledTrend};
pub use volatility::VolatilityMomentum;

use crate::derived::DerivedArrays;
use crate::error::{BacktestError, Result};
use crate::indicator::{Indicator, IndicatorFactory};
use crate::params::{window, ParamSet, TrendParams};
use crate::rolling::ewm_mean;
use crate::types::Matrix;
use std::sync::Arc;

fn fixed_bias() -> Arc<dyn Indicator> {
    Arc::new(FixedBias)
}

fn moving_average_crossover() -> Arc<dyn Indicator> {
    Arc::new(MovingAverageCrossover)
}

fn momentum_acceleration() -> Arc<dyn Indicator> {
    Arc::new(MomentumAcceleration)
}

fn volatility_scaled_trend() -> Arc<dyn Indicator> {
    Arc::new(VolatilityScaledTrend)
}

fn volatility_momentum() -> Arc<dyn Indicator> {
    Arc::new(VolatilityMomentum)
}

fn skew_reversal() -> Arc<dyn Indicator> {
    Arc::new(SkewReversal)
}

fn kurtosis_trend() -> Arc<dyn Indicator> {
    Arc::new(KurtosisTrend)
}

/// Static name → factory table behind [`crate::indicator::IndicatorRegistry::builtin`].
pub const BUILTIN_INDICATORS: &[(&str, IndicatorFactory)] = &[
    ("FixedBias", fixed_bias as IndicatorFactory),
    ("MovingAverageCrossover", moving_average_crossover as IndicatorFactory),
    ("MomentumAcceleration", momentum_acceleration as IndicatorFactory),
    ("VolatilityScaledTrend", volatility_scaled_trend as IndicatorFactory),
    ("VolatilityMomentum", volatility_momentum as IndicatorFactory),
    ("SkewReversal", skew_reversal as IndicatorFactory),
    ("KurtosisTrend", kurtosis_trend as IndicatorFactory),
];

/// Error for a parameter set of the wrong family.
pub(crate) fn wrong_params(indicator: &str, params: &ParamSet) -> BacktestError {
    BacktestError::InvalidInput(format!(
        "{} cannot run with {} parameters",
        indicator,
        params.shape()
    ))
}

/// Apply `f` to every asset column of `matrix`.
pub(crate) fn per_column<F>(matrix: &Matrix, f: F) -> Result<Matrix>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if matrix.cols() == 0 {
        return Ok(Matrix::nan(matrix.rows(), 0));
    }
    let columns = (0..matrix.cols())
        .map(|c| f(&matrix.column_f64(c)))
        .collect();
    Matrix::from_f64_columns(columns)
}

/// Apply `f` to matching asset columns of the prices and log-returns.
pub(crate) fn per_asset<F>(data: &DerivedArrays, f: F) -> Result<Matrix>
where
    F: Fn(&[f64], &[f64]) -> Vec<f64>,
{
    let (prices, log_returns) = (data.prices(), data.log_returns());
    if prices.cols() == 0 {
        return Ok(Matrix::nan(prices.rows(), 0));
    }
    let columns = (0..prices.cols())
        .map(|c| f(&prices.column_f64(c), &log_returns.column_f64(c)))
        .collect();
    Matrix::from_f64_columns(columns)
}

/// `(EMA_short - EMA_long) / price`.
pub(crate) fn crossover(prices: &[f64], trend: &TrendParams) -> Vec<f64> {
    let fast = ewm_mean(prices, window(trend.short));
    let slow = ewm_mean(prices, window(trend.long));
    prices
        .iter()
        .zip(fast.iter().zip(&slow))
        .map(|(&p, (&f, &s))| if p > 0.0 { (f - s) / p } else { f64::NAN })
        .collect()
}
