//! Derived arrays computed once from the return matrix.
//!
//! Every array here is shifted so that the value at row `t` depends only on returns
//! observed at rows `< t`:
//!
//! - `prices`: equity curve rebased to 100, shifted one step, with gaps restored at the
//!   exact cells where the source return is missing
//! - `log_returns`: log of consecutive equity-curve ratios, shifted one step
//! - `adjusted_returns`: raw returns scaled by the shifted inverse composite volatility
//!
//! The shift on the position-size factor is what keeps `adjusted_returns` free of
//! look-ahead; it is applied before the multiplication, never after.

use crate::error::{BacktestError, Result};
use crate::rolling::{nan_mean, rolling_mean, rolling_median, rolling_std, shift};
use crate::types::Matrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings for the composite volatility estimate used for position sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// Annualized target volatility, in percent.
    #[serde(default = "default_target_volatility")]
    pub target_volatility: f64,
    /// Short rolling-volatility windows (observations).
    #[serde(default = "default_short_windows")]
    pub short_windows: Vec<usize>,
    /// Long windows for the rolling-median smoothed estimate. Windows that are not
    /// shorter than the sample are skipped.
    #[serde(default = "default_long_windows")]
    pub long_windows: Vec<usize>,
    /// Weight of the short estimate in the blend; the long estimate gets the rest.
    #[serde(default = "default_short_weight")]
    pub short_weight: f64,
    /// Observations per year.
    #[serde(default = "default_annualization")]
    pub annualization: f64,
    /// Rolling-mean window applied to the annualized composite.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
}

fn default_target_volatility() -> f64 { 15.0 }
fn default_short_windows() -> Vec<usize> { vec![8, 16, 32, 64] }
fn default_long_windows() -> Vec<usize> { vec![256, 512, 1024, 2048, 4096] }
fn default_short_weight() -> f64 { 0.6 }
fn default_annualization() -> f64 { 256.0 }
fn default_smoothing_window() -> usize { 4 }

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            target_volatility: default_target_volatility(),
            short_windows: default_short_windows(),
            long_windows: default_long_windows(),
            short_weight: default_short_weight(),
            annualization: default_annualization(),
            smoothing_window: default_smoothing_window(),
        }
    }
}

impl VolatilityConfig {
    /// Check the settings before any numeric work.
    pub fn validate(&self) -> Result<()> {
        if self.target_volatility <= 0.0 || !self.target_volatility.is_finite() {
            return Err(BacktestError::ConfigError(format!(
                "target_volatility must be positive, got {}",
                self.target_volatility
            )));
        }
        if self.short_windows.is_empty() || self.short_windows.iter().any(|&w| w < 2) {
            return Err(BacktestError::ConfigError(
                "short_windows must be non-empty and each at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.short_weight) {
            return Err(BacktestError::ConfigError(format!(
                "short_weight must be within [0, 1], got {}",
                self.short_weight
            )));
        }
        if self.annualization <= 0.0 {
            return Err(BacktestError::ConfigError(
                "annualization must be positive".to_string(),
            ));
        }
        if self.smoothing_window == 0 {
            return Err(BacktestError::ConfigError(
                "smoothing_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Prices, log-returns and volatility-adjusted returns derived from one return matrix.
///
/// Immutable after construction; all arrays share the input's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedArrays {
    prices: Matrix,
    log_returns: Matrix,
    adjusted_returns: Matrix,
}

impl DerivedArrays {
    /// Compute all derived arrays from a percentage-return matrix.
    pub fn compute(returns: &Matrix, config: &VolatilityConfig) -> Result<Self> {
        config.validate()?;
        let rows = returns.rows();
        let long_windows: Vec<usize> = config
            .long_windows
            .iter()
            .copied()
            .filter(|&w| w < rows)
            .collect();
        if long_windows.len() < config.long_windows.len() {
            debug!(
                "Skipping {} long volatility windows not shorter than {} rows",
                config.long_windows.len() - long_windows.len(),
                rows
            );
        }

        let columns: Vec<(Vec<f64>, Vec<f64>, Vec<f64>)> = (0..returns.cols())
            .into_par_iter()
            .map(|c| {
                let column = returns.column_f64(c);
                let (prices, log_returns) = price_columns(&column);
                let adjusted = adjusted_column(&column, config, &long_windows);
                (prices, log_returns, adjusted)
            })
            .collect();

        let mut prices = Vec::with_capacity(columns.len());
        let mut log_returns = Vec::with_capacity(columns.len());
        let mut adjusted = Vec::with_capacity(columns.len());
        for (p, l, a) in columns {
            prices.push(p);
            log_returns.push(l);
            adjusted.push(a);
        }

        let to_matrix = |cols: Vec<Vec<f64>>| -> Result<Matrix> {
            if cols.is_empty() {
                Ok(Matrix::nan(rows, 0))
            } else {
                Matrix::from_f64_columns(cols)
            }
        };

        Ok(Self {
            prices: to_matrix(prices)?,
            log_returns: to_matrix(log_returns)?,
            adjusted_returns: to_matrix(adjusted)?,
        })
    }

    pub fn prices(&self) -> &Matrix {
        &self.prices
    }

    pub fn log_returns(&self) -> &Matrix {
        &self.log_returns
    }

    pub fn adjusted_returns(&self) -> &Matrix {
        &self.adjusted_returns
    }

    pub fn rows(&self) -> usize {
        self.prices.rows()
    }

    pub fn assets(&self) -> usize {
        self.prices.cols()
    }
}

/// Equity curve rebased to 100; row 0 and missing-return cells are `NaN`.
///
/// Returns `(filled, gapped)`: `filled` compounds missing returns as zero and only
/// blanks row 0, `gapped` additionally blanks the cells whose return is missing.
fn equity_curve(returns: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut filled = vec![f64::NAN; returns.len()];
    let mut gapped = vec![f64::NAN; returns.len()];
    let mut level = 100.0;
    for (t, &r) in returns.iter().enumerate() {
        let step = if r.is_nan() { 0.0 } else { r };
        level *= 1.0 + step / 100.0;
        if t == 0 {
            continue;
        }
        filled[t] = level;
        if !r.is_nan() {
            gapped[t] = level;
        }
    }
    (filled, gapped)
}

/// Shifted prices and shifted log-returns for one asset column.
fn price_columns(returns: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let (filled, gapped) = equity_curve(returns);

    let mut prices = shift(&filled, 1);
    for (p, r) in prices.iter_mut().zip(returns) {
        if r.is_nan() {
            *p = f64::NAN;
        }
    }

    let mut log_returns = vec![f64::NAN; gapped.len()];
    for t in 1..gapped.len() {
        let (prev, curr) = (gapped[t - 1], gapped[t]);
        if prev > 0.0 && curr > 0.0 {
            log_returns[t] = (curr / prev).ln();
        }
    }

    (prices, shift(&log_returns, 1))
}

/// Composite annualized volatility (percent) for one asset column, unshifted.
pub fn composite_volatility(
    returns: &[f64],
    config: &VolatilityConfig,
    long_windows: &[usize],
) -> Vec<f64> {
    let n = returns.len();
    let short_estimates: Vec<Vec<f64>> = config
        .short_windows
        .iter()
        .map(|&w| rolling_std(returns, w, w))
        .collect();
    let short: Vec<f64> = (0..n)
        .map(|t| nan_mean(short_estimates.iter().map(|s| s[t])))
        .collect();

    let long_estimates: Vec<Vec<f64>> = long_windows
        .iter()
        .map(|&w| rolling_median(&short, w, w))
        .collect();

    let annualize = config.annualization.sqrt();
    let blended: Vec<f64> = (0..n)
        .map(|t| {
            let long = nan_mean(long_estimates.iter().map(|l| l[t]));
            let vol = if long.is_nan() {
                short[t]
            } else {
                config.short_weight * short[t] + (1.0 - config.short_weight) * long
            };
            vol * annualize
        })
        .collect();

    rolling_mean(&blended, config.smoothing_window, 1)
}

/// Returns scaled by the shifted `target / composite` position-size factor.
fn adjusted_column(returns: &[f64], config: &VolatilityConfig, long_windows: &[usize]) -> Vec<f64> {
    let vol = composite_volatility(returns, config, long_windows);
    let factor: Vec<f64> = vol
        .iter()
        .map(|&v| {
            if v > 0.0 {
                config.target_volatility / v
            } else {
                f64::NAN
            }
        })
        .collect();
    let factor = shift(&factor, 1);
    returns.iter().zip(&factor).map(|(r, f)| r * f).collect()
}
