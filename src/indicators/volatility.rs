//! Volatility-normalized momentum.

use super::{per_asset, wrong_params};
use crate::derived::DerivedArrays;
use crate::error::Result;
use crate::indicator::Indicator;
use crate::params::{window, ParamSet, ParamShape};
use crate::rolling::{rolling_std, rolling_sum};
use crate::types::Matrix;

/// Cumulative log-return over a window in units of its own volatility.
///
/// # Parameters
/// - `window`: lookback in rows
///
/// # Signal
/// `sum(log_ret) / (std(log_ret) * sqrt(window))`, a momentum t-statistic.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatilityMomentum;

impl Indicator for VolatilityMomentum {
    fn name(&self) -> &str {
        "VolatilityMomentum"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::Volatility
    }

    fn description(&self) -> &str {
        "Momentum t-statistic of log-returns"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::Volatility(vol) = params else {
            return Err(wrong_params(self.name(), params));
        };
        let w = window(vol.window);
        let scale = (w as f64).sqrt();
        per_asset(data, |_, log_returns| {
            let sums = rolling_sum(log_returns, w, w);
            let stds = rolling_std(log_returns, w, w);
            sums.iter()
                .zip(&stds)
                .map(|(&s, &sd)| if sd > 0.0 { s / (sd * scale) } else { f64::NAN })
                .collect()
        })
    }
}
