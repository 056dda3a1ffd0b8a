//! Trend-following indicators built on the EMA crossover.

use super::{crossover, per_asset, wrong_params};
use crate::derived::DerivedArrays;
use crate::error::Result;
use crate::indicator::Indicator;
use crate::params::{window, ParamSet, ParamShape};
use crate::rolling::rolling_std;
use crate::types::Matrix;

/// Spread between a fast and a slow exponential moving average of price.
///
/// # Parameters
/// - `short`: fast EMA span
/// - `long`: slow EMA span (at least four times `short`)
///
/// # Signal
/// `(EMA_short - EMA_long) / price`: positive in uptrends, negative in downtrends.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovingAverageCrossover;

impl Indicator for MovingAverageCrossover {
    fn name(&self) -> &str {
        "MovingAverageCrossover"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::Trend
    }

    fn description(&self) -> &str {
        "Fast minus slow EMA, relative to price"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::Trend(trend) = params else {
            return Err(wrong_params(self.name(), params));
        };
        per_asset(data, |prices, _| crossover(prices, trend))
    }
}

/// Change of the crossover signal over `acceleration` rows.
///
/// Goes positive when a trend strengthens, negative when it fades.
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentumAcceleration;

impl Indicator for MomentumAcceleration {
    fn name(&self) -> &str {
        "MomentumAcceleration"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::TrendAcceleration
    }

    fn description(&self) -> &str {
        "Crossover minus its lagged value"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::TrendAcceleration {
            trend,
            acceleration,
        } = params
        else {
            return Err(wrong_params(self.name(), params));
        };
        let lag = window(acceleration.acceleration);
        per_asset(data, |prices, _| {
            let signal = crossover(prices, trend);
            (0..signal.len())
                .map(|t| {
                    if t < lag {
                        f64::NAN
                    } else {
                        signal[t] - signal[t - lag]
                    }
                })
                .collect()
        })
    }
}

/// Crossover divided by the rolling standard deviation of log-returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatilityScaledTrend;

impl Indicator for VolatilityScaledTrend {
    fn name(&self) -> &str {
        "VolatilityScaledTrend"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::VolatilityTrend
    }

    fn description(&self) -> &str {
        "Crossover in units of recent volatility"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::VolatilityTrend { volatility, trend } = params else {
            return Err(wrong_params(self.name(), params));
        };
        let vol_window = window(volatility.window);
        per_asset(data, |prices, log_returns| {
            let signal = crossover(prices, trend);
            let vol = rolling_std(log_returns, vol_window, vol_window);
            signal
                .iter()
                .zip(&vol)
                .map(|(&s, &v)| if v > 0.0 { s / v } else { f64::NAN })
                .collect()
        })
    }
}
