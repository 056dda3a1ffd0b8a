//! Higher-moment indicators on log-returns.

use super::{crossover, per_asset, wrong_params};
use crate::derived::DerivedArrays;
use crate::error::Result;
use crate::indicator::Indicator;
use crate::params::{window, ParamSet, ParamShape, SmoothedParams};
use crate::rolling::{rolling_kurt, rolling_mean, rolling_skew};
use crate::types::Matrix;

fn smooth(values: &[f64], params: &SmoothedParams) -> Vec<f64> {
    let s = window(params.smoothing);
    if s <= 1 {
        values.to_vec()
    } else {
        rolling_mean(values, s, s)
    }
}

/// Negative rolling skewness of log-returns, smoothed.
///
/// Long when recent returns are left-skewed (crash risk already realized), short when
/// they are right-skewed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkewReversal;

impl Indicator for SkewReversal {
    fn name(&self) -> &str {
        "SkewReversal"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::Smoothed
    }

    fn description(&self) -> &str {
        "Smoothed negative skew of log-returns"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::Smoothed(smoothed) = params else {
            return Err(wrong_params(self.name(), params));
        };
        let w = window(smoothed.window);
        per_asset(data, |_, log_returns| {
            let skew: Vec<f64> = rolling_skew(log_returns, w, w)
                .into_iter()
                .map(|v| -v)
                .collect();
            smooth(&skew, smoothed)
        })
    }
}

/// Smoothed rolling excess kurtosis, signed by the crossover direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct KurtosisTrend;

impl Indicator for KurtosisTrend {
    fn name(&self) -> &str {
        "KurtosisTrend"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::SmoothedTrend
    }

    fn description(&self) -> &str {
        "Smoothed kurtosis times trend direction"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::SmoothedTrend { smoothed, trend } = params else {
            return Err(wrong_params(self.name(), params));
        };
        let w = window(smoothed.window);
        per_asset(data, |prices, log_returns| {
            let kurt = smooth(&rolling_kurt(log_returns, w, w), smoothed);
            let direction = crossover(prices, trend);
            kurt.iter()
                .zip(&direction)
                .map(|(&k, &d)| {
                    if d.is_nan() {
                        f64::NAN
                    } else if d > 0.0 {
                        k
                    } else if d < 0.0 {
                        -k
                    } else {
                        0.0
                    }
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::sample_data;
    use crate::params::TrendParams;

    #[test]
    fn test_unsmoothed_skew_matches_rolling_skew() {
        let data = sample_data(80, 1);
        let params = ParamSet::Smoothed(SmoothedParams { smoothing: 1, window: 10 });
        let signal = SkewReversal.execute(&data, &params).unwrap();
        let expected = -rolling_skew(&data.log_returns().column_f64(0), 10, 10)[60];
        assert!((signal.get(60, 0) as f64 - expected).abs() < 1e-5);
    }

    #[test]
    fn test_smoothing_delays_output() {
        let data = sample_data(80, 1);
        let raw = SkewReversal
            .execute(&data, &ParamSet::Smoothed(SmoothedParams { smoothing: 1, window: 16 }))
            .unwrap();
        let smoothed = SkewReversal
            .execute(&data, &ParamSet::Smoothed(SmoothedParams { smoothing: 2, window: 16 }))
            .unwrap();
        let first_raw = (0..80).find(|&t| !raw.get(t, 0).is_nan()).unwrap();
        let first_smoothed = (0..80).find(|&t| !smoothed.get(t, 0).is_nan()).unwrap();
        assert_eq!(first_smoothed, first_raw + 1);
    }

    #[test]
    fn test_kurtosis_trend_shape() {
        let data = sample_data(100, 2);
        let params = ParamSet::SmoothedTrend {
            smoothed: SmoothedParams { smoothing: 1, window: 12 },
            trend: TrendParams { short: 4, long: 16 },
        };
        let signal = KurtosisTrend.execute(&data, &params).unwrap();
        assert_eq!(signal.shape(), (100, 2));
        assert!(signal.get(99, 1).is_finite());
    }
}
