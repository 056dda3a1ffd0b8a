//! Parameter sets for the indicator families.
//!
//! Each family has one parameter shape with a fixed parameter order and a validity
//! rule. Composite shapes nest the simple ones and are valid only when every nested
//! part is valid.
//!
//! | Shape | Parameters | Valid when |
//! |---|---|---|
//! | `Fixed` | `bias` | always |
//! | `Trend` | `short`, `long` | `short * 4 <= long` |
//! | `Acceleration` | `acceleration` | `acceleration >= 1` |
//! | `Volatility` | `window` | `window >= 2` |
//! | `Smoothed` | `smoothing`, `window` | `smoothing == 1` or `smoothing * 8 <= window` |
//!
//! The `Smoothed` rule lets `smoothing == 1` through regardless of the window.

use crate::error::{BacktestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of parameters that knows whether it is usable.
pub trait Validate {
    fn validate(&self) -> bool;
}

/// Parameters of an indicator with a constant output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedParams {
    pub bias: i64,
}

impl Validate for FixedParams {
    fn validate(&self) -> bool {
        true
    }
}

/// Short/long lookback pair of a trend-following signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrendParams {
    pub short: i64,
    pub long: i64,
}

impl Validate for TrendParams {
    fn validate(&self) -> bool {
        self.short >= 1 && self.short * 4 <= self.long
    }
}

/// Lag over which a signal's change is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccelerationParams {
    pub acceleration: i64,
}

impl Validate for AccelerationParams {
    fn validate(&self) -> bool {
        self.acceleration >= 1
    }
}

/// Lookback of a volatility estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolatilityParams {
    pub window: i64,
}

impl Validate for VolatilityParams {
    fn validate(&self) -> bool {
        self.window >= 2
    }
}

/// A higher-moment window plus the smoothing applied to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmoothedParams {
    pub smoothing: i64,
    pub window: i64,
}

impl Validate for SmoothedParams {
    fn validate(&self) -> bool {
        if self.smoothing < 1 || self.window < 3 {
            return false;
        }
        if self.smoothing > 1 {
            return self.smoothing * 8 <= self.window;
        }
        true
    }
}

/// The parameter shape an indicator family requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamShape {
    Fixed,
    Trend,
    Acceleration,
    Volatility,
    Smoothed,
    TrendAcceleration,
    VolatilityTrend,
    SmoothedTrend,
}

impl ParamShape {
    /// Parameter names in cross-product order.
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::Fixed => &["bias"],
            Self::Trend => &["short", "long"],
            Self::Acceleration => &["acceleration"],
            Self::Volatility => &["window"],
            Self::Smoothed => &["smoothing", "window"],
            Self::TrendAcceleration => &["short", "long", "acceleration"],
            Self::VolatilityTrend => &["window", "short", "long"],
            Self::SmoothedTrend => &["smoothing", "window", "short", "long"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fixed => "Fixed",
            Self::Trend => "Trend",
            Self::Acceleration => "Acceleration",
            Self::Volatility => "Volatility",
            Self::Smoothed => "Smoothed",
            Self::TrendAcceleration => "TrendAcceleration",
            Self::VolatilityTrend => "VolatilityTrend",
            Self::SmoothedTrend => "SmoothedTrend",
        }
    }

    /// Build a typed parameter set from values given in [`Self::parameter_names`] order.
    ///
    /// The result is not validated.
    pub fn build(&self, values: &[i64]) -> Result<ParamSet> {
        let expected = self.parameter_names().len();
        if values.len() != expected {
            return Err(BacktestError::InvalidInput(format!(
                "{} parameters need {} values, got {}",
                self.name(),
                expected,
                values.len()
            )));
        }
        let set = match *self {
            Self::Fixed => ParamSet::Fixed(FixedParams { bias: values[0] }),
            Self::Trend => ParamSet::Trend(TrendParams {
                short: values[0],
                long: values[1],
            }),
            Self::Acceleration => ParamSet::Acceleration(AccelerationParams {
                acceleration: values[0],
            }),
            Self::Volatility => ParamSet::Volatility(VolatilityParams { window: values[0] }),
            Self::Smoothed => ParamSet::Smoothed(SmoothedParams {
                smoothing: values[0],
                window: values[1],
            }),
            Self::TrendAcceleration => ParamSet::TrendAcceleration {
                trend: TrendParams {
                    short: values[0],
                    long: values[1],
                },
                acceleration: AccelerationParams {
                    acceleration: values[2],
                },
            },
            Self::VolatilityTrend => ParamSet::VolatilityTrend {
                volatility: VolatilityParams { window: values[0] },
                trend: TrendParams {
                    short: values[1],
                    long: values[2],
                },
            },
            Self::SmoothedTrend => ParamSet::SmoothedTrend {
                smoothed: SmoothedParams {
                    smoothing: values[0],
                    window: values[1],
                },
                trend: TrendParams {
                    short: values[2],
                    long: values[3],
                },
            },
        };
        Ok(set)
    }
}

impl fmt::Display for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One concrete, immutable combination of parameters for an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamSet {
    Fixed(FixedParams),
    Trend(TrendParams),
    Acceleration(AccelerationParams),
    Volatility(VolatilityParams),
    Smoothed(SmoothedParams),
    TrendAcceleration {
        trend: TrendParams,
        acceleration: AccelerationParams,
    },
    VolatilityTrend {
        volatility: VolatilityParams,
        trend: TrendParams,
    },
    SmoothedTrend {
        smoothed: SmoothedParams,
        trend: TrendParams,
    },
}

impl ParamSet {
    pub fn shape(&self) -> ParamShape {
        match self {
            Self::Fixed(_) => ParamShape::Fixed,
            Self::Trend(_) => ParamShape::Trend,
            Self::Acceleration(_) => ParamShape::Acceleration,
            Self::Volatility(_) => ParamShape::Volatility,
            Self::Smoothed(_) => ParamShape::Smoothed,
            Self::TrendAcceleration { .. } => ParamShape::TrendAcceleration,
            Self::VolatilityTrend { .. } => ParamShape::VolatilityTrend,
            Self::SmoothedTrend { .. } => ParamShape::SmoothedTrend,
        }
    }

    /// Values in [`ParamShape::parameter_names`] order.
    pub fn values(&self) -> Vec<i64> {
        match self {
            Self::Fixed(p) => vec![p.bias],
            Self::Trend(p) => vec![p.short, p.long],
            Self::Acceleration(p) => vec![p.acceleration],
            Self::Volatility(p) => vec![p.window],
            Self::Smoothed(p) => vec![p.smoothing, p.window],
            Self::TrendAcceleration {
                trend,
                acceleration,
            } => vec![trend.short, trend.long, acceleration.acceleration],
            Self::VolatilityTrend { volatility, trend } => {
                vec![volatility.window, trend.short, trend.long]
            }
            Self::SmoothedTrend { smoothed, trend } => {
                vec![smoothed.smoothing, smoothed.window, trend.short, trend.long]
            }
        }
    }

    /// Compact label used as the `params` level of strategy labels, e.g. `"8_32"`.
    pub fn label(&self) -> String {
        self.values()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl Validate for ParamSet {
    fn validate(&self) -> bool {
        match self {
            Self::Fixed(p) => p.validate(),
            Self::Trend(p) => p.validate(),
            Self::Acceleration(p) => p.validate(),
            Self::Volatility(p) => p.validate(),
            Self::Smoothed(p) => p.validate(),
            Self::TrendAcceleration {
                trend,
                acceleration,
            } => trend.validate() && acceleration.validate(),
            Self::VolatilityTrend { volatility, trend } => {
                volatility.validate() && trend.validate()
            }
            Self::SmoothedTrend { smoothed, trend } => smoothed.validate() && trend.validate(),
        }
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Cartesian product of value lists; the first list varies slowest.
pub fn cartesian_product(lists: &[Vec<i64>]) -> Vec<Vec<i64>> {
    let mut result: Vec<Vec<i64>> = vec![Vec::with_capacity(lists.len())];
    for values in lists {
        let mut next = Vec::with_capacity(result.len() * values.len());
        for prefix in &result {
            for &value in values {
                let mut combo = prefix.clone();
                combo.push(value);
                next.push(combo);
            }
        }
        result = next;
    }
    result
}

/// Convert a validated window parameter to a length.
pub fn window(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}
