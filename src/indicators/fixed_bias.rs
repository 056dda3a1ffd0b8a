//! Constant-position indicator.

use super::{per_asset, wrong_params};
use crate::derived::DerivedArrays;
use crate::error::Result;
use crate::indicator::Indicator;
use crate::params::{ParamSet, ParamShape};
use crate::types::Matrix;

/// Holds a constant position of size `bias` wherever the asset has a price.
///
/// # Parameters
/// - `bias`: signed position size before normalization
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBias;

impl Indicator for FixedBias {
    fn name(&self) -> &str {
        "FixedBias"
    }

    fn shape(&self) -> ParamShape {
        ParamShape::Fixed
    }

    fn description(&self) -> &str {
        "Constant position wherever a price exists"
    }

    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        let ParamSet::Fixed(fixed) = params else {
            return Err(wrong_params(self.name(), params));
        };
        let bias = fixed.bias as f64;
        per_asset(data, |prices, _| {
            prices
                .iter()
                .map(|p| if p.is_nan() { f64::NAN } else { bias })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::sample_data;
    use crate::params::{FixedParams, TrendParams};

    #[test]
    fn test_constant_where_priced() {
        let data = sample_data(20, 2);
        let signal = FixedBias
            .execute(&data, &ParamSet::Fixed(FixedParams { bias: 3 }))
            .unwrap();
        assert_eq!(signal.shape(), (20, 2));
        // row 0 and row 1 have no shifted price yet
        assert!(signal.get(1, 0).is_nan());
        assert_eq!(signal.get(5, 1), 3.0);
    }

    #[test]
    fn test_rejects_other_shapes() {
        let data = sample_data(20, 1);
        let params = ParamSet::Trend(TrendParams { short: 2, long: 8 });
        assert!(FixedBias.execute(&data, &params).is_err());
    }
}
