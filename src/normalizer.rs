//! Rescaling of raw indicator signals into bounded position sizes.

use crate::error::{BacktestError, Result};
use crate::rolling::{backfill_leading, expanding_median, nan_median};
use crate::types::Matrix;
use serde::{Deserialize, Serialize};

/// Settings for [`SignalNormalizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Observations required before the expanding median of `|signal|` is defined.
    #[serde(default = "default_min_periods")]
    pub min_periods: usize,
    /// Normalized signals are clipped to `[-clip, clip]`.
    #[serde(default = "default_clip")]
    pub clip: f64,
}

fn default_min_periods() -> usize { 256 }
fn default_clip() -> f64 { 2.0 }

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_periods: default_min_periods(),
            clip: default_clip(),
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_periods == 0 {
            return Err(BacktestError::ConfigError(
                "normalizer min_periods must be at least 1".to_string(),
            ));
        }
        if !(self.clip > 0.0 && self.clip.is_finite()) {
            return Err(BacktestError::ConfigError(format!(
                "normalizer clip must be positive, got {}",
                self.clip
            )));
        }
        Ok(())
    }
}

/// Scales a raw signal so its typical magnitude is one, then clips it.
///
/// The scale at row `t` is the inverse of the cross-sectional median of each column's
/// expanding median of `|signal|`, so it only uses rows `<= t` of a signal that is itself
/// built from shifted inputs.
#[derive(Debug, Clone, Default)]
pub struct SignalNormalizer {
    config: NormalizerConfig,
}

impl SignalNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Time-indexed scalar applied to every column of `signal`.
    pub fn scalar(&self, signal: &Matrix) -> Vec<f64> {
        let medians: Vec<Vec<f64>> = (0..signal.cols())
            .map(|c| {
                let magnitude: Vec<f64> = signal.column_f64(c).iter().map(|v| v.abs()).collect();
                expanding_median(&magnitude, self.config.min_periods)
            })
            .collect();

        let inverse: Vec<f64> = (0..signal.rows())
            .map(|t| {
                let typical = nan_median(medians.iter().map(|m| m[t]));
                if typical > 0.0 {
                    1.0 / typical
                } else {
                    f64::NAN
                }
            })
            .collect();

        backfill_leading(&inverse)
    }

    /// Rescaled and clipped copy of `signal`.
    pub fn normalize(&self, signal: &Matrix) -> Matrix {
        let scalar = self.scalar(signal);
        let clip = self.config.clip;
        let mut out = signal.clone();
        for c in 0..out.cols() {
            for (value, &s) in out.column_mut(c).iter_mut().zip(&scalar) {
                let scaled = *value as f64 * s;
                *value = if scaled.is_nan() {
                    f32::NAN
                } else {
                    scaled.clamp(-clip, clip) as f32
                };
            }
        }
        out
    }

    /// Realized strategy returns: normalized signal times adjusted returns.
    pub fn strategy_returns(&self, signal: &Matrix, adjusted_returns: &Matrix) -> Result<Matrix> {
        self.normalize(signal).zip_map(adjusted_returns, |s, r| s * r)
    }
}
