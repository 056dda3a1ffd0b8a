//! Session configuration loaded from TOML.
//!
//! Asset and indicator tables are keyed by name and iterate in name order, which is
//! also the order of the asset columns and of the indicators in the output.

use crate::clusters::ClusterTree;
use crate::derived::VolatilityConfig;
use crate::error::{BacktestError, Result};
use crate::executor::ExecutorConfig;
use crate::indicator::{IndicatorDefinition, IndicatorRegistry};
use crate::normalizer::NormalizerConfig;
use crate::types::ReturnMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Complete session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Asset name -> active.
    #[serde(default)]
    pub assets: BTreeMap<String, bool>,
    /// Indicator name -> settings.
    #[serde(default)]
    pub indicators: BTreeMap<String, IndicatorSettings>,
    /// `cluster -> subcluster -> members` for assets.
    #[serde(default)]
    pub asset_clusters: ClusterTree,
    /// `cluster -> subcluster -> members` for indicators.
    #[serde(default)]
    pub indicator_clusters: ClusterTree,
    #[serde(default)]
    pub clustering: ClusteringSettings,
    #[serde(default)]
    pub volatility: VolatilityConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// One indicator's switch and parameter grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    #[serde(default = "default_true")]
    pub active: bool,
    /// Parameter name -> candidate values.
    #[serde(default)]
    pub params: BTreeMap<String, Vec<i64>>,
}

fn default_true() -> bool { true }

/// Correlation-based asset clusters in place of the configured asset tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringSettings {
    #[serde(default)]
    pub auto: bool,
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
}

fn default_max_clusters() -> usize { 4 }

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            auto: false,
            max_clusters: default_max_clusters(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check settings that do not depend on the indicator registry or the data.
    pub fn validate(&self) -> Result<()> {
        self.volatility.validate()?;
        self.normalizer.validate()?;
        self.asset_clusters.validate()?;
        self.indicator_clusters.validate()?;
        if self.clustering.max_clusters == 0 {
            return Err(BacktestError::ConfigError(
                "clustering.max_clusters must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Names of the active assets.
    pub fn active_assets(&self) -> Result<Vec<String>> {
        let active: Vec<String> = self
            .assets
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.clone())
            .collect();
        if active.is_empty() {
            return Err(BacktestError::ConfigError("no active assets".to_string()));
        }
        Ok(active)
    }

    /// Restrict the return table to the active assets.
    pub fn select_returns(&self, returns: &ReturnMatrix) -> Result<ReturnMatrix> {
        returns.select_assets(&self.active_assets()?)
    }

    /// Build a definition for every active indicator and resolve its combinations.
    ///
    /// Fails on the first unknown indicator, bad parameter grid or empty combination
    /// set, before any numeric work.
    pub fn resolve_indicators(&self, registry: &IndicatorRegistry) -> Result<Vec<IndicatorDefinition>> {
        let mut definitions = Vec::new();
        for (name, settings) in &self.indicators {
            if !settings.active {
                debug!("Indicator {} is inactive", name);
                continue;
            }
            let indicator = registry.create(name)?;
            let mut definition = IndicatorDefinition::new(indicator, true, settings.params.clone());
            definition.get_valid_pairs()?;
            definitions.push(definition);
        }
        if definitions.is_empty() {
            return Err(BacktestError::ConfigError("no active indicators".to_string()));
        }
        info!(
            "Resolved {} indicators, {} parameter combinations",
            definitions.len(),
            definitions.iter().map(|d| d.combo_count()).sum::<usize>()
        );
        Ok(definitions)
    }

    /// Example configuration file content.
    pub fn example() -> String {
        r#"# Strategy session configuration

[assets]
SPY = true
QQQ = true
TLT = true
GLD = false

[indicators.MovingAverageCrossover]
active = true
[indicators.MovingAverageCrossover.params]
short = [4, 8, 16]
long = [32, 64]

[indicators.VolatilityMomentum]
active = true
[indicators.VolatilityMomentum.params]
window = [20, 60]

[indicators.SkewReversal]
active = true
[indicators.SkewReversal.params]
smoothing = [1, 4]
window = [32, 64]

[indicators.FixedBias]
active = false
[indicators.FixedBias.params]
bias = [1]

[asset_clusters.equities.us]
members = ["SPY", "QQQ"]

[asset_clusters.rates.long]
members = ["TLT"]

[indicator_clusters.trend.crossover]
members = ["MovingAverageCrossover", "VolatilityMomentum"]

[indicator_clusters.carry.skew]
members = ["SkewReversal"]

# Replace asset_clusters with correlation clusters
[clustering]
auto = false
max_clusters = 4

[volatility]
target_volatility = 15.0
short_windows = [8, 16, 32, 64]
long_windows = [256, 512, 1024, 2048, 4096]
short_weight = 0.6
annualization = 256.0
smoothing_window = 4

[normalizer]
min_periods = 256
clip = 2.0

[executor]
threads = 0     # 0 = one per core
"#
        .to_string()
    }
}
