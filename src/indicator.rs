//! Indicator trait, indicator definitions and the indicator registry.
//!
//! An [`Indicator`] is a pure function from the derived arrays and one [`ParamSet`] to
//! a raw signal matrix (rows = dates, columns = assets). An [`IndicatorDefinition`]
//! pairs an indicator with the parameter grid configured for this session and owns
//! the resolved list of valid parameter combinations.
//!
//! Indicators are looked up by name in an [`IndicatorRegistry`], an explicit table of
//! factories built once at startup and passed to configuration resolution.

use crate::derived::DerivedArrays;
use crate::error::{BacktestError, Result};
use crate::params::{cartesian_product, ParamSet, ParamShape, Validate};
use crate::types::Matrix;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Capability shared by every indicator family.
pub trait Indicator: Send + Sync {
    /// Unique name; also the key used in configuration.
    fn name(&self) -> &str;

    /// Parameter shape this indicator accepts.
    fn shape(&self) -> ParamShape;

    /// One-line description for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Compute the raw signal for every asset.
    fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix>;
}

/// Constructor stored in the registry.
pub type IndicatorFactory = fn() -> Arc<dyn Indicator>;

/// Name → factory table of available indicators.
#[derive(Clone, Default)]
pub struct IndicatorRegistry {
    factories: BTreeMap<String, IndicatorFactory>,
}

impl IndicatorRegistry {
    /// A registry with no indicators.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every built-in indicator.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for &(name, factory) in crate::indicators::BUILTIN_INDICATORS {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Add an indicator; names must be unique and match [`Indicator::name`].
    pub fn register(&mut self, name: impl Into<String>, factory: IndicatorFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(BacktestError::ConfigError(format!(
                "indicator '{}' registered twice",
                name
            )));
        }
        let built = factory();
        if built.name() != name {
            return Err(BacktestError::ConfigError(format!(
                "indicator '{}' cannot be registered as '{}'",
                built.name(),
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Instantiate an indicator by name.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Indicator>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| {
                BacktestError::ConfigError(format!(
                    "unknown indicator '{}' (available: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// An indicator together with its configured parameter grid.
#[derive(Clone)]
pub struct IndicatorDefinition {
    name: String,
    active: bool,
    grid: BTreeMap<String, Vec<i64>>,
    indicator: Arc<dyn Indicator>,
    combos: Option<Vec<ParamSet>>,
}

impl IndicatorDefinition {
    /// Pair an indicator with its candidate parameter values.
    pub fn new(
        indicator: Arc<dyn Indicator>,
        active: bool,
        grid: BTreeMap<String, Vec<i64>>,
    ) -> Self {
        Self {
            name: indicator.name().to_string(),
            active,
            grid,
            indicator,
            combos: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn shape(&self) -> ParamShape {
        self.indicator.shape()
    }

    pub fn grid(&self) -> &BTreeMap<String, Vec<i64>> {
        &self.grid
    }

    pub fn indicator(&self) -> &Arc<dyn Indicator> {
        &self.indicator
    }

    /// Resolve the valid parameter combinations.
    ///
    /// Takes the Cartesian product of the grid in the shape's declared parameter order
    /// and keeps the combinations that validate. The result is cached; later calls
    /// return it unchanged. Zero valid combinations is a configuration error.
    pub fn get_valid_pairs(&mut self) -> Result<&[ParamSet]> {
        if self.combos.is_none() {
            let combos = self.generate_combos()?;
            info!(
                "Indicator {}: {} valid parameter combinations",
                self.name,
                combos.len()
            );
            self.combos = Some(combos);
        }
        self.combos()
    }

    /// The resolved combinations; fails if [`Self::get_valid_pairs`] has not run.
    pub fn combos(&self) -> Result<&[ParamSet]> {
        self.combos.as_deref().ok_or_else(|| {
            BacktestError::ConfigError(format!(
                "parameter combinations of '{}' have not been resolved",
                self.name
            ))
        })
    }

    /// Number of resolved combinations, zero when unresolved.
    pub fn combo_count(&self) -> usize {
        self.combos.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    fn generate_combos(&self) -> Result<Vec<ParamSet>> {
        let shape = self.shape();
        let names = shape.parameter_names();

        if let Some(extra) = self.grid.keys().find(|k| !names.contains(&k.as_str())) {
            return Err(BacktestError::ConfigError(format!(
                "indicator '{}' does not take parameter '{}' (expects {})",
                self.name,
                extra,
                names.join(", ")
            )));
        }

        let mut lists = Vec::with_capacity(names.len());
        for name in names {
            let values = self.grid.get(*name).ok_or_else(|| {
                BacktestError::ConfigError(format!(
                    "indicator '{}' is missing parameter '{}'",
                    self.name, name
                ))
            })?;
            let mut unique: Vec<i64> = Vec::with_capacity(values.len());
            for &v in values {
                if !unique.contains(&v) {
                    unique.push(v);
                }
            }
            lists.push(unique);
        }

        let candidates = cartesian_product(&lists);
        let total = candidates.len();
        let mut combos = Vec::with_capacity(total);
        for values in candidates {
            let set = shape.build(&values)?;
            if set.validate() {
                combos.push(set);
            } else {
                debug!("Indicator {}: discarding invalid combination {}", self.name, set);
            }
        }

        if combos.is_empty() {
            return Err(BacktestError::EmptyParameterSet {
                indicator: self.name.clone(),
            });
        }
        debug!(
            "Indicator {}: kept {}/{} combinations",
            self.name,
            combos.len(),
            total
        );
        Ok(combos)
    }

    /// Run the indicator for one combination and check the output shape.
    pub fn execute(&self, data: &DerivedArrays, params: &ParamSet) -> Result<Matrix> {
        if params.shape() != self.shape() {
            return Err(BacktestError::InvalidInput(format!(
                "indicator '{}' expects {} parameters, got {}",
                self.name,
                self.shape(),
                params.shape()
            )));
        }
        let signal = self.indicator.execute(data, params)?;
        let expected = (data.rows(), data.assets());
        if signal.shape() != expected {
            return Err(BacktestError::ShapeMismatch(format!(
                "indicator '{}' returned {:?}, expected {:?}",
                self.name,
                signal.shape(),
                expected
            )));
        }
        Ok(signal)
    }
}

impl fmt::Debug for IndicatorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorDefinition")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("grid", &self.grid)
            .field("combos", &self.combos)
            .finish()
    }
}
