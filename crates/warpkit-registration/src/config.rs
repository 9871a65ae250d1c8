//! Serializable run configuration.
//!
//! Components are referenced by descriptor strings and resolved through a
//! [`Registry`](crate::registry::Registry), e.g.
//!
//! ```json
//! {
//!   "levels": 3,
//!   "transform": "spline:rate=8,penalty=[divcurl:weight=0.01]",
//!   "minimizer": "gsl:opt=bfgs,iter=50",
//!   "costs": [{ "cost": "ssd", "weight": 1.0 }]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};

fn default_weight() -> f64 {
    1.0
}

fn default_levels() -> usize {
    3
}

fn default_transform() -> String {
    "spline:rate=16,kernel=[bspline:d=3],bc=mirror".to_string()
}

fn default_minimizer() -> String {
    "gdas".to_string()
}

fn default_cost() -> String {
    "ssd".to_string()
}

fn default_navier() -> String {
    "navier".to_string()
}

fn default_fluid_max_iter() -> usize {
    100
}

fn default_max_step() -> f64 {
    0.5
}

fn default_tolerance() -> f64 {
    1e-4
}

fn parse_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| RegistrationError::invalid_configuration(e.to_string()))
}

/// One weighted image cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Cost descriptor, e.g. `lncc:w=3`.
    pub cost: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl CostConfig {
    pub fn new(cost: impl Into<String>, weight: f64) -> Self {
        Self {
            cost: cost.into(),
            weight,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self::new(default_cost(), default_weight())
    }
}

/// Spline registration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrationConfig {
    /// Number of pyramid levels.
    #[serde(default = "default_levels")]
    pub levels: usize,
    /// Transformation descriptor.
    #[serde(default = "default_transform")]
    pub transform: String,
    /// Minimizer descriptor.
    #[serde(default = "default_minimizer")]
    pub minimizer: String,
    /// Optional minimizer run after the main one on every level.
    #[serde(default)]
    pub refinement: Option<String>,
    #[serde(default = "default_costs")]
    pub costs: Vec<CostConfig>,
}

fn default_costs() -> Vec<CostConfig> {
    vec![CostConfig::default()]
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            transform: default_transform(),
            minimizer: default_minimizer(),
            refinement: None,
            costs: default_costs(),
        }
    }
}

impl RegistrationConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = parse_json(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RegistrationError::invalid_configuration(e.to_string()))
    }

    /// Check the values that do not need a registry.
    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 {
            return Err(RegistrationError::invalid_configuration(
                "registration needs at least one level",
            ));
        }
        if self.costs.is_empty() {
            return Err(RegistrationError::invalid_configuration("no cost function given"));
        }
        if let Some(cost) = self.costs.iter().find(|c| !(c.weight.is_finite() && c.weight >= 0.0)) {
            return Err(RegistrationError::invalid_configuration(format!(
                "cost '{}' has invalid weight {}",
                cost.cost, cost.weight
            )));
        }
        Ok(())
    }
}

/// Dense fluid registration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FluidConfig {
    #[serde(default = "default_levels")]
    pub levels: usize,
    /// Cost descriptor.
    #[serde(default = "default_cost")]
    pub cost: String,
    /// Navier solver descriptor.
    #[serde(default = "default_navier")]
    pub navier: String,
    /// Iteration limit per level.
    #[serde(default = "default_fluid_max_iter")]
    pub max_iter: usize,
    /// Largest displacement update per iteration, in pixels.
    #[serde(default = "default_max_step")]
    pub max_step: f64,
    /// Stop when the relative cost change falls below this.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            cost: default_cost(),
            navier: default_navier(),
            max_iter: default_fluid_max_iter(),
            max_step: default_max_step(),
            tolerance: default_tolerance(),
        }
    }
}

impl FluidConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = parse_json(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RegistrationError::invalid_configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 || self.max_iter == 0 {
            return Err(RegistrationError::invalid_configuration(
                "fluid registration needs at least one level and one iteration",
            ));
        }
        if !(self.max_step > 0.0 && self.max_step.is_finite()) {
            return Err(RegistrationError::invalid_configuration(format!(
                "max_step must be positive, got {}",
                self.max_step
            )));
        }
        if !(self.tolerance >= 0.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}
