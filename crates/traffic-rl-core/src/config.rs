//! Environment configuration

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{EnvError, Result};

/// Configuration shared by every environment.
///
/// Environment specific values live in `params` and are pulled out with
/// [`EnvironmentConfig::require`] or [`EnvironmentConfig::get_or`] when the
/// environment is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Random seed
    pub seed: Option<u64>,
    /// Maximum episode steps (horizon)
    pub max_steps: Option<usize>,
    /// Simulation step length in seconds
    #[serde(default = "default_sim_step")]
    pub sim_step: f64,
    /// Whether vehicles are sorted by position before actions are mapped
    #[serde(default)]
    pub sort_vehicles: bool,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_sim_step() -> f64 {
    1.0
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_steps: None,
            sim_step: default_sim_step(),
            sort_vehicles: false,
            params: serde_json::Map::new(),
        }
    }
}

impl EnvironmentConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&text)
    }

    /// Builder-style setter for an additional parameter
    #[must_use]
    pub fn with_param(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style setter for the horizon
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Builder-style setter for the seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fetch a required parameter, failing with the parameter's name
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| EnvError::MissingParameter(name.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| EnvError::InvalidParameter {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fetch an optional parameter
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T> {
        match self.params.get(name) {
            None => Ok(default),
            Some(_) => self.require(name),
        }
    }

    /// Check every parameter in `names` is present
    pub fn require_all(&self, names: &[&str]) -> Result<()> {
        names
            .iter()
            .find(|name| !self.params.contains_key(**name))
            .map_or(Ok(()), |name| Err(EnvError::MissingParameter((*name).to_string())))
    }

    fn validate(&self) -> Result<()> {
        if !(self.sim_step.is_finite() && self.sim_step > 0.0) {
            return Err(EnvError::InvalidParameter {
                name: "sim_step".to_string(),
                reason: format!("must be positive, got {}", self.sim_step),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_missing_name() {
        let config = EnvironmentConfig::default().with_param("max_accel", 3);
        let err = config.require::<f64>("max_decel").unwrap_err();
        assert!(matches!(err, EnvError::MissingParameter(ref name) if name == "max_decel"));
        assert_eq!(config.require::<f64>("max_accel").unwrap(), 3.0);
    }

    #[test]
    fn require_rejects_wrong_type() {
        let config = EnvironmentConfig::default().with_param("num_rl", "five");
        assert!(matches!(
            config.require::<usize>("num_rl"),
            Err(EnvError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn require_all_stops_at_first_missing() {
        let config = EnvironmentConfig::default().with_param("a", 1);
        let err = config.require_all(&["a", "b", "c"]).unwrap_err();
        assert_eq!(err.to_string(), "Environment parameter \"b\" not supplied");
    }

    #[test]
    fn parses_flattened_params() {
        let config = EnvironmentConfig::from_json_str(
            r#"{"seed": 7, "max_steps": 100, "sim_step": 0.5, "num_rl": 5, "disable_tb": true}"#,
        )
        .unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_steps, Some(100));
        assert_eq!(config.require::<usize>("num_rl").unwrap(), 5);
        assert!(config.require::<bool>("disable_tb").unwrap());
        assert_eq!(config.get_or("scaling", 1_usize).unwrap(), 1);
    }

    #[test]
    fn rejects_non_positive_sim_step() {
        assert!(EnvironmentConfig::from_json_str(r#"{"sim_step": 0.0}"#).is_err());
    }

    #[tokio::test]
    async fn loads_from_file() {
        let path = std::env::temp_dir().join("traffic_rl_core_config_test.json");
        tokio::fs::write(&path, r#"{"max_steps": 10, "target_velocity": 25}"#)
            .await
            .unwrap();
        let config = EnvironmentConfig::from_file(&path).await.unwrap();
        assert_eq!(config.max_steps, Some(10));
        assert_eq!(config.sim_step, 1.0);
        std::fs::remove_file(path).ok();
    }
}
