//! Typed environment parameters pulled from [`EnvironmentConfig`]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use traffic_rl_core::{EnvError, EnvironmentConfig, Result};

/// Which environment to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    /// Open merge network, acceleration control
    Merge,
    /// Toll booth bottleneck, acceleration and lane-change control
    Bottleneck,
    /// Toll booth bottleneck with one observation and reward per agent
    MultiAgentBottleneck,
}

impl EnvKind {
    /// Read the `env` parameter
    pub fn from_config(config: &EnvironmentConfig) -> Result<Self> {
        let name: String = config.require("env")?;
        name.parse()
    }
}

impl FromStr for EnvKind {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(Self::Merge),
            "bottleneck" => Ok(Self::Bottleneck),
            "multi_agent_bottleneck" => Ok(Self::MultiAgentBottleneck),
            other => Err(EnvError::InvalidParameter {
                name: "env".to_string(),
                reason: format!("unknown environment {other:?}"),
            }),
        }
    }
}

/// Parameters of the merge environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeParams {
    /// Maximum acceleration, m/s²
    pub max_accel: f64,
    /// Maximum deceleration, m/s²
    pub max_decel: f64,
    /// Desired system speed, m/s
    pub target_velocity: f64,
    /// Number of controlled slots
    pub num_rl: usize,
}

impl MergeParams {
    /// Parameters that must be present
    pub const REQUIRED: [&'static str; 4] = ["max_accel", "max_decel", "target_velocity", "num_rl"];

    /// Extract and check the parameters
    pub fn from_config(config: &EnvironmentConfig) -> Result<Self> {
        config.require_all(&Self::REQUIRED)?;
        Ok(Self {
            max_accel: config.require("max_accel")?,
            max_decel: config.require("max_decel")?,
            target_velocity: config.require("target_velocity")?,
            num_rl: config.require("num_rl")?,
        })
    }
}

/// Parameters of the bottleneck environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckParams {
    /// Maximum acceleration, m/s²
    pub max_accel: f64,
    /// Maximum deceleration, m/s²
    pub max_decel: f64,
    /// Minimum time between two lane changes of one vehicle, seconds
    pub lane_change_duration: f64,
    /// Turn the toll booth off
    pub disable_tb: bool,
    /// Turn the ramp meter off
    pub disable_ramp_metering: bool,
    /// Desired system speed, m/s
    pub target_velocity: f64,
    /// Put controlled vehicles back at the start once they exit
    pub add_rl_if_exit: bool,
    /// Lane scaling factor of the network
    pub scaling: usize,
    /// Speed limit used for normalisation, m/s
    pub max_speed: f64,
    /// Number of controlled slots; taken from the initial population when
    /// absent
    pub num_rl: Option<usize>,
}

impl BottleneckParams {
    /// Parameters that must be present
    pub const REQUIRED: [&'static str; 7] = [
        "max_accel",
        "max_decel",
        "lane_change_duration",
        "disable_tb",
        "disable_ramp_metering",
        "target_velocity",
        "add_rl_if_exit",
    ];

    /// Extract and check the parameters
    pub fn from_config(config: &EnvironmentConfig) -> Result<Self> {
        config.require_all(&Self::REQUIRED)?;
        let params = Self {
            max_accel: config.require("max_accel")?,
            max_decel: config.require("max_decel")?,
            lane_change_duration: config.require("lane_change_duration")?,
            disable_tb: config.require("disable_tb")?,
            disable_ramp_metering: config.require("disable_ramp_metering")?,
            target_velocity: config.require("target_velocity")?,
            add_rl_if_exit: config.require("add_rl_if_exit")?,
            scaling: config.get_or("scaling", 1)?,
            max_speed: config.get_or("max_speed", 55.0)?,
            num_rl: config.get_or("num_rl", None)?,
        };
        if params.scaling == 0 {
            return Err(EnvError::InvalidParameter {
                name: "scaling".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(params)
    }

    /// Lane-change cooldown in whole steps
    #[must_use]
    pub fn cooldown_steps(&self, sim_step: f64) -> u64 {
        // non-negative after the max, so the cast cannot wrap
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = (self.lane_change_duration / sim_step).round().max(0.0) as u64;
        steps
    }
}
