//! Core reinforcement learning traits and types for traffic control
//!
//! This crate provides the environment contract, observation and action
//! spaces, configuration and error types shared by the traffic
//! environments.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod config;
pub mod environment;
pub mod error;
pub mod logging;
pub mod observation;
pub mod policy;
pub mod reward;

// Re-export core traits and types
pub use action::{Action, ActionSpace, ContinuousAction, ContinuousSpace};
pub use config::EnvironmentConfig;
pub use environment::{Environment, Episode, Step, StepInfo, TrackedEnvironment};
pub use error::{EnvError, Result};
pub use observation::{BoxObservationSpace, Observation, ObservationSpace, VectorObservation};
pub use policy::{ConstantPolicy, Policy, RandomPolicy};
pub use reward::Reward;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSpace, Environment, EnvironmentConfig, Observation, ObservationSpace,
        Policy, Result, Reward, Step,
    };
}
